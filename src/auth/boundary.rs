//! Credential Access Boundary policy model.
//!
//! A [`CredentialAccessBoundary`] is an ordered list of [`AccessBoundaryRule`]s. Each rule names
//! one resource, the permissions that may be exercised on it, and an optional
//! [`AvailabilityCondition`] that narrows the grant further. Every value is validated on
//! construction (and again on deserialization) so an invalid policy can never reach the token
//! exchange endpoint. Once built, boundaries are immutable.

pub mod wire;

pub use wire::{parse, serialize};

// std
use std::sync::OnceLock;
// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use serde::{Deserializer, Serializer, de::Error as DeError, ser::SerializeStruct};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::{PermissionSet, SetValidationError},
};

/// Errors raised while validating rules and boundaries.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum BoundaryError {
	/// Rule resource identifier is empty.
	#[error("Access boundary rule resource cannot be empty.")]
	EmptyResource,
	/// Rule grants no permissions.
	#[error("Access boundary rule must grant at least one permission.")]
	EmptyPermissions,
	/// A permission entry is malformed.
	#[error("Access boundary rule contains an invalid permission.")]
	InvalidPermission(#[from] SetValidationError),
	/// Condition was supplied without an expression.
	#[error("Availability condition expression cannot be empty.")]
	EmptyConditionExpression,
	/// Boundary contains no rules.
	#[error("Credential access boundary must contain at least one rule.")]
	NoRules,
	/// Boundary exceeds the upstream rule cap.
	#[error("Credential access boundary has {actual} rules; at most {max} are allowed.")]
	TooManyRules {
		/// Maximum rule count accepted upstream.
		max: usize,
		/// Rule count that was supplied.
		actual: usize,
	},
	/// Serialized boundary could not be parsed.
	#[error("Credential access boundary JSON is invalid at `{path}`: {message}.")]
	Parse {
		/// JSON path of the failure.
		path: String,
		/// Parser message.
		message: String,
	},
}

/// Boolean expression further restricting when a rule's permissions apply.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawCondition")]
pub struct AvailabilityCondition {
	expression: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	title: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	description: Option<String>,
}
impl AvailabilityCondition {
	/// Creates a condition from a non-empty expression.
	pub fn new(expression: impl Into<String>) -> Result<Self, BoundaryError> {
		let expression = expression.into();

		if expression.trim().is_empty() {
			return Err(BoundaryError::EmptyConditionExpression);
		}

		Ok(Self { expression, title: None, description: None })
	}

	/// Attaches a short human-readable title.
	pub fn with_title(mut self, title: impl Into<String>) -> Self {
		self.title = Some(title.into());

		self
	}

	/// Attaches a longer human-readable description.
	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.description = Some(description.into());

		self
	}

	/// Condition expression.
	pub fn expression(&self) -> &str {
		&self.expression
	}

	/// Optional title.
	pub fn title(&self) -> Option<&str> {
		self.title.as_deref()
	}

	/// Optional description.
	pub fn description(&self) -> Option<&str> {
		self.description.as_deref()
	}
}

#[derive(Deserialize)]
struct RawCondition {
	expression: String,
	title: Option<String>,
	description: Option<String>,
}
impl TryFrom<RawCondition> for AvailabilityCondition {
	type Error = BoundaryError;

	fn try_from(raw: RawCondition) -> Result<Self, Self::Error> {
		let mut condition = Self::new(raw.expression)?;

		condition.title = raw.title;
		condition.description = raw.description;

		Ok(condition)
	}
}

/// One attenuation rule: resource, permissions, and an optional condition.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawRule")]
pub struct AccessBoundaryRule {
	available_resource: String,
	available_permissions: PermissionSet,
	#[serde(skip_serializing_if = "Option::is_none")]
	availability_condition: Option<AvailabilityCondition>,
}
impl AccessBoundaryRule {
	/// Builds a rule, rejecting empty resources, empty permission sets, and empty entries.
	pub fn new<I, S>(
		resource: impl Into<String>,
		permissions: I,
		condition: Option<AvailabilityCondition>,
	) -> Result<Self, BoundaryError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let available_resource = resource.into();

		if available_resource.trim().is_empty() {
			return Err(BoundaryError::EmptyResource);
		}

		let available_permissions = PermissionSet::new(permissions)?;

		if available_permissions.is_empty() {
			return Err(BoundaryError::EmptyPermissions);
		}

		Ok(Self { available_resource, available_permissions, availability_condition: condition })
	}

	/// Resource identifier, e.g. `//storage.googleapis.com/projects/_/buckets/b1`.
	pub fn available_resource(&self) -> &str {
		&self.available_resource
	}

	/// Normalized permission set.
	pub fn available_permissions(&self) -> &PermissionSet {
		&self.available_permissions
	}

	/// Optional availability condition.
	pub fn availability_condition(&self) -> Option<&AvailabilityCondition> {
		self.availability_condition.as_ref()
	}
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRule {
	available_resource: String,
	available_permissions: Vec<String>,
	availability_condition: Option<AvailabilityCondition>,
}
impl TryFrom<RawRule> for AccessBoundaryRule {
	type Error = BoundaryError;

	fn try_from(raw: RawRule) -> Result<Self, Self::Error> {
		Self::new(raw.available_resource, raw.available_permissions, raw.availability_condition)
	}
}

/// Ordered, immutable set of attenuation rules presented during token exchange.
///
/// Rule order is preserved on the wire. The [`fingerprint`](Self::fingerprint) is a base64 (no
/// padding) SHA-256 digest of the canonical JSON, suitable for logs where the policy itself
/// should not appear.
pub struct CredentialAccessBoundary {
	access_boundary_rules: Arc<[AccessBoundaryRule]>,
	fingerprint_cache: OnceLock<String>,
}
impl CredentialAccessBoundary {
	/// Upstream cap on the number of rules per boundary.
	pub const MAX_RULES: usize = 10;

	/// Builds a boundary from `1..=MAX_RULES` rules, preserving their order.
	pub fn new<I>(rules: I) -> Result<Self, BoundaryError>
	where
		I: IntoIterator<Item = AccessBoundaryRule>,
	{
		let rules = rules.into_iter().collect::<Vec<_>>();

		if rules.is_empty() {
			return Err(BoundaryError::NoRules);
		}
		if rules.len() > Self::MAX_RULES {
			return Err(BoundaryError::TooManyRules { max: Self::MAX_RULES, actual: rules.len() });
		}

		Ok(Self { access_boundary_rules: Arc::from(rules), fingerprint_cache: OnceLock::new() })
	}

	/// Rules in presentation order.
	pub fn rules(&self) -> &[AccessBoundaryRule] {
		&self.access_boundary_rules
	}

	/// Number of rules.
	pub fn len(&self) -> usize {
		self.access_boundary_rules.len()
	}

	/// Always `false`; present for API symmetry with `len`.
	pub fn is_empty(&self) -> bool {
		self.access_boundary_rules.is_empty()
	}

	/// Canonical compact JSON sent in the exchange `options` field.
	pub fn to_json(&self) -> String {
		serialize(self)
	}

	/// Stable fingerprint of the canonical JSON.
	pub fn fingerprint(&self) -> &str {
		self.fingerprint_cache.get_or_init(|| {
			let digest = Sha256::digest(self.to_json().as_bytes());

			STANDARD_NO_PAD.encode(digest)
		})
	}
}
impl Clone for CredentialAccessBoundary {
	fn clone(&self) -> Self {
		Self {
			access_boundary_rules: self.access_boundary_rules.clone(),
			fingerprint_cache: OnceLock::new(),
		}
	}
}
impl PartialEq for CredentialAccessBoundary {
	fn eq(&self, other: &Self) -> bool {
		self.access_boundary_rules == other.access_boundary_rules
	}
}
impl Eq for CredentialAccessBoundary {}
impl Debug for CredentialAccessBoundary {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialAccessBoundary")
			.field("rules", &self.access_boundary_rules)
			.finish()
	}
}

impl Serialize for CredentialAccessBoundary {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		let mut state = serializer.serialize_struct("CredentialAccessBoundary", 1)?;

		state.serialize_field("accessBoundaryRules", self.rules())?;
		state.end()
	}
}
impl<'de> Deserialize<'de> for CredentialAccessBoundary {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = RawBoundary::deserialize(deserializer)?;

		Self::try_from(raw).map_err(DeError::custom)
	}
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBoundary {
	access_boundary_rules: Vec<AccessBoundaryRule>,
}
impl TryFrom<RawBoundary> for CredentialAccessBoundary {
	type Error = BoundaryError;

	fn try_from(raw: RawBoundary) -> Result<Self, Self::Error> {
		Self::new(raw.access_boundary_rules)
	}
}
