//! Canonical JSON wire format for the token exchange `options` field.
//!
//! ```json
//! {"accessBoundary":{"accessBoundaryRules":[{"availablePermissions":["inRole:roles/storage.objectViewer"],"availableResource":"//storage.googleapis.com/projects/_/buckets/b1"}]}}
//! ```
//!
//! Absent conditions, titles, and descriptions are omitted rather than written as `null`; the
//! exchange endpoint rejects unexpected nulls. Object keys are emitted in sorted order so the
//! output (and the boundary fingerprint) is byte-stable.

// crates.io
use serde_json::{Map, Value};
// self
use crate::{
	_prelude::*,
	auth::{AccessBoundaryRule, AvailabilityCondition, BoundaryError, CredentialAccessBoundary},
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
	access_boundary: CredentialAccessBoundary,
}

/// Renders `boundary` as compact JSON.
pub fn serialize(boundary: &CredentialAccessBoundary) -> String {
	let rules = boundary.rules().iter().map(rule_value).collect::<Vec<_>>();
	let mut inner = Map::new();

	inner.insert("accessBoundaryRules".into(), Value::Array(rules));

	let mut envelope = Map::new();

	envelope.insert("accessBoundary".into(), Value::Object(inner));

	Value::Object(envelope).to_string()
}

/// Parses the wire JSON back into a validated boundary.
pub fn parse(json: &str) -> Result<CredentialAccessBoundary, BoundaryError> {
	let mut de = serde_json::Deserializer::from_str(json);
	let envelope: WireEnvelope = serde_path_to_error::deserialize(&mut de).map_err(|err| {
		BoundaryError::Parse { path: err.path().to_string(), message: err.inner().to_string() }
	})?;

	Ok(envelope.access_boundary)
}

fn rule_value(rule: &AccessBoundaryRule) -> Value {
	let mut map = Map::new();

	// Inserted in sorted key order so the output is identical with or without
	// serde_json's `preserve_order` feature.
	if let Some(condition) = rule.availability_condition() {
		map.insert("availabilityCondition".into(), condition_value(condition));
	}

	map.insert(
		"availablePermissions".into(),
		Value::from(rule.available_permissions().iter().collect::<Vec<_>>()),
	);
	map.insert("availableResource".into(), Value::from(rule.available_resource()));

	Value::Object(map)
}

fn condition_value(condition: &AvailabilityCondition) -> Value {
	let mut map = Map::new();

	if let Some(description) = condition.description() {
		map.insert("description".into(), Value::from(description));
	}

	map.insert("expression".into(), Value::from(condition.expression()));

	if let Some(title) = condition.title() {
		map.insert("title".into(), Value::from(title));
	}

	Value::Object(map)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn sample() -> CredentialAccessBoundary {
		let condition = AvailabilityCondition::new(
			"resource.name.startsWith('projects/_/buckets/b1/objects/prefix/')",
		)
		.expect("Condition fixture should be valid.")
		.with_title("prefix-only");
		let conditioned = AccessBoundaryRule::new(
			"//storage.googleapis.com/projects/_/buckets/b1",
			["inRole:roles/storage.objectViewer"],
			Some(condition),
		)
		.expect("Conditioned rule should be valid.");
		let plain = AccessBoundaryRule::new(
			"//storage.googleapis.com/projects/_/buckets/b2",
			["inRole:roles/storage.objectAdmin", "inRole:roles/storage.legacyBucketReader"],
			None,
		)
		.expect("Plain rule should be valid.");

		CredentialAccessBoundary::new([conditioned, plain]).expect("Boundary should be valid.")
	}

	#[test]
	fn serializes_exact_wire_shape() {
		let json = serialize(&sample());

		assert_eq!(
			json,
			concat!(
				"{\"accessBoundary\":{\"accessBoundaryRules\":[",
				"{\"availabilityCondition\":{\"expression\":",
				"\"resource.name.startsWith('projects/_/buckets/b1/objects/prefix/')\",",
				"\"title\":\"prefix-only\"},",
				"\"availablePermissions\":[\"inRole:roles/storage.objectViewer\"],",
				"\"availableResource\":\"//storage.googleapis.com/projects/_/buckets/b1\"},",
				"{\"availablePermissions\":[\"inRole:roles/storage.legacyBucketReader\",",
				"\"inRole:roles/storage.objectAdmin\"],",
				"\"availableResource\":\"//storage.googleapis.com/projects/_/buckets/b2\"}",
				"]}}"
			)
		);
		assert!(!json.contains("null"));
		assert!(!json.contains("description"));
	}

	#[test]
	fn parse_restores_an_equal_boundary() {
		let boundary = sample();
		let parsed = parse(&boundary.to_json()).expect("Serialized boundary should parse back.");

		assert_eq!(parsed, boundary);
		assert_eq!(parsed.fingerprint(), boundary.fingerprint());
	}

	#[test]
	fn parse_restores_every_condition_shape() {
		fn rule(bucket: usize, condition: Option<AvailabilityCondition>) -> AccessBoundaryRule {
			AccessBoundaryRule::new(
				format!("//storage.googleapis.com/projects/_/buckets/b{bucket}"),
				["inRole:roles/storage.objectViewer"],
				condition,
			)
			.expect("Rule fixture should be valid.")
		}
		fn condition() -> AvailabilityCondition {
			AvailabilityCondition::new(
				"resource.name.startsWith('projects/_/buckets/b0/objects/a/')",
			)
			.expect("Condition fixture should be valid.")
		}

		let cases = [
			("description only", vec![rule(0, Some(condition().with_description("Reads a/.")))]),
			(
				"title and description",
				vec![rule(
					0,
					Some(condition().with_title("prefix-only").with_description("Reads a/.")),
				)],
			),
			(
				"ten rules",
				(0..CredentialAccessBoundary::MAX_RULES)
					.map(|i| match i % 3 {
						0 => rule(i, None),
						1 => rule(i, Some(condition().with_title(format!("t{i}")))),
						_ => rule(i, Some(condition().with_description(format!("d{i}")))),
					})
					.collect(),
			),
		];

		for (name, rules) in cases {
			let boundary = CredentialAccessBoundary::new(rules)
				.unwrap_or_else(|e| panic!("{name}: boundary should be valid: {e}."));
			let json = serialize(&boundary);
			let parsed =
				parse(&json).unwrap_or_else(|e| panic!("{name}: wire JSON should parse: {e}."));

			assert_eq!(parsed, boundary, "{name}");
			assert_eq!(serialize(&parsed), json, "{name}");
			assert!(!json.contains("null"), "{name}");
		}
	}

	#[test]
	fn serde_impls_agree_with_wire_rules() {
		let boundary = sample();
		let via_serde = serde_json::to_value(&boundary).expect("Boundary should serialize.");
		let wire: Value =
			serde_json::from_str(&serialize(&boundary)).expect("Wire JSON should be valid JSON.");

		assert_eq!(Some(&via_serde), wire.get("accessBoundary"));
	}

	#[test]
	fn parse_reports_validation_failures_with_path() {
		let err = parse(
			"{\"accessBoundary\":{\"accessBoundaryRules\":[{\"availableResource\":\"//r\",\"availablePermissions\":[]}]}}",
		)
		.expect_err("Empty permission arrays must be rejected on parse.");

		match err {
			BoundaryError::Parse { path, message } => {
				assert!(path.starts_with("accessBoundary"));
				assert!(message.contains("at least one permission"));
			},
			other => panic!("Unexpected error variant: {other:?}."),
		}

		assert!(matches!(
			parse("{\"accessBoundary\":{\"accessBoundaryRules\":[]}}"),
			Err(BoundaryError::Parse { .. })
		));
	}
}
