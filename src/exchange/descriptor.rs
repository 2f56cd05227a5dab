//! Validated description of the token exchange (STS) endpoint.

// self
use crate::{_prelude::*, exchange::TOKEN_TYPE_ACCESS_TOKEN};

/// Production token exchange endpoint.
pub const DEFAULT_STS_TOKEN_ENDPOINT: &str = "https://sts.googleapis.com/v1/token";

/// Errors raised while building or deserializing an [`StsDescriptor`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StsDescriptorError {
	/// Endpoint string is not a valid absolute URL.
	#[error("The token exchange endpoint is not a valid URL: {url}.")]
	InvalidEndpoint {
		/// Endpoint text that failed to parse.
		url: String,
	},
	/// Endpoints must use HTTPS.
	#[error("The token exchange endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Token type URNs must not be blank.
	#[error("The {field} must not be empty.")]
	EmptyTokenType {
		/// Which field was blank.
		field: &'static str,
	},
}

/// Immutable STS endpoint configuration consumed by the exchange client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StsDescriptorBuilder")]
pub struct StsDescriptor {
	/// Token exchange endpoint.
	pub token_endpoint: Url,
	/// `subject_token_type` sent with every exchange.
	pub subject_token_type: String,
	/// `requested_token_type` sent with every exchange.
	pub requested_token_type: String,
}
impl StsDescriptor {
	/// Starts a builder seeded with the production endpoint and access-token types.
	pub fn builder() -> StsDescriptorBuilder {
		StsDescriptorBuilder::default()
	}

	/// Descriptor for the production endpoint.
	pub fn google() -> Result<Self, StsDescriptorError> {
		Self::builder().build()
	}

	fn validate(&self) -> Result<(), StsDescriptorError> {
		if self.token_endpoint.scheme() != "https" {
			return Err(StsDescriptorError::InsecureEndpoint {
				url: self.token_endpoint.to_string(),
			});
		}
		if self.subject_token_type.trim().is_empty() {
			return Err(StsDescriptorError::EmptyTokenType { field: "subject_token_type" });
		}
		if self.requested_token_type.trim().is_empty() {
			return Err(StsDescriptorError::EmptyTokenType { field: "requested_token_type" });
		}

		Ok(())
	}
}
impl TryFrom<StsDescriptorBuilder> for StsDescriptor {
	type Error = StsDescriptorError;

	fn try_from(builder: StsDescriptorBuilder) -> Result<Self, Self::Error> {
		builder.build()
	}
}

/// Builder for [`StsDescriptor`]. Unset fields fall back to the production defaults.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct StsDescriptorBuilder {
	token_endpoint: Option<Url>,
	subject_token_type: Option<String>,
	requested_token_type: Option<String>,
}
impl StsDescriptorBuilder {
	/// Overrides the token exchange endpoint.
	pub fn token_endpoint(mut self, url: Url) -> Self {
		self.token_endpoint = Some(url);

		self
	}

	/// Overrides the `subject_token_type` URN.
	pub fn subject_token_type(mut self, token_type: impl Into<String>) -> Self {
		self.subject_token_type = Some(token_type.into());

		self
	}

	/// Overrides the `requested_token_type` URN.
	pub fn requested_token_type(mut self, token_type: impl Into<String>) -> Self {
		self.requested_token_type = Some(token_type.into());

		self
	}

	/// Validates and produces the descriptor.
	pub fn build(self) -> Result<StsDescriptor, StsDescriptorError> {
		let token_endpoint = match self.token_endpoint {
			Some(url) => url,
			None => Url::parse(DEFAULT_STS_TOKEN_ENDPOINT).map_err(|_| {
				StsDescriptorError::InvalidEndpoint { url: DEFAULT_STS_TOKEN_ENDPOINT.into() }
			})?,
		};
		let descriptor = StsDescriptor {
			token_endpoint,
			subject_token_type: self
				.subject_token_type
				.unwrap_or_else(|| TOKEN_TYPE_ACCESS_TOKEN.into()),
			requested_token_type: self
				.requested_token_type
				.unwrap_or_else(|| TOKEN_TYPE_ACCESS_TOKEN.into()),
		};

		descriptor.validate()?;

		Ok(descriptor)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn defaults_target_the_production_endpoint() {
		let descriptor = StsDescriptor::google().expect("Default descriptor should build.");

		assert_eq!(descriptor.token_endpoint.as_str(), DEFAULT_STS_TOKEN_ENDPOINT);
		assert_eq!(descriptor.subject_token_type, TOKEN_TYPE_ACCESS_TOKEN);
		assert_eq!(descriptor.requested_token_type, TOKEN_TYPE_ACCESS_TOKEN);
	}

	#[test]
	fn plain_http_endpoints_are_rejected() {
		let err = StsDescriptor::builder()
			.token_endpoint(
				Url::parse("http://localhost:8080/token")
					.expect("Endpoint fixture should parse successfully."),
			)
			.build()
			.expect_err("Plain HTTP endpoints must be rejected.");

		assert!(matches!(err, StsDescriptorError::InsecureEndpoint { .. }));
		assert_eq!(
			StsDescriptor::builder().subject_token_type(" ").build(),
			Err(StsDescriptorError::EmptyTokenType { field: "subject_token_type" })
		);
	}

	#[test]
	fn deserialization_applies_defaults_and_validation() {
		let descriptor: StsDescriptor =
			serde_json::from_str("{\"token_endpoint\":\"https://sts.example.com/v1/token\"}")
				.expect("Partial descriptor config should deserialize.");

		assert_eq!(descriptor.token_endpoint.host_str(), Some("sts.example.com"));
		assert_eq!(descriptor.requested_token_type, TOKEN_TYPE_ACCESS_TOKEN);
		assert!(
			serde_json::from_str::<StsDescriptor>("{\"token_endpoint\":\"http://sts.example.com\"}")
				.is_err()
		);
	}
}
