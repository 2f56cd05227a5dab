//! Error taxonomy shared by boundaries, source credentials, the exchange client, and
//! downscoped credentials.

// std
use std::path::PathBuf;
// self
use crate::{_prelude::*, auth::SetValidationError, exchange::StsDescriptorError};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Boundary or rule failed local validation; never reaches the network.
	#[error(transparent)]
	Boundary(#[from] crate::auth::BoundaryError),
	/// Source credential could not produce a bearer token.
	#[error(transparent)]
	Credential(#[from] CredentialError),
	/// Token exchange endpoint rejected the request or was unreachable.
	#[error(transparent)]
	Exchange(#[from] ExchangeError),
	/// Downscoped credential refresh failed.
	#[error(transparent)]
	Refresh(#[from] RefreshError),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Token could not be attached to an outbound request.
	#[error("Token cannot be used as an Authorization header value.")]
	InvalidAuthorizationHeader(#[from] oauth2::http::header::InvalidHeaderValue),
}

/// Configuration failures raised while assembling clients and descriptors.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// STS descriptor failed validation.
	#[error(transparent)]
	Descriptor(#[from] StsDescriptorError),
	/// Retry policy values are out of range.
	#[error("Retry policy is invalid: {reason}.")]
	InvalidRetryPolicy {
		/// Which constraint was violated.
		reason: &'static str,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Source credential failures (key file, scope elevation, IdP token endpoint).
#[derive(Debug, ThisError)]
pub enum CredentialError {
	/// Key file is missing, unreadable, or not a recognized credential structure.
	#[error("Credential file is invalid{}: {reason}.", path_suffix(.path))]
	InvalidCredentialFile {
		/// Offending path when the credential was loaded from disk.
		path: Option<PathBuf>,
		/// Human-readable reason.
		reason: String,
	},
	/// Requested scopes could not be granted to the source credential.
	#[error("Source credential scope elevation failed: {reason}.")]
	ScopeError {
		/// Provider- or crate-supplied reason string.
		reason: String,
	},
	/// Configured scopes cannot be normalized.
	#[error("Source credential scopes are invalid.")]
	InvalidScope(#[from] SetValidationError),
	/// Identity provider token endpoint rejected the request or returned garbage.
	#[error("Source token endpoint failed: {message}.")]
	TokenEndpoint {
		/// Provider- or crate-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Whether a later attempt may succeed.
		retryable: bool,
	},
	/// Pre-minted source token is past its expiry and cannot be renewed.
	#[error("Static source token expired at {expired_at}.")]
	StaticTokenExpired {
		/// Expiry instant of the static token.
		expired_at: OffsetDateTime,
	},
	/// Transport failure while talking to the identity provider.
	#[error(transparent)]
	Transport(#[from] TransportError),
}
impl CredentialError {
	/// Returns `true` when retrying the same source request later may succeed.
	pub fn is_retryable(&self) -> bool {
		match self {
			Self::InvalidCredentialFile { .. }
			| Self::ScopeError { .. }
			| Self::InvalidScope(_)
			| Self::StaticTokenExpired { .. } => false,
			Self::TokenEndpoint { retryable, .. } => *retryable,
			Self::Transport(err) => err.is_retryable(),
		}
	}

	pub(crate) fn invalid_file(path: Option<PathBuf>, reason: impl Into<String>) -> Self {
		Self::InvalidCredentialFile { path, reason: reason.into() }
	}
}

/// Token exchange failures. Use [`ExchangeError::is_retryable`] to separate policy rejections
/// from network blips.
#[derive(Debug, ThisError)]
pub enum ExchangeError {
	/// Endpoint rejected the request (malformed boundary, insufficient source privilege, or
	/// policy denied). Never retried.
	#[error("Token exchange endpoint rejected the request with HTTP {status}: {message}.")]
	Rejected {
		/// HTTP status code.
		status: u16,
		/// OAuth `error` code, when the body carried one.
		oauth_error: Option<String>,
		/// Provider- or crate-supplied message summarizing the failure.
		message: String,
	},
	/// Endpoint is temporarily unavailable (5xx, throttling classified as transient).
	#[error("Token exchange endpoint is unavailable: {message}.")]
	Unavailable {
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
		/// Provider- or crate-supplied message summarizing the failure.
		message: String,
	},
	/// Successful status but the JSON body could not be parsed.
	#[error("Token exchange endpoint returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code.
		status: u16,
	},
	/// Successful status but the parsed response violates the protocol.
	#[error("Token exchange response is invalid: {reason}.")]
	InvalidResponse {
		/// Which field or constraint was violated.
		reason: &'static str,
	},
	/// Transport failure before a response arrived.
	#[error(transparent)]
	Transport(#[from] TransportError),
}
impl ExchangeError {
	/// Returns `true` when the failure is transient and the exchange may be retried.
	pub fn is_retryable(&self) -> bool {
		match self {
			Self::Rejected { .. } => false,
			Self::Unavailable { .. } | Self::ResponseParse { .. } | Self::InvalidResponse { .. } =>
				true,
			Self::Transport(err) => err.is_retryable(),
		}
	}

	/// Returns the upstream Retry-After hint, if any.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::Unavailable { retry_after, .. } => *retry_after,
			_ => None,
		}
	}

	/// Returns the HTTP status associated with the failure, if any.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Rejected { status, .. } | Self::ResponseParse { status, .. } => Some(*status),
			Self::Unavailable { status, .. } => *status,
			Self::InvalidResponse { .. } | Self::Transport(_) => None,
		}
	}
}

/// Error surfaced to callers of
/// [`DownscopedCredential::access_token`](crate::credential::DownscopedCredential::access_token).
#[derive(Clone, Debug, ThisError)]
#[error("Downscoped credential refresh failed (retryable: {retryable}).")]
pub struct RefreshError {
	/// Whether the caller may retry the whole operation later.
	pub retryable: bool,
	/// Underlying failure.
	#[source]
	pub cause: RefreshCause,
}
impl RefreshError {
	pub(crate) fn new(cause: RefreshCause, retryable: bool) -> Self {
		Self { retryable, cause }
	}

	/// Returns `true` when the credential is permanently disabled by a policy rejection.
	pub fn is_permanent(&self) -> bool {
		!self.retryable && matches!(self.cause, RefreshCause::Exchange(_))
	}
}

/// Root cause carried by a [`RefreshError`]. Causes are shared so a failed credential can
/// replay the original rejection on every fail-fast call.
#[derive(Clone, Debug, ThisError)]
pub enum RefreshCause {
	/// Source credential failed to produce a bearer token.
	#[error(transparent)]
	Source(Arc<CredentialError>),
	/// Token exchange failed.
	#[error(transparent)]
	Exchange(Arc<ExchangeError>),
}
impl RefreshCause {
	/// Whether retrying the refresh may succeed.
	pub fn is_retryable(&self) -> bool {
		match self {
			Self::Source(err) => err.is_retryable(),
			Self::Exchange(err) => err.is_retryable(),
		}
	}
}

/// Transport-level failures (network, IO, request construction).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the token endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Request did not complete in time.
	#[error("Request timed out while calling the token endpoint.")]
	Timeout,
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the token endpoint.")]
	Io(#[from] std::io::Error),
	/// HTTP request could not be constructed locally.
	#[error(transparent)]
	Request(#[from] oauth2::http::Error),
	/// Transport reported a failure without structured detail.
	#[error("HTTP client error occurred while calling the token endpoint: {message}.")]
	Other {
		/// Transport-supplied description.
		message: String,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}

	/// Locally malformed requests will fail the same way again; everything else may recover.
	pub fn is_retryable(&self) -> bool {
		!matches!(self, Self::Request(_))
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		if e.is_timeout() { Self::Timeout } else { Self::network(e) }
	}
}

fn path_suffix(path: &Option<PathBuf>) -> String {
	path.as_ref().map(|p| format!(" ({})", p.display())).unwrap_or_default()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn exchange_retryability_splits_rejections_from_blips() {
		let rejected = ExchangeError::Rejected {
			status: 400,
			oauth_error: Some("invalid_request".into()),
			message: "bad boundary".into(),
		};
		let unavailable =
			ExchangeError::Unavailable { status: Some(503), retry_after: None, message: "".into() };

		assert!(!rejected.is_retryable());
		assert_eq!(rejected.status(), Some(400));
		assert!(unavailable.is_retryable());
		assert!(ExchangeError::from(TransportError::Timeout).is_retryable());
		assert!(ExchangeError::InvalidResponse { reason: "x" }.is_retryable());
	}

	#[test]
	fn credential_errors_classify_retryability() {
		let missing = CredentialError::invalid_file(Some("/nope.json".into()), "file not found");

		assert!(!missing.is_retryable());
		assert!(missing.to_string().contains("/nope.json"));
		assert!(!CredentialError::ScopeError { reason: "denied".into() }.is_retryable());

		let outage = CredentialError::TokenEndpoint {
			message: "bad gateway".into(),
			status: Some(502),
			retryable: true,
		};

		assert!(outage.is_retryable());
	}

	#[test]
	fn refresh_error_exposes_cause_as_source() {
		let cause = RefreshCause::Exchange(Arc::new(ExchangeError::Rejected {
			status: 403,
			oauth_error: None,
			message: "permission denied".into(),
		}));
		let err = RefreshError::new(cause, false);

		assert!(err.is_permanent());

		let source = StdError::source(&err).expect("Refresh errors should expose their cause.");

		assert!(source.to_string().contains("permission denied"));
	}
}
