//! Source credentials: the broad tokens that get downscoped.
//!
//! A [`SourceCredentialProvider`] produces a currently valid bearer token on demand. Providers
//! are injected explicitly; nothing is discovered from the environment.

pub mod service_account;

pub use service_account::*;

// self
use crate::{
	_prelude::*,
	auth::BearerToken,
	error::CredentialError,
	obs::{self, OpKind, OpOutcome},
};

/// Boxed future returned by [`SourceCredentialProvider`] implementations.
pub type SourceFuture<'a, T> =
	Pin<Box<dyn Future<Output = Result<T, CredentialError>> + 'a + Send>>;

/// Capability to produce a valid bearer token for the source principal.
///
/// Implementations handle their own caching and renewal. Callers treat every returned token
/// as usable right now.
pub trait SourceCredentialProvider: Send + Sync {
	/// Returns a currently valid source token.
	fn bearer_token(&self) -> SourceFuture<'_, BearerToken>;
}
impl<P> SourceCredentialProvider for Arc<P>
where
	P: ?Sized + SourceCredentialProvider,
{
	fn bearer_token(&self) -> SourceFuture<'_, BearerToken> {
		(**self).bearer_token()
	}
}

/// Provider wrapping a pre-minted access token.
///
/// The token is served as-is until its expiry (if known) passes, after which every call fails
/// with [`CredentialError::StaticTokenExpired`].
#[derive(Clone, Debug)]
pub struct StaticTokenProvider {
	token: BearerToken,
}
impl StaticTokenProvider {
	/// Wraps `token`.
	pub fn new(token: BearerToken) -> Self {
		Self { token }
	}

	/// Wraps a raw access token string with no known expiry.
	pub fn from_access_token(access_token: impl Into<String>) -> Self {
		Self::new(BearerToken::new(access_token.into()))
	}

	fn current(&self, now: OffsetDateTime) -> Result<BearerToken, CredentialError> {
		match self.token.expires_at() {
			Some(expired_at) if self.token.is_expired_at(now) =>
				Err(CredentialError::StaticTokenExpired { expired_at }),
			_ => Ok(self.token.clone()),
		}
	}
}
impl SourceCredentialProvider for StaticTokenProvider {
	fn bearer_token(&self) -> SourceFuture<'_, BearerToken> {
		Box::pin(async move {
			let result = self.current(OffsetDateTime::now_utc());

			obs::record_op_outcome(OpKind::SourceToken, match &result {
				Ok(_) => OpOutcome::Success,
				Err(_) => OpOutcome::Rejected,
			});

			result
		})
	}
}
