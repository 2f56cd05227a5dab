//! Bearer tokens produced by source providers and the exchange endpoint.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Access token plus its optional absolute expiry.
///
/// A token without a known expiry is usable once but is never served from a cache.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken {
	access_token: TokenSecret,
	expires_at: Option<OffsetDateTime>,
}
impl BearerToken {
	/// Wraps a token with no known expiry.
	pub fn new(access_token: impl Into<TokenSecret>) -> Self {
		Self { access_token: access_token.into(), expires_at: None }
	}

	/// Sets the absolute expiry instant.
	pub fn with_expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets the expiry relative to `issued_at`.
	pub fn with_expires_in(self, issued_at: OffsetDateTime, lifetime: Duration) -> Self {
		self.with_expires_at(issued_at + lifetime)
	}

	/// Token secret; callers must avoid logging it.
	pub fn access_token(&self) -> &TokenSecret {
		&self.access_token
	}

	/// Absolute expiry, when the issuer reported one.
	pub fn expires_at(&self) -> Option<OffsetDateTime> {
		self.expires_at
	}

	/// Only tokens with a known expiry may be reused.
	pub fn is_cacheable(&self) -> bool {
		self.expires_at.is_some()
	}

	/// Returns `true` when the token may be served at `now` while keeping `margin` in reserve
	/// before expiry. Tokens without an expiry are never fresh, and neither are tokens whose
	/// refresh edge falls outside the representable range.
	pub fn is_fresh_at(&self, now: OffsetDateTime, margin: Duration) -> bool {
		self.expires_at
			.and_then(|expires_at| expires_at.checked_sub(margin))
			.is_some_and(|edge| now < edge)
	}

	/// Returns `true` once `now` reaches the expiry instant.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		self.expires_at.is_some_and(|expires_at| now >= expires_at)
	}

	/// Remaining lifetime at `now`, clamped at zero.
	pub fn remaining_at(&self, now: OffsetDateTime) -> Option<Duration> {
		self.expires_at.map(|expires_at| (expires_at - now).max(Duration::ZERO))
	}
}
impl Debug for BearerToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BearerToken")
			.field("access_token", &self.access_token)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}
