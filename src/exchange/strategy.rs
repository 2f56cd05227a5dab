//! Classification hooks for token exchange failures.
//!
//! Strategies see only crate-owned data (status, OAuth fields, body preview), so they stay
//! independent of the HTTP stack in use.

// self
use crate::_prelude::*;

/// Hook that classifies failed exchanges and may decorate outgoing requests.
pub trait ExchangeStrategy: Send + Sync {
	/// Decides whether a non-success response is a policy rejection or a transient failure.
	fn classify_exchange_error(&self, ctx: &ExchangeErrorContext) -> ExchangeErrorKind;

	/// Adds or overrides form parameters before the request is sent.
	///
	/// The default implementation leaves the RFC 8693 form untouched.
	fn augment_exchange_request(&self, _form: &mut BTreeMap<String, String>) {}
}

/// Canonical failure categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeErrorKind {
	/// Endpoint refused the request; repeating it cannot succeed.
	Rejected,
	/// Endpoint is temporarily unable to answer.
	Transient,
}

/// Response details handed to [`ExchangeStrategy::classify_exchange_error`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangeErrorContext {
	/// HTTP status code of the failed response.
	pub http_status: u16,
	/// OAuth `error` field.
	pub oauth_error: Option<String>,
	/// OAuth `error_description` field.
	pub error_description: Option<String>,
	/// Leading part of the body for non-JSON payloads.
	pub body_preview: Option<String>,
}
impl ExchangeErrorContext {
	const BODY_PREVIEW_LIMIT: usize = 256;

	/// Creates a context for a response with `http_status`.
	pub fn new(http_status: u16) -> Self {
		Self { http_status, oauth_error: None, error_description: None, body_preview: None }
	}

	/// Adds the OAuth `error` code.
	pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
		self.oauth_error = Some(error.into());

		self
	}

	/// Adds the OAuth `error_description`.
	pub fn with_error_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}

	/// Adds a truncated body preview.
	pub fn with_body_preview(mut self, body: &str) -> Self {
		let preview = body.trim();

		if !preview.is_empty() {
			self.body_preview = Some(match preview.char_indices().nth(Self::BODY_PREVIEW_LIMIT) {
				Some((cut, _)) => format!("{}…", &preview[..cut]),
				None => preview.to_owned(),
			});
		}

		self
	}

	/// Most specific human-readable description available.
	pub fn summary(&self) -> String {
		self.error_description
			.clone()
			.or_else(|| self.oauth_error.clone())
			.or_else(|| self.body_preview.clone())
			.unwrap_or_else(|| format!("HTTP {}", self.http_status))
	}
}

/// Status-driven classification: every 4xx is a rejection, everything else is transient.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultExchangeStrategy;
impl ExchangeStrategy for DefaultExchangeStrategy {
	fn classify_exchange_error(&self, ctx: &ExchangeErrorContext) -> ExchangeErrorKind {
		match ctx.http_status {
			400..=499 => ExchangeErrorKind::Rejected,
			_ => ExchangeErrorKind::Transient,
		}
	}
}
impl Display for DefaultExchangeStrategy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("default-exchange-strategy")
	}
}
