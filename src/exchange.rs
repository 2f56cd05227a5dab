//! RFC 8693 token exchange client.
//!
//! [`TokenExchangeClient::exchange`] performs one round trip: it posts the source token and the
//! serialized boundary to the STS endpoint and parses the downscoped token out of the response.
//! [`TokenExchangeClient::exchange_with_retry`] wraps it in the configured [`RetryPolicy`],
//! retrying only failures classified as transient.

pub mod descriptor;
pub mod retry;
pub mod strategy;

pub use descriptor::*;
pub use retry::*;
pub use strategy::*;

// self
use crate::{
	_prelude::*,
	auth::{BearerToken, CredentialAccessBoundary},
	error::ExchangeError,
	http::{self, TokenHttpClient, TransportErrorMapper},
	obs::{self, OpKind, OpOutcome, OpSpan},
};
#[cfg(feature = "reqwest")]
use crate::{
	error::ConfigError,
	http::{ReqwestHttpClient, ReqwestTransportErrorMapper},
};

/// `grant_type` of an RFC 8693 exchange.
pub const GRANT_TYPE_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
/// Token type URN of an OAuth 2.0 access token.
pub const TOKEN_TYPE_ACCESS_TOKEN: &str = "urn:ietf:params:oauth:token-type:access_token";

/// Exchange client backed by the default reqwest transport.
#[cfg(feature = "reqwest")]
pub type ReqwestExchangeClient =
	TokenExchangeClient<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Stateless RFC 8693 client. Cloning shares the transport, mapper, and strategy.
pub struct TokenExchangeClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	descriptor: StsDescriptor,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
	strategy: Arc<dyn ExchangeStrategy>,
	retry_policy: RetryPolicy,
}
impl<C, M> TokenExchangeClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a client over a caller-supplied transport and error mapper.
	pub fn with_http_client(
		descriptor: StsDescriptor,
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			descriptor,
			http_client: http_client.into(),
			error_mapper: error_mapper.into(),
			strategy: Arc::new(DefaultExchangeStrategy),
			retry_policy: RetryPolicy::default(),
		}
	}

	/// Replaces the failure classification strategy.
	pub fn with_strategy(mut self, strategy: Arc<dyn ExchangeStrategy>) -> Self {
		self.strategy = strategy;

		self
	}

	/// Replaces the retry policy used by [`exchange_with_retry`](Self::exchange_with_retry).
	pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
		self.retry_policy = retry_policy;

		self
	}

	/// Endpoint configuration.
	pub fn descriptor(&self) -> &StsDescriptor {
		&self.descriptor
	}

	/// Active retry policy.
	pub fn retry_policy(&self) -> &RetryPolicy {
		&self.retry_policy
	}

	/// Exchanges `source` for a token restricted to `boundary`, in a single attempt.
	pub async fn exchange(
		&self,
		source: &BearerToken,
		boundary: &CredentialAccessBoundary,
	) -> Result<BearerToken, ExchangeError> {
		let span = OpSpan::new(OpKind::Exchange, "exchange");

		span.instrument(async move {
			obs::record_op_outcome(OpKind::Exchange, OpOutcome::Attempt);

			let result = self.exchange_once(source, boundary).await;

			match &result {
				Ok(_) => obs::record_op_outcome(OpKind::Exchange, OpOutcome::Success),
				Err(err) => obs::record_op_outcome(
					OpKind::Exchange,
					OpOutcome::from_retryable(err.is_retryable()),
				),
			}

			result
		})
		.await
	}

	/// Exchanges with bounded retries. Rejections return immediately; transient failures are
	/// retried until the policy's attempt budget is spent, and the last failure is returned.
	pub async fn exchange_with_retry(
		&self,
		source: &BearerToken,
		boundary: &CredentialAccessBoundary,
	) -> Result<BearerToken, ExchangeError> {
		let max_attempts = self.retry_policy.max_attempts();
		let mut attempt = 1;

		loop {
			match self.exchange(source, boundary).await {
				Ok(token) => {
					obs::log_success(OpKind::Exchange, Some(boundary.fingerprint()));

					return Ok(token);
				},
				Err(err) => {
					let retryable = err.is_retryable();

					obs::log_failure(OpKind::Exchange, attempt, retryable, &err);

					if !retryable || attempt >= max_attempts {
						return Err(err);
					}

					let delay = self.retry_policy.delay_for(attempt, err.retry_after());

					if delay.is_positive() {
						tokio::time::sleep(delay.unsigned_abs()).await;
					}

					attempt += 1;
				},
			}
		}
	}

	async fn exchange_once(
		&self,
		source: &BearerToken,
		boundary: &CredentialAccessBoundary,
	) -> Result<BearerToken, ExchangeError> {
		let form = self.build_form(source, boundary);
		let pairs = form.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect::<Vec<_>>();
		let request = http::form_request(&self.descriptor.token_endpoint, &pairs)
			.map_err(crate::error::TransportError::from)?;
		let response =
			http::send(self.http_client.as_ref(), self.error_mapper.as_ref(), request).await?;
		let status = response.status().as_u16();

		if response.status().is_success() {
			return parse_exchange_response(status, response.body(), OffsetDateTime::now_utc());
		}

		let retry_after = http::parse_retry_after(response.headers());

		Err(self.classify_failure(status, retry_after, response.body()))
	}

	fn build_form(
		&self,
		source: &BearerToken,
		boundary: &CredentialAccessBoundary,
	) -> BTreeMap<String, String> {
		let mut form = BTreeMap::from([
			("grant_type".to_owned(), GRANT_TYPE_TOKEN_EXCHANGE.to_owned()),
			("subject_token".to_owned(), source.access_token().expose().to_owned()),
			("subject_token_type".to_owned(), self.descriptor.subject_token_type.clone()),
			("requested_token_type".to_owned(), self.descriptor.requested_token_type.clone()),
			("options".to_owned(), boundary.to_json()),
		]);

		self.strategy.augment_exchange_request(&mut form);

		form
	}

	fn classify_failure(
		&self,
		status: u16,
		retry_after: Option<Duration>,
		body: &[u8],
	) -> ExchangeError {
		let text = String::from_utf8_lossy(body);
		let mut ctx = ExchangeErrorContext::new(status);

		match serde_json::from_slice::<OAuthErrorBody>(body) {
			Ok(parsed) => {
				if let Some(error) = parsed.error {
					ctx = ctx.with_oauth_error(error);
				}
				if let Some(description) = parsed.error_description {
					ctx = ctx.with_error_description(description);
				}
			},
			Err(_) => ctx = ctx.with_body_preview(&text),
		}

		let message = ctx.summary();

		match self.strategy.classify_exchange_error(&ctx) {
			ExchangeErrorKind::Rejected =>
				ExchangeError::Rejected { status, oauth_error: ctx.oauth_error, message },
			ExchangeErrorKind::Transient =>
				ExchangeError::Unavailable { status: Some(status), retry_after, message },
		}
	}
}
#[cfg(feature = "reqwest")]
impl TokenExchangeClient<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a client over a fresh reqwest transport.
	pub fn new(descriptor: StsDescriptor) -> Result<Self, ConfigError> {
		Ok(Self::with_http_client(
			descriptor,
			ReqwestHttpClient::new()?,
			ReqwestTransportErrorMapper,
		))
	}
}
impl<C, M> Clone for TokenExchangeClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self {
			descriptor: self.descriptor.clone(),
			http_client: Arc::clone(&self.http_client),
			error_mapper: Arc::clone(&self.error_mapper),
			strategy: Arc::clone(&self.strategy),
			retry_policy: self.retry_policy,
		}
	}
}
impl<C, M> Debug for TokenExchangeClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenExchangeClient")
			.field("descriptor", &self.descriptor)
			.field("retry_policy", &self.retry_policy)
			.finish_non_exhaustive()
	}
}

#[derive(Deserialize)]
struct ExchangeResponse {
	access_token: String,
	#[serde(default)]
	issued_token_type: Option<String>,
	#[serde(default)]
	expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct OAuthErrorBody {
	#[serde(default)]
	error: Option<String>,
	#[serde(default)]
	error_description: Option<String>,
}

fn parse_exchange_response(
	status: u16,
	body: &[u8],
	issued_at: OffsetDateTime,
) -> Result<BearerToken, ExchangeError> {
	let mut de = serde_json::Deserializer::from_slice(body);
	let parsed: ExchangeResponse = serde_path_to_error::deserialize(&mut de)
		.map_err(|source| ExchangeError::ResponseParse { source, status })?;

	if parsed.access_token.is_empty() {
		return Err(ExchangeError::InvalidResponse { reason: "access_token is empty" });
	}
	if parsed.issued_token_type.as_deref().is_some_and(|kind| kind != TOKEN_TYPE_ACCESS_TOKEN) {
		return Err(ExchangeError::InvalidResponse {
			reason: "issued_token_type is not an access token",
		});
	}

	let token = BearerToken::new(parsed.access_token);
	let Some(expires_in) = parsed.expires_in else {
		return Ok(token);
	};

	if expires_in <= 0 {
		return Err(ExchangeError::InvalidResponse { reason: "expires_in must be positive" });
	}

	let expires_at = issued_at.checked_add(Duration::seconds(expires_in)).ok_or(
		ExchangeError::InvalidResponse { reason: "expires_in exceeds the supported range" },
	)?;

	Ok(token.with_expires_at(expires_at))
}
