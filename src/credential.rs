//! Downscoped credentials: a cached, self-refreshing token restricted to one boundary.
//!
//! A [`DownscopedCredential`] moves through four states:
//!
//! - `Uninitialized`: no exchange has completed yet.
//! - `Valid`: a cached token is outside the safety margin and is served without network traffic.
//! - `Expired`: the cached token is inside the margin, was never cacheable, or the last refresh
//!   failed transiently. The next call re-exchanges. A token without an expiry is still handed
//!   to every caller that was already waiting on the refresh that produced it.
//! - `Failed`: the exchange endpoint rejected the request. The credential stays failed and every
//!   call replays the original rejection without touching the network.
//!
//! At most one refresh runs per credential. Callers that queued behind it take whatever outcome
//! it landed instead of exchanging again. State is replaced in one assignment after the refresh
//! completes, so dropping an in-flight call leaves the previous state untouched.

mod metrics;

pub use metrics::RefreshMetrics;

// self
use crate::{
	_prelude::*,
	auth::{BearerToken, CredentialAccessBoundary},
	error::{RefreshCause, RefreshError},
	exchange::TokenExchangeClient,
	http::{TokenHttpClient, TransportErrorMapper},
	obs::{self, OpKind, OpOutcome, OpSpan},
	source::SourceCredentialProvider,
};
#[cfg(feature = "reqwest")]
use crate::{
	error::ConfigError,
	exchange::StsDescriptor,
	http::{ReqwestHttpClient, ReqwestTransportErrorMapper},
};

/// Downscoped credential backed by the default reqwest transport.
#[cfg(feature = "reqwest")]
pub type ReqwestDownscopedCredential =
	DownscopedCredential<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Observable lifecycle state of a [`DownscopedCredential`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
	/// No exchange has completed yet.
	Uninitialized,
	/// Cached token can be served.
	Valid,
	/// Next call re-exchanges.
	Expired,
	/// Permanently rejected.
	Failed,
}

/// Restricted credential derived from a source credential and an immutable boundary.
pub struct DownscopedCredential<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	source: Arc<dyn SourceCredentialProvider>,
	boundary: CredentialAccessBoundary,
	exchange: TokenExchangeClient<C, M>,
	safety_margin: Duration,
	inner: RwLock<CredentialInner>,
	refresh_guard: AsyncMutex<()>,
	metrics: Arc<RefreshMetrics>,
}
impl<C, M> DownscopedCredential<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Tokens are refreshed once fewer than 60 seconds of lifetime remain.
	pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::seconds(60);

	/// Creates a credential that exchanges through `exchange`.
	pub fn with_exchange_client(
		source: Arc<dyn SourceCredentialProvider>,
		boundary: CredentialAccessBoundary,
		exchange: TokenExchangeClient<C, M>,
	) -> Self {
		Self {
			source,
			boundary,
			exchange,
			safety_margin: Self::DEFAULT_SAFETY_MARGIN,
			inner: RwLock::new(CredentialInner::default()),
			refresh_guard: AsyncMutex::new(()),
			metrics: Default::default(),
		}
	}

	/// Overrides the refresh safety margin. Negative values are treated as zero.
	pub fn with_safety_margin(mut self, margin: Duration) -> Self {
		self.safety_margin = margin.max(Duration::ZERO);

		self
	}

	/// The boundary every exchange carries. It cannot be changed after construction.
	pub fn boundary(&self) -> &CredentialAccessBoundary {
		&self.boundary
	}

	/// The exchange client in use.
	pub fn exchange_client(&self) -> &TokenExchangeClient<C, M> {
		&self.exchange
	}

	/// Active safety margin.
	pub fn safety_margin(&self) -> Duration {
		self.safety_margin
	}

	/// Per-credential counters.
	pub fn metrics(&self) -> Arc<RefreshMetrics> {
		Arc::clone(&self.metrics)
	}

	/// Current lifecycle state. A cached token that has drifted into the safety margin reports
	/// [`CredentialState::Expired`].
	pub fn state(&self) -> CredentialState {
		self.inner.read().slot.state(OffsetDateTime::now_utc(), self.safety_margin)
	}

	/// Error from the most recent refresh, if it failed.
	pub fn last_error(&self) -> Option<RefreshError> {
		match &self.inner.read().slot {
			Slot::Expired(err) | Slot::Failed(err) => Some(err.clone()),
			Slot::Uninitialized | Slot::Valid(_) | Slot::Spent(_) => None,
		}
	}

	/// Returns a valid downscoped token, exchanging only when the cache cannot answer.
	pub async fn access_token(&self) -> Result<BearerToken, RefreshError> {
		let span = OpSpan::new(OpKind::Refresh, "access_token");

		span.instrument(self.obtain(false)).await
	}

	/// Forces a re-exchange even when the cached token is still valid.
	pub async fn refresh(&self) -> Result<BearerToken, RefreshError> {
		let span = OpSpan::new(OpKind::Refresh, "refresh");

		span.instrument(self.obtain(true)).await
	}

	async fn obtain(&self, force: bool) -> Result<BearerToken, RefreshError> {
		let observed_epoch = match self.lookup(force, OffsetDateTime::now_utc()) {
			Lookup::Hit(token) => {
				self.metrics.record_cache_hit();
				obs::record_op_outcome(OpKind::Refresh, OpOutcome::CacheHit);

				return Ok(token);
			},
			Lookup::Failed(err) => {
				self.metrics.record_failure();
				obs::record_op_outcome(OpKind::Refresh, OpOutcome::Rejected);

				return Err(err);
			},
			Lookup::Miss { epoch } => epoch,
		};
		let _singleflight = self.refresh_guard.lock().await;

		if let Some(landed) = self.landed_since(observed_epoch) {
			return landed;
		}

		self.metrics.record_attempt();
		obs::record_op_outcome(OpKind::Refresh, OpOutcome::Attempt);

		let outcome = self.exchange_fresh().await;

		self.inner.write().land(&outcome);

		match &outcome {
			Ok(_) => {
				self.metrics.record_success();
				obs::record_op_outcome(OpKind::Refresh, OpOutcome::Success);
				obs::log_success(OpKind::Refresh, Some(self.boundary.fingerprint()));
			},
			Err(err) => {
				self.metrics.record_failure();
				obs::record_op_outcome(OpKind::Refresh, OpOutcome::from_retryable(err.retryable));
				obs::log_failure(OpKind::Refresh, 1, err.retryable, err);
			},
		}

		outcome
	}

	fn lookup(&self, force: bool, now: OffsetDateTime) -> Lookup {
		let inner = self.inner.read();

		match &inner.slot {
			Slot::Failed(err) => Lookup::Failed(err.clone()),
			Slot::Valid(token) if !force && token.is_fresh_at(now, self.safety_margin) =>
				Lookup::Hit(token.clone()),
			_ => Lookup::Miss { epoch: inner.epoch },
		}
	}

	/// Outcome of a refresh that completed while this caller waited for the guard.
	fn landed_since(&self, observed_epoch: u64) -> Option<Result<BearerToken, RefreshError>> {
		let inner = self.inner.read();

		if inner.epoch == observed_epoch {
			return None;
		}

		match &inner.slot {
			Slot::Valid(token) | Slot::Spent(token) => Some(Ok(token.clone())),
			Slot::Failed(err) | Slot::Expired(err) => Some(Err(err.clone())),
			Slot::Uninitialized => None,
		}
	}

	async fn exchange_fresh(&self) -> Result<BearerToken, RefreshError> {
		let source = self.source.bearer_token().await.map_err(|err| {
			let retryable = err.is_retryable();

			RefreshError::new(RefreshCause::Source(Arc::new(err)), retryable)
		})?;

		self.exchange.exchange_with_retry(&source, &self.boundary).await.map_err(|err| {
			let retryable = err.is_retryable();

			RefreshError::new(RefreshCause::Exchange(Arc::new(err)), retryable)
		})
	}
}
#[cfg(feature = "reqwest")]
impl DownscopedCredential<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a credential against the production STS endpoint with default retries.
	pub fn new(
		source: Arc<dyn SourceCredentialProvider>,
		boundary: CredentialAccessBoundary,
	) -> Result<Self, ConfigError> {
		let exchange = TokenExchangeClient::new(StsDescriptor::google()?)?;

		Ok(Self::with_exchange_client(source, boundary, exchange))
	}
}
impl<C, M> Debug for DownscopedCredential<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("DownscopedCredential")
			.field("boundary", &self.boundary.fingerprint())
			.field("state", &self.state())
			.field("safety_margin", &self.safety_margin)
			.finish_non_exhaustive()
	}
}

#[derive(Debug, Default)]
struct CredentialInner {
	slot: Slot,
	/// Bumped every time a refresh lands.
	epoch: u64,
}
impl CredentialInner {
	fn land(&mut self, outcome: &Result<BearerToken, RefreshError>) {
		self.epoch = self.epoch.wrapping_add(1);
		self.slot = match outcome {
			Ok(token) if token.is_cacheable() => Slot::Valid(token.clone()),
			Ok(token) => Slot::Spent(token.clone()),
			Err(err) if err.is_permanent() => Slot::Failed(err.clone()),
			Err(err) => Slot::Expired(err.clone()),
		};
	}
}

#[derive(Debug, Default)]
enum Slot {
	#[default]
	Uninitialized,
	Valid(BearerToken),
	/// Uncacheable token; only callers queued behind its refresh may take it.
	Spent(BearerToken),
	/// Transient failure; the next call re-exchanges.
	Expired(RefreshError),
	Failed(RefreshError),
}
impl Slot {
	fn state(&self, now: OffsetDateTime, margin: Duration) -> CredentialState {
		match self {
			Slot::Uninitialized => CredentialState::Uninitialized,
			Slot::Valid(token) if token.is_fresh_at(now, margin) => CredentialState::Valid,
			Slot::Valid(_) | Slot::Spent(_) | Slot::Expired(_) => CredentialState::Expired,
			Slot::Failed(_) => CredentialState::Failed,
		}
	}
}

enum Lookup {
	Hit(BearerToken),
	Failed(RefreshError),
	Miss { epoch: u64 },
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// crates.io
	use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
	// self
	use super::*;
	use crate::{
		auth::{AccessBoundaryRule, CredentialAccessBoundary},
		error::{ExchangeError, TransportError},
		exchange::{RetryPolicy, StsDescriptor},
		http::{ResponseMetadata, ResponseMetadataSlot},
		source::StaticTokenProvider,
	};

	/// Transport whose requests never complete.
	#[derive(Default)]
	struct StalledHttpClient {
		calls: Arc<AtomicUsize>,
	}
	impl TokenHttpClient for StalledHttpClient {
		type Handle = StalledHandle;
		type TransportError = std::io::Error;

		fn with_metadata(&self, _slot: ResponseMetadataSlot) -> Self::Handle {
			StalledHandle { calls: Arc::clone(&self.calls) }
		}
	}

	struct StalledHandle {
		calls: Arc<AtomicUsize>,
	}
	impl<'c> AsyncHttpClient<'c> for StalledHandle {
		type Error = HttpClientError<std::io::Error>;
		type Future = Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send>>;

		fn call(&'c self, _request: HttpRequest) -> Self::Future {
			self.calls.fetch_add(1, Ordering::SeqCst);

			Box::pin(std::future::pending())
		}
	}

	struct IoMapper;
	impl TransportErrorMapper<std::io::Error> for IoMapper {
		fn map_transport_error(
			&self,
			_metadata: Option<&ResponseMetadata>,
			error: HttpClientError<std::io::Error>,
		) -> TransportError {
			match error {
				HttpClientError::Io(err) => TransportError::Io(err),
				other => TransportError::Other { message: other.to_string() },
			}
		}
	}

	fn stalled_credential() -> (DownscopedCredential<StalledHttpClient, IoMapper>, Arc<AtomicUsize>)
	{
		let http = StalledHttpClient::default();
		let calls = Arc::clone(&http.calls);
		let exchange = TokenExchangeClient::with_http_client(
			StsDescriptor::google().expect("Default descriptor should build."),
			http,
			IoMapper,
		)
		.with_retry_policy(RetryPolicy::no_retry());
		let rule = AccessBoundaryRule::new(
			"//storage.googleapis.com/projects/_/buckets/b1",
			["inRole:roles/storage.objectViewer"],
			None,
		)
		.expect("Rule fixture should be valid.");
		let boundary = CredentialAccessBoundary::new([rule]).expect("Boundary should be valid.");
		let source: Arc<dyn SourceCredentialProvider> =
			Arc::new(StaticTokenProvider::from_access_token("src-abc"));

		(DownscopedCredential::with_exchange_client(source, boundary, exchange), calls)
	}

	fn rejection() -> RefreshError {
		RefreshError::new(
			RefreshCause::Exchange(Arc::new(ExchangeError::Rejected {
				status: 400,
				oauth_error: Some("invalid_request".into()),
				message: "invalid_request".into(),
			})),
			false,
		)
	}

	#[tokio::test]
	async fn cancelled_refresh_leaves_state_untouched() {
		let (credential, calls) = stalled_credential();
		let attempt = tokio::time::timeout(
			std::time::Duration::from_millis(50),
			credential.access_token(),
		)
		.await;

		assert!(attempt.is_err());
		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert_eq!(credential.state(), CredentialState::Uninitialized);
		assert!(credential.last_error().is_none());
		assert_eq!(credential.inner.read().epoch, 0);

		// The guard is released on drop, so a second caller is not blocked forever.
		let retry = tokio::time::timeout(
			std::time::Duration::from_millis(50),
			credential.access_token(),
		)
		.await;

		assert!(retry.is_err());
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}

	#[test]
	fn landing_outcomes_drive_the_state_machine() {
		let now = OffsetDateTime::now_utc();
		let margin = Duration::seconds(60);
		let mut inner = CredentialInner::default();

		assert_eq!(inner.slot.state(now, margin), CredentialState::Uninitialized);

		inner.land(&Ok(BearerToken::new("t").with_expires_at(now + Duration::hours(1))));

		assert_eq!(inner.slot.state(now, margin), CredentialState::Valid);
		assert_eq!(
			inner.slot.state(now + Duration::minutes(59) + Duration::seconds(1), margin),
			CredentialState::Expired
		);

		inner.land(&Ok(BearerToken::new("no-expiry")));

		assert_eq!(inner.slot.state(now, margin), CredentialState::Expired);
		assert!(matches!(
			&inner.slot,
			Slot::Spent(token) if token.access_token().expose() == "no-expiry"
		));

		let transient = RefreshError::new(
			RefreshCause::Exchange(Arc::new(ExchangeError::Unavailable {
				status: Some(503),
				retry_after: None,
				message: "HTTP 503".into(),
			})),
			true,
		);

		inner.land(&Err(transient));

		assert_eq!(inner.slot.state(now, margin), CredentialState::Expired);

		inner.land(&Err(rejection()));

		assert_eq!(inner.slot.state(now, margin), CredentialState::Failed);
		assert_eq!(inner.epoch, 4);
	}

	#[test]
	fn oversized_safety_margins_report_expired() {
		let (credential, _) = stalled_credential();
		let credential = credential.with_safety_margin(Duration::MAX);
		let now = OffsetDateTime::now_utc();

		let token = BearerToken::new("t").with_expires_at(now + Duration::hours(1));

		credential.inner.write().land(&Ok(token));

		assert_eq!(credential.state(), CredentialState::Expired);
		assert!(matches!(credential.lookup(false, now), Lookup::Miss { epoch: 1 }));
	}

	#[test]
	fn non_retryable_source_failures_do_not_lock_the_credential() {
		let mut inner = CredentialInner::default();
		let source_failure = RefreshError::new(
			RefreshCause::Source(Arc::new(crate::error::CredentialError::ScopeError {
				reason: "denied".into(),
			})),
			false,
		);

		inner.land(&Err(source_failure));

		assert_eq!(
			inner.slot.state(OffsetDateTime::now_utc(), Duration::ZERO),
			CredentialState::Expired
		);
	}

	#[tokio::test]
	async fn failed_credentials_fail_fast_without_network() {
		let (credential, calls) = stalled_credential();

		credential.inner.write().land(&Err(rejection()));

		for _ in 0..3 {
			let err = credential.access_token().await.expect_err("Failed credentials must refuse.");

			assert!(!err.retryable);
		}

		assert!(credential.refresh().await.is_err());
		assert_eq!(calls.load(Ordering::SeqCst), 0);
		assert_eq!(credential.metrics().failures(), 4);
		assert_eq!(credential.metrics().attempts(), 0);
	}
}
