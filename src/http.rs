//! Transport seam shared by the exchange client and the service-account provider.
//!
//! [`TokenHttpClient`] hands out short-lived [`AsyncHttpClient`] handles that publish the
//! status and Retry-After hint of every response into a [`ResponseMetadataSlot`]. Failures the
//! transport reports are translated into [`TransportError`] by a [`TransportErrorMapper`], so
//! custom stacks plug in without touching retry classification.

pub use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};

// std
#[cfg(feature = "reqwest")] use std::ops::Deref;
// crates.io
use oauth2::http::{
	HeaderMap, Method, Request,
	header::{ACCEPT, CONTENT_TYPE, RETRY_AFTER},
};
use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, error::TransportError};

/// HTTP stack used to reach token endpoints.
///
/// Implementations are shared behind `Arc` across credentials, so they must be
/// `Send + Sync + 'static`, and the futures produced by their handles must be `Send` so
/// refresh futures can move between executor threads.
pub trait TokenHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying transport.
	type TransportError: 'static + Send + Sync + StdError;

	/// [`AsyncHttpClient`] handle bound to one [`ResponseMetadataSlot`].
	type Handle: for<'c> AsyncHttpClient<
			'c,
			Error = HttpClientError<Self::TransportError>,
			Future: 'c + Send,
		>
		+ 'static
		+ Send
		+ Sync;

	/// Builds a handle that records response metadata in `slot`.
	///
	/// Handles call [`ResponseMetadataSlot::take`] before sending so a previous attempt never
	/// leaks into the current one, and [`ResponseMetadataSlot::store`] as soon as a status line
	/// arrives.
	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle;
}

/// Translates transport failures into [`TransportError`].
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts `error` using whatever metadata the handle captured before failing.
	fn map_transport_error(
		&self,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> TransportError;
}

/// Status and retry hint of the most recent response.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadata {
	/// HTTP status code, if a status line was received.
	pub status: Option<u16>,
	/// Retry-After hint expressed as a relative duration.
	pub retry_after: Option<Duration>,
}

/// Thread-safe slot shared between a transport handle and the caller that created it.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Stores metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Removes and returns the captured metadata.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// Default reqwest-backed transport.
///
/// Token endpoints answer directly, so [`ReqwestHttpClient::new`] disables redirect following.
/// Clients supplied through [`ReqwestHttpClient::with_client`] should do the same.
#[cfg(feature = "reqwest")]
#[derive(Clone)]
pub struct ReqwestHttpClient(ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Builds a rustls client that never follows redirects.
	pub fn new() -> Result<Self, crate::error::ConfigError> {
		let client = ReqwestClient::builder().redirect(reqwest::redirect::Policy::none()).build()?;

		Ok(Self(client))
	}

	/// Wraps an existing reqwest client.
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl TokenHttpClient for ReqwestHttpClient {
	type Handle = ReqwestHandle;
	type TransportError = ReqwestError;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		ReqwestHandle(Arc::new((self.0.clone(), slot)))
	}
}

/// [`AsyncHttpClient`] handle returned by [`ReqwestHttpClient`].
#[cfg(feature = "reqwest")]
#[derive(Clone)]
pub struct ReqwestHandle(Arc<(ReqwestClient, ResponseMetadataSlot)>);
#[cfg(feature = "reqwest")]
impl<'c> AsyncHttpClient<'c> for ReqwestHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let inner = Arc::clone(&self.0);

		Box::pin(async move {
			let (client, slot) = &*inner;

			slot.take();

			let response =
				client.execute(request.try_into().map_err(Box::new)?).await.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().to_owned();

			slot.store(ResponseMetadata {
				status: Some(status.as_u16()),
				retry_after: parse_retry_after(&headers),
			});

			let body = response.bytes().await.map_err(Box::new)?;
			let mut converted = HttpResponse::new(body.to_vec());

			*converted.status_mut() = status;
			*converted.headers_mut() = headers;

			Ok(converted)
		})
	}
}

/// Default mapper for [`ReqwestHttpClient`].
#[cfg(feature = "reqwest")]
#[derive(Clone, Copy, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<ReqwestError>,
	) -> TransportError {
		match error {
			HttpClientError::Reqwest(inner) => TransportError::from(*inner),
			HttpClientError::Http(inner) => TransportError::Request(inner),
			HttpClientError::Io(inner) => TransportError::Io(inner),
			HttpClientError::Other(message) => other_with_status(metadata, message),
			_ => other_with_status(metadata, "unrecognized transport failure".into()),
		}
	}
}

/// Parses a Retry-After header given either as delta-seconds or an HTTP date.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u32>() {
		return Some(Duration::seconds(secs.into()));
	}

	let moment = OffsetDateTime::parse(raw, &Rfc2822).ok()?;
	let delta = moment - OffsetDateTime::now_utc();

	delta.is_positive().then_some(delta)
}

/// Builds a form-encoded `POST` to `endpoint`.
pub(crate) fn form_request(
	endpoint: &Url,
	form: &[(&str, &str)],
) -> Result<HttpRequest, oauth2::http::Error> {
	let body = url::form_urlencoded::Serializer::new(String::new()).extend_pairs(form).finish();

	Request::builder()
		.method(Method::POST)
		.uri(endpoint.as_str())
		.header(CONTENT_TYPE, "application/x-www-form-urlencoded")
		.header(ACCEPT, "application/json")
		.body(body.into_bytes())
}

/// Sends `request` through a fresh handle and maps transport failures.
pub(crate) async fn send<C, M>(
	http_client: &C,
	mapper: &M,
	request: HttpRequest,
) -> Result<HttpResponse, TransportError>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let slot = ResponseMetadataSlot::default();
	let handle = http_client.with_metadata(slot.clone());
	let outcome = handle.call(request).await;

	outcome.map_err(|err| mapper.map_transport_error(slot.take().as_ref(), err))
}

#[cfg(feature = "reqwest")]
fn other_with_status(metadata: Option<&ResponseMetadata>, message: String) -> TransportError {
	match metadata.and_then(|meta| meta.status) {
		Some(status) => TransportError::Other { message: format!("{message} (HTTP {status})") },
		None => TransportError::Other { message },
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use oauth2::http::HeaderValue;
	// self
	use super::*;

	#[test]
	fn retry_after_accepts_seconds_and_rejects_past_dates() {
		let mut headers = HeaderMap::new();

		headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));

		assert_eq!(parse_retry_after(&headers), Some(Duration::seconds(7)));

		headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));

		assert_eq!(parse_retry_after(&headers), None);
		assert_eq!(parse_retry_after(&HeaderMap::new()), None);
	}

	#[test]
	fn form_request_encodes_every_pair() {
		let endpoint = Url::parse("https://sts.example.com/v1/token")
			.expect("Endpoint fixture should parse successfully.");
		let request = form_request(&endpoint, &[("options", "{\"a\":1}"), ("k", "v w")])
			.expect("Form request should build successfully.");

		assert_eq!(request.method(), Method::POST);
		assert_eq!(request.uri(), "https://sts.example.com/v1/token");
		assert_eq!(
			request.headers().get(CONTENT_TYPE).map(HeaderValue::as_bytes),
			Some(&b"application/x-www-form-urlencoded"[..])
		);
		assert_eq!(request.body().as_slice(), b"options=%7B%22a%22%3A1%7D&k=v+w");
	}

	#[cfg(feature = "reqwest")]
	#[test]
	fn reqwest_mapper_annotates_opaque_failures_with_status() {
		let meta = ResponseMetadata { status: Some(502), retry_after: None };
		let mapped = ReqwestTransportErrorMapper
			.map_transport_error(Some(&meta), HttpClientError::Other("connection reset".into()));

		assert!(mapped.to_string().contains("connection reset (HTTP 502)"));
		assert!(mapped.is_retryable());
	}
}
