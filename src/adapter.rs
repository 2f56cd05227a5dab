//! Consumer-facing token capability.
//!
//! Downstream clients depend only on [`AccessTokenSource`]. Downscoped credentials and plain
//! source providers both implement it, and [`RefreshingCredential`] wraps either one behind a
//! cloneable handle that can sign outbound requests.

// crates.io
use oauth2::http::{HeaderValue, Request, header::AUTHORIZATION};
// self
use crate::{
	_prelude::*,
	auth::BearerToken,
	credential::DownscopedCredential,
	http::{TokenHttpClient, TransportErrorMapper},
	source::SourceCredentialProvider,
};

/// Boxed future returned by [`AccessTokenSource::access_token`].
pub type TokenFuture<'a> = Pin<Box<dyn Future<Output = Result<BearerToken>> + 'a + Send>>;

/// Capability to yield a currently valid bearer token.
pub trait AccessTokenSource: Send + Sync {
	/// Returns a token that is valid right now, refreshing if needed.
	fn access_token(&self) -> TokenFuture<'_>;
}
impl<T> AccessTokenSource for Arc<T>
where
	T: ?Sized + AccessTokenSource,
{
	fn access_token(&self) -> TokenFuture<'_> {
		(**self).access_token()
	}
}
impl<C, M> AccessTokenSource for DownscopedCredential<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn access_token(&self) -> TokenFuture<'_> {
		Box::pin(async move { Ok(DownscopedCredential::access_token(self).await?) })
	}
}

/// Exposes a [`SourceCredentialProvider`] as an [`AccessTokenSource`], for consumers that
/// accept either a downscoped or an unrestricted credential.
pub struct SourceTokenAdapter<P>
where
	P: ?Sized,
{
	provider: Arc<P>,
}
impl<P> SourceTokenAdapter<P>
where
	P: ?Sized + SourceCredentialProvider,
{
	/// Wraps `provider`.
	pub fn new(provider: Arc<P>) -> Self {
		Self { provider }
	}
}
impl<P> AccessTokenSource for SourceTokenAdapter<P>
where
	P: ?Sized + SourceCredentialProvider,
{
	fn access_token(&self) -> TokenFuture<'_> {
		Box::pin(async move { Ok(self.provider.bearer_token().await?) })
	}
}

/// Attaches a bearer token to an outbound request without tying the crate to one HTTP client.
pub trait RequestSigner<Request>
where
	Self: Send + Sync,
{
	/// Returns `request` carrying `token` as its credential.
	fn attach_token(&self, request: Request, token: &BearerToken) -> Result<Request>;
}

/// Signs requests with an `Authorization: Bearer <token>` header.
#[derive(Clone, Copy, Debug, Default)]
pub struct BearerSigner;
impl<B> RequestSigner<Request<B>> for BearerSigner {
	fn attach_token(&self, mut request: Request<B>, token: &BearerToken) -> Result<Request<B>> {
		let mut value = HeaderValue::try_from(token.access_token().bearer_header_value())?;

		value.set_sensitive(true);
		request.headers_mut().insert(AUTHORIZATION, value);

		Ok(request)
	}
}
#[cfg(feature = "reqwest")]
impl RequestSigner<reqwest::RequestBuilder> for BearerSigner {
	fn attach_token(
		&self,
		request: reqwest::RequestBuilder,
		token: &BearerToken,
	) -> Result<reqwest::RequestBuilder> {
		Ok(request.bearer_auth(token.access_token().expose()))
	}
}

/// Cloneable handle over any [`AccessTokenSource`].
#[derive(Clone)]
pub struct RefreshingCredential {
	source: Arc<dyn AccessTokenSource>,
}
impl RefreshingCredential {
	/// Wraps an existing token source.
	pub fn new(source: Arc<dyn AccessTokenSource>) -> Self {
		Self { source }
	}

	/// Wraps a downscoped credential.
	pub fn from_downscoped<C, M>(credential: DownscopedCredential<C, M>) -> Self
	where
		C: ?Sized + TokenHttpClient,
		M: ?Sized + TransportErrorMapper<C::TransportError>,
	{
		Self::new(Arc::new(credential))
	}

	/// Wraps a source provider without downscoping.
	pub fn from_source<P>(provider: Arc<P>) -> Self
	where
		P: 'static + ?Sized + SourceCredentialProvider,
	{
		Self::new(Arc::new(SourceTokenAdapter::new(provider)))
	}

	/// Returns a currently valid token.
	pub async fn access_token(&self) -> Result<BearerToken> {
		self.source.access_token().await
	}

	/// Fetches a valid token and attaches it to `request` through `signer`.
	pub async fn sign<R, S>(&self, request: R, signer: &S) -> Result<R>
	where
		S: ?Sized + RequestSigner<R>,
	{
		let token = self.access_token().await?;

		signer.attach_token(request, &token)
	}

	/// Attaches `Authorization: Bearer <token>` to a reqwest request.
	#[cfg(feature = "reqwest")]
	pub async fn authorize(
		&self,
		request: reqwest::RequestBuilder,
	) -> Result<reqwest::RequestBuilder> {
		self.sign(request, &BearerSigner).await
	}
}
impl Debug for RefreshingCredential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("RefreshingCredential(..)")
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::source::StaticTokenProvider;

	#[tokio::test]
	async fn source_adapter_delegates_to_the_provider() {
		let provider = Arc::new(StaticTokenProvider::from_access_token("src-abc"));
		let credential = RefreshingCredential::from_source(provider);
		let token = credential.access_token().await.expect("Static source should yield a token.");

		assert_eq!(token.access_token().expose(), "src-abc");
	}

	#[tokio::test]
	async fn source_adapter_accepts_trait_objects() {
		let provider: Arc<dyn SourceCredentialProvider> =
			Arc::new(StaticTokenProvider::from_access_token("src-dyn"));
		let adapter = SourceTokenAdapter::new(Arc::clone(&provider));
		let token = adapter.access_token().await.expect("Adapter should delegate to the provider.");

		assert_eq!(token.access_token().expose(), "src-dyn");

		let credential = RefreshingCredential::from_source(provider);

		assert!(credential.access_token().await.is_ok());
	}

	#[tokio::test]
	async fn bearer_signer_sets_a_sensitive_authorization_header() {
		let credential = RefreshingCredential::from_source(Arc::new(
			StaticTokenProvider::from_access_token("downscoped-xyz"),
		));
		let request = Request::builder()
			.uri("https://storage.googleapis.com/storage/v1/b/b1/o")
			.body(())
			.expect("Request fixture should build.");
		let signed =
			credential.sign(request, &BearerSigner).await.expect("Signing should succeed.");
		let header =
			signed.headers().get(AUTHORIZATION).expect("Authorization header should be set.");

		assert_eq!(header, "Bearer downscoped-xyz");
		assert!(header.is_sensitive());
	}

	#[tokio::test]
	async fn tokens_with_control_characters_cannot_be_signed() {
		let credential = RefreshingCredential::from_source(Arc::new(
			StaticTokenProvider::from_access_token("bad\ntoken"),
		));
		let err = credential
			.sign(Request::new(()), &BearerSigner)
			.await
			.expect_err("Header-unsafe tokens must be refused.");

		assert!(matches!(err, Error::InvalidAuthorizationHeader(_)));
	}
}
