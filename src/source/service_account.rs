//! Service-account source credentials minted with the RFC 7523 JWT-bearer grant.

// std
use std::path::{Path, PathBuf};
// crates.io
use jsonwebtoken::{Algorithm, EncodingKey, Header};
// self
use crate::{
	_prelude::*,
	auth::{BearerToken, ScopeSet, TokenSecret},
	error::{CredentialError, TransportError},
	http::{self, TokenHttpClient, TransportErrorMapper},
	obs::{self, OpKind, OpOutcome, OpSpan},
	source::{SourceCredentialProvider, SourceFuture},
};
#[cfg(feature = "reqwest")]
use crate::{
	error::ConfigError,
	http::{ReqwestHttpClient, ReqwestTransportErrorMapper},
};

/// Scope requested when a key is used without explicit scopes.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
/// `grant_type` of the RFC 7523 JWT-bearer grant.
pub const GRANT_TYPE_JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Provider backed by the default reqwest transport.
#[cfg(feature = "reqwest")]
pub type ReqwestServiceAccountProvider =
	ServiceAccountProvider<ReqwestHttpClient, ReqwestTransportErrorMapper>;

const SERVICE_ACCOUNT_TYPE: &str = "service_account";
const ASSERTION_LIFETIME: Duration = Duration::hours(1);
const CACHE_SAFETY_MARGIN: Duration = Duration::seconds(60);

/// Parsed and validated service-account key.
#[derive(Clone)]
pub struct ServiceAccountKey {
	client_email: String,
	private_key_id: String,
	token_uri: Url,
	project_id: Option<String>,
	client_id: Option<String>,
	universe_domain: Option<String>,
	signing_key: EncodingKey,
}
impl ServiceAccountKey {
	/// Loads a key file from disk.
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
		let path = path.as_ref();
		let json = std::fs::read_to_string(path).map_err(|e| {
			CredentialError::invalid_file(Some(path.to_owned()), format!("unreadable: {e}"))
		})?;

		Self::parse(&json, Some(path.to_owned()))
	}

	/// Parses a key from its JSON text.
	pub fn from_json(json: &str) -> Result<Self, CredentialError> {
		Self::parse(json, None)
	}

	/// Service account identity, used as the assertion issuer.
	pub fn client_email(&self) -> &str {
		&self.client_email
	}

	/// Identifier of the signing key, sent as the JWT `kid`.
	pub fn private_key_id(&self) -> &str {
		&self.private_key_id
	}

	/// Identity provider token endpoint and assertion audience.
	pub fn token_uri(&self) -> &Url {
		&self.token_uri
	}

	/// Owning project, when present in the key file.
	pub fn project_id(&self) -> Option<&str> {
		self.project_id.as_deref()
	}

	/// Numeric client identifier, when present in the key file.
	pub fn client_id(&self) -> Option<&str> {
		self.client_id.as_deref()
	}

	/// Universe domain, when present in the key file.
	pub fn universe_domain(&self) -> Option<&str> {
		self.universe_domain.as_deref()
	}

	fn parse(json: &str, path: Option<PathBuf>) -> Result<Self, CredentialError> {
		let mut de = serde_json::Deserializer::from_str(json);
		let raw: ServiceAccountKeyFile = serde_path_to_error::deserialize(&mut de)
			.map_err(|e| CredentialError::invalid_file(path.clone(), e.to_string()))?;
		let invalid = |reason: &str| CredentialError::invalid_file(path.clone(), reason);

		if raw.key_type != SERVICE_ACCOUNT_TYPE {
			return Err(invalid("type must be `service_account`"));
		}
		if raw.client_email.trim().is_empty() {
			return Err(invalid("client_email is empty"));
		}
		if raw.private_key_id.trim().is_empty() {
			return Err(invalid("private_key_id is empty"));
		}
		if raw.token_uri.scheme() != "https" {
			return Err(invalid("token_uri must use HTTPS"));
		}

		let signing_key = EncodingKey::from_rsa_pem(raw.private_key.expose().as_bytes())
			.map_err(|_| invalid("private_key is not a PEM-encoded RSA key"))?;

		Ok(Self {
			client_email: raw.client_email,
			private_key_id: raw.private_key_id,
			token_uri: raw.token_uri,
			project_id: raw.project_id,
			client_id: raw.client_id,
			universe_domain: raw.universe_domain,
			signing_key,
		})
	}
}
impl Debug for ServiceAccountKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ServiceAccountKey")
			.field("client_email", &self.client_email)
			.field("private_key_id", &self.private_key_id)
			.field("token_uri", &self.token_uri.as_str())
			.field("project_id", &self.project_id)
			.field("private_key", &"<redacted>")
			.finish_non_exhaustive()
	}
}

/// Source provider that signs JWT assertions with a service-account key and trades them for
/// access tokens. Tokens are cached until 60 seconds before expiry; concurrent callers share
/// one in-flight mint.
pub struct ServiceAccountProvider<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	key: ServiceAccountKey,
	scopes: ScopeSet,
	default_scopes: Option<ScopeSet>,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
	cached: RwLock<Option<BearerToken>>,
	mint_guard: AsyncMutex<()>,
}
impl<C, M> ServiceAccountProvider<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a provider over a caller-supplied transport and error mapper.
	pub fn with_http_client(
		key: ServiceAccountKey,
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			key,
			scopes: ScopeSet::default(),
			default_scopes: None,
			http_client: http_client.into(),
			error_mapper: error_mapper.into(),
			cached: RwLock::new(None),
			mint_guard: AsyncMutex::new(()),
		}
	}

	/// Requests exactly `scopes`. An empty set falls back to the default scope.
	pub fn with_scopes(mut self, scopes: ScopeSet) -> Self {
		self.scopes = scopes;

		self
	}

	/// Replaces [`CLOUD_PLATFORM_SCOPE`] as the fallback for unscoped keys.
	pub fn with_default_scopes(mut self, scopes: ScopeSet) -> Self {
		self.default_scopes = Some(scopes);

		self
	}

	/// The loaded key.
	pub fn key(&self) -> &ServiceAccountKey {
		&self.key
	}

	/// Scopes that will be requested: the configured set, or the default when none are set.
	pub fn ensure_scoped(&self) -> Result<ScopeSet, CredentialError> {
		if !self.scopes.is_empty() {
			return Ok(self.scopes.clone());
		}

		match &self.default_scopes {
			Some(scopes) if !scopes.is_empty() => Ok(scopes.clone()),
			_ => Ok(ScopeSet::new([CLOUD_PLATFORM_SCOPE])?),
		}
	}

	async fn fetch(&self) -> Result<BearerToken, CredentialError> {
		if let Some(token) = self.fresh_cached(OffsetDateTime::now_utc()) {
			obs::record_op_outcome(OpKind::SourceToken, OpOutcome::CacheHit);

			return Ok(token);
		}

		let _guard = self.mint_guard.lock().await;

		if let Some(token) = self.fresh_cached(OffsetDateTime::now_utc()) {
			obs::record_op_outcome(OpKind::SourceToken, OpOutcome::CacheHit);

			return Ok(token);
		}

		obs::record_op_outcome(OpKind::SourceToken, OpOutcome::Attempt);

		match self.mint().await {
			Ok(token) => {
				*self.cached.write() = token.is_cacheable().then(|| token.clone());

				obs::record_op_outcome(OpKind::SourceToken, OpOutcome::Success);
				obs::log_success(OpKind::SourceToken, None);

				Ok(token)
			},
			Err(err) => {
				let retryable = err.is_retryable();

				obs::record_op_outcome(OpKind::SourceToken, OpOutcome::from_retryable(retryable));
				obs::log_failure(OpKind::SourceToken, 1, retryable, &err);

				Err(err)
			},
		}
	}

	fn fresh_cached(&self, now: OffsetDateTime) -> Option<BearerToken> {
		let cached = self.cached.read();

		cached.as_ref().filter(|token| token.is_fresh_at(now, CACHE_SAFETY_MARGIN)).cloned()
	}

	async fn mint(&self) -> Result<BearerToken, CredentialError> {
		let issued_at = OffsetDateTime::now_utc();
		let assertion = self.sign_assertion(issued_at)?;
		let request = http::form_request(&self.key.token_uri, &[
			("grant_type", GRANT_TYPE_JWT_BEARER),
			("assertion", assertion.expose()),
		])
		.map_err(TransportError::from)?;
		let response =
			http::send(self.http_client.as_ref(), self.error_mapper.as_ref(), request).await?;
		let status = response.status().as_u16();

		if response.status().is_success() {
			parse_token_response(status, response.body(), issued_at)
		} else {
			Err(classify_token_error(status, response.body()))
		}
	}

	fn sign_assertion(&self, issued_at: OffsetDateTime) -> Result<TokenSecret, CredentialError> {
		let scopes = self.ensure_scoped()?;
		let claims = AssertionClaims {
			iss: &self.key.client_email,
			scope: scopes.normalized(),
			aud: self.key.token_uri.as_str(),
			iat: issued_at.unix_timestamp(),
			exp: (issued_at + ASSERTION_LIFETIME).unix_timestamp(),
		};
		let header = Header {
			kid: Some(self.key.private_key_id.clone()),
			..Header::new(Algorithm::RS256)
		};

		let assertion =
			jsonwebtoken::encode(&header, &claims, &self.key.signing_key).map_err(|e| {
				CredentialError::invalid_file(None, format!("assertion signing failed: {e}"))
			})?;

		Ok(TokenSecret::from(assertion))
	}
}
#[cfg(feature = "reqwest")]
impl ServiceAccountProvider<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a provider over a fresh reqwest transport.
	pub fn new(key: ServiceAccountKey) -> Result<Self, ConfigError> {
		Ok(Self::with_http_client(key, ReqwestHttpClient::new()?, ReqwestTransportErrorMapper))
	}
}
impl<C, M> SourceCredentialProvider for ServiceAccountProvider<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn bearer_token(&self) -> SourceFuture<'_, BearerToken> {
		let span = OpSpan::new(OpKind::SourceToken, "service_account");

		Box::pin(span.instrument(self.fetch()))
	}
}
impl<C, M> Debug for ServiceAccountProvider<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ServiceAccountProvider")
			.field("key", &self.key)
			.field("scopes", &self.scopes)
			.finish_non_exhaustive()
	}
}

#[derive(Deserialize)]
struct ServiceAccountKeyFile {
	#[serde(rename = "type")]
	key_type: String,
	client_email: String,
	private_key: KeyMaterial,
	private_key_id: String,
	token_uri: Url,
	#[serde(default)]
	project_id: Option<String>,
	#[serde(default)]
	client_id: Option<String>,
	#[serde(default)]
	universe_domain: Option<String>,
}

#[derive(Deserialize)]
#[serde(from = "String")]
struct KeyMaterial(TokenSecret);
impl KeyMaterial {
	fn expose(&self) -> &str {
		self.0.expose()
	}
}
impl From<String> for KeyMaterial {
	fn from(value: String) -> Self {
		Self(TokenSecret::new(value))
	}
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
	iss: &'a str,
	scope: String,
	aud: &'a str,
	iat: i64,
	exp: i64,
}

#[derive(Deserialize)]
struct IdpTokenResponse {
	access_token: String,
	#[serde(default)]
	expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct IdpErrorBody {
	#[serde(default)]
	error: Option<String>,
	#[serde(default)]
	error_description: Option<String>,
}

fn parse_token_response(
	status: u16,
	body: &[u8],
	issued_at: OffsetDateTime,
) -> Result<BearerToken, CredentialError> {
	let mut de = serde_json::Deserializer::from_slice(body);
	let parsed: IdpTokenResponse =
		serde_path_to_error::deserialize(&mut de).map_err(|e| CredentialError::TokenEndpoint {
			message: format!("malformed token response: {e}"),
			status: Some(status),
			retryable: true,
		})?;

	if parsed.access_token.is_empty() {
		return Err(CredentialError::TokenEndpoint {
			message: "token response carried an empty access_token".into(),
			status: Some(status),
			retryable: true,
		});
	}

	let token = BearerToken::new(parsed.access_token);

	Ok(match parsed.expires_in.filter(|secs| *secs > 0) {
		Some(secs) => match issued_at.checked_add(Duration::seconds(secs)) {
			Some(expires_at) => token.with_expires_at(expires_at),
			None => token,
		},
		None => token,
	})
}

fn classify_token_error(status: u16, body: &[u8]) -> CredentialError {
	let parsed = serde_json::from_slice::<IdpErrorBody>(body).ok();
	let error = parsed.as_ref().and_then(|body| body.error.clone());
	let description = parsed.and_then(|body| body.error_description);

	if error.as_deref() == Some("invalid_scope") {
		return CredentialError::ScopeError {
			reason: description.unwrap_or_else(|| "invalid_scope".into()),
		};
	}

	CredentialError::TokenEndpoint {
		message: description.or(error).unwrap_or_else(|| format!("HTTP {status}")),
		status: Some(status),
		retryable: !(400..500).contains(&status),
	}
}
