//! Credential Access Boundary downscoping engine: attenuate a broad source credential into a
//! short-lived, policy-bound access token through RFC 8693 token exchange, then hand it to any
//! consumer as a transparently refreshing credential.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod adapter;
pub mod auth;
pub mod credential;
pub mod error;
pub mod exchange;
pub mod http;
pub mod obs;
pub mod source;
#[cfg(feature = "reqwest")]
#[doc(hidden)]
pub mod _preludet {
	//! Convenience re-exports and helpers shared by unit and integration tests.

	pub use crate::_prelude::*;

	// self
	use crate::{
		auth::{AccessBoundaryRule, AvailabilityCondition, CredentialAccessBoundary},
		exchange::{RetryPolicy, StsDescriptor, TokenExchangeClient},
		http::{ReqwestHttpClient, ReqwestTransportErrorMapper},
	};

	/// Exchange client type alias used by reqwest-backed integration tests.
	pub type ReqwestTestExchangeClient =
		TokenExchangeClient<ReqwestHttpClient, ReqwestTransportErrorMapper>;

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Rewrites a mock server URL onto the `https` scheme accepted by the descriptor checks.
	pub fn https_endpoint(raw: &str) -> Url {
		let mut url = Url::parse(raw).expect("Mock endpoint URL should parse successfully.");

		url.set_scheme("https").expect("Mock endpoint URL should accept the https scheme.");

		url
	}

	/// Constructs an exchange client against `endpoint` with zero-delay retries so backoff
	/// paths stay fast under test.
	pub fn build_reqwest_test_exchange_client(endpoint: Url) -> ReqwestTestExchangeClient {
		let descriptor = StsDescriptor::builder()
			.token_endpoint(endpoint)
			.build()
			.expect("Test STS descriptor should build successfully.");

		TokenExchangeClient::with_http_client(
			descriptor,
			test_reqwest_http_client(),
			Arc::new(ReqwestTransportErrorMapper),
		)
		.with_retry_policy(RetryPolicy::immediate(3))
	}

	/// The single-rule bucket boundary used throughout the end-to-end scenarios.
	pub fn bucket_prefix_boundary(bucket: &str, prefix: &str) -> CredentialAccessBoundary {
		let condition = AvailabilityCondition::new(format!(
			"resource.name.startsWith('projects/_/buckets/{bucket}/objects/{prefix}')"
		))
		.expect("Prefix condition fixture should be valid.");
		let rule = AccessBoundaryRule::new(
			format!("//storage.googleapis.com/projects/_/buckets/{bucket}"),
			["inRole:roles/storage.objectViewer"],
			Some(condition),
		)
		.expect("Bucket rule fixture should be valid.");

		CredentialAccessBoundary::new([rule]).expect("Bucket boundary fixture should be valid.")
	}
}

mod _prelude {
	pub use std::{
		collections::BTreeMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use oauth2;
#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use {color_eyre as _, httpmock as _};
