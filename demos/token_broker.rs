//! Demonstrates a token broker that loads a service-account key, restricts it to read-only
//! access under one object prefix of a bucket, and hands the downscoped token to a consumer.
//! Both the identity provider and the STS endpoint are served by a local mock.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
// self
use cab_downscope::{
	adapter::RefreshingCredential,
	auth::{AccessBoundaryRule, AvailabilityCondition, CredentialAccessBoundary},
	credential::DownscopedCredential,
	exchange::{ReqwestExchangeClient, StsDescriptor},
	http::{ReqwestHttpClient, ReqwestTransportErrorMapper},
	reqwest::Client,
	source::{ReqwestServiceAccountProvider, ServiceAccountKey},
	url::Url,
};

const BUCKET: &str = "gcs-token";
const OBJECT_PREFIX: &str = "device1/1/2/3/";

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let idp_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"demo-source\",\"token_type\":\"Bearer\",\"expires_in\":3599}",
			);
		})
		.await;
	let sts_mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/v1/token")
				.form_urlencoded_tuple("subject_token", "demo-source");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"demo-downscoped\",\"issued_token_type\":\"urn:ietf:params:oauth:token-type:access_token\",\"token_type\":\"Bearer\",\"expires_in\":3600}",
			);
		})
		.await;
	let http_client = ReqwestHttpClient::with_client(
		Client::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()?,
	);
	let key = ServiceAccountKey::from_json(
		&serde_json::json!({
			"type": "service_account",
			"project_id": "demo-project",
			"private_key_id": "demo-kid",
			"private_key": include_str!("../tests/fixtures/test_service_account.pem"),
			"client_email": "broker@demo-project.iam.gserviceaccount.com",
			"token_uri": server.url("/token"),
		})
		.to_string(),
	)?;
	let source = ReqwestServiceAccountProvider::with_http_client(
		key,
		http_client.clone(),
		ReqwestTransportErrorMapper,
	);
	let condition = AvailabilityCondition::new(format!(
		"resource.name.startsWith('projects/_/buckets/{BUCKET}/objects/{OBJECT_PREFIX}')"
	))?
	.with_title("prefix-only");
	let rule = AccessBoundaryRule::new(
		format!("//storage.googleapis.com/projects/_/buckets/{BUCKET}"),
		["inRole:roles/storage.objectViewer"],
		Some(condition),
	)?;
	let boundary = CredentialAccessBoundary::new([rule])?;
	let descriptor =
		StsDescriptor::builder().token_endpoint(Url::parse(&server.url("/v1/token"))?).build()?;
	let exchange = ReqwestExchangeClient::with_http_client(
		descriptor,
		http_client,
		ReqwestTransportErrorMapper,
	);
	let credential =
		DownscopedCredential::with_exchange_client(Arc::new(source), boundary, exchange);

	println!("Boundary sent to STS: {}.", credential.boundary().to_json());

	let consumer = RefreshingCredential::from_downscoped(credential);
	let token = consumer.access_token().await?;

	println!("Downscoped access token: {}.", token.access_token().expose());

	idp_mock.assert_async().await;
	sts_mock.assert_async().await;

	Ok(())
}
