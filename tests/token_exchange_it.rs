#![cfg(feature = "reqwest")]

// crates.io
use httpmock::prelude::*;
// self
use cab_downscope::{
	_preludet::*,
	auth::BearerToken,
	error::ExchangeError,
	exchange::{GRANT_TYPE_TOKEN_EXCHANGE, RetryPolicy, TOKEN_TYPE_ACCESS_TOKEN},
};

const TOKEN_PATH: &str = "/v1/token";

fn source_token() -> BearerToken {
	BearerToken::new("src-abc")
}

#[tokio::test]
async fn exchange_posts_the_token_exchange_form() {
	let server = MockServer::start_async().await;
	let boundary = bucket_prefix_boundary("b1", "prefix/");
	let options = boundary.to_json();
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path(TOKEN_PATH)
				.header("content-type", "application/x-www-form-urlencoded")
				.form_urlencoded_tuple("grant_type", GRANT_TYPE_TOKEN_EXCHANGE)
				.form_urlencoded_tuple("subject_token", "src-abc")
				.form_urlencoded_tuple("subject_token_type", TOKEN_TYPE_ACCESS_TOKEN)
				.form_urlencoded_tuple("requested_token_type", TOKEN_TYPE_ACCESS_TOKEN)
				.form_urlencoded_tuple("options", options.as_str());
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"downscoped-xyz\",\"issued_token_type\":\"urn:ietf:params:oauth:token-type:access_token\",\"token_type\":\"Bearer\",\"expires_in\":3600}",
			);
		})
		.await;
	let client = build_reqwest_test_exchange_client(https_endpoint(&server.url(TOKEN_PATH)));
	let before = OffsetDateTime::now_utc();
	let token = client
		.exchange(&source_token(), &boundary)
		.await
		.expect("Exchange against the mock endpoint should succeed.");

	mock.assert_calls_async(1).await;

	assert_eq!(token.access_token().expose(), "downscoped-xyz");

	let expires_at = token.expires_at().expect("Exchanged token should carry an expiry.");

	assert!(expires_at >= before + Duration::seconds(3600));
	assert!(expires_at <= OffsetDateTime::now_utc() + Duration::seconds(3600));
}

#[tokio::test]
async fn rejections_are_not_retried() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path(TOKEN_PATH);
			then.status(400).header("content-type", "application/json").body(
				"{\"error\":\"invalid_request\",\"error_description\":\"The provided access boundary is invalid.\"}",
			);
		})
		.await;
	let client = build_reqwest_test_exchange_client(https_endpoint(&server.url(TOKEN_PATH)));
	let err = client
		.exchange_with_retry(&source_token(), &bucket_prefix_boundary("b1", "prefix/"))
		.await
		.expect_err("A 400 response must be surfaced as a rejection.");

	mock.assert_calls_async(1).await;

	match &err {
		ExchangeError::Rejected { status, oauth_error, message } => {
			assert_eq!(*status, 400);
			assert_eq!(oauth_error.as_deref(), Some("invalid_request"));
			assert!(message.contains("access boundary is invalid"));
		},
		other => panic!("Expected a rejection, got {other:?}."),
	}
	assert!(!err.is_retryable());
}

#[tokio::test]
async fn server_errors_exhaust_the_retry_budget() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path(TOKEN_PATH);
			then.status(503).header("retry-after", "0").body("upstream unavailable");
		})
		.await;
	let client = build_reqwest_test_exchange_client(https_endpoint(&server.url(TOKEN_PATH)));
	let err = client
		.exchange_with_retry(&source_token(), &bucket_prefix_boundary("b1", "prefix/"))
		.await
		.expect_err("Persistent 503 responses must fail after retries.");

	mock.assert_calls_async(3).await;

	assert!(matches!(err, ExchangeError::Unavailable { status: Some(503), .. }));
	assert!(err.is_retryable());
	assert!(err.to_string().contains("upstream unavailable"));
}

#[tokio::test]
async fn single_attempt_policy_sends_one_request() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path(TOKEN_PATH);
			then.status(500);
		})
		.await;
	let client = build_reqwest_test_exchange_client(https_endpoint(&server.url(TOKEN_PATH)))
		.with_retry_policy(RetryPolicy::no_retry());
	let err = client
		.exchange_with_retry(&source_token(), &bucket_prefix_boundary("b1", "prefix/"))
		.await
		.expect_err("A 500 response must fail.");

	mock.assert_calls_async(1).await;

	assert_eq!(err.status(), Some(500));
}

#[tokio::test]
async fn missing_expiry_yields_an_uncacheable_token() {
	let server = MockServer::start_async().await;
	let _mock = server
		.mock_async(|when, then| {
			when.method(POST).path(TOKEN_PATH);
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"access_token\":\"downscoped-xyz\",\"token_type\":\"Bearer\"}");
		})
		.await;
	let client = build_reqwest_test_exchange_client(https_endpoint(&server.url(TOKEN_PATH)));
	let token = client
		.exchange(&source_token(), &bucket_prefix_boundary("b1", "prefix/"))
		.await
		.expect("Responses without expires_in should still yield a token.");

	assert_eq!(token.access_token().expose(), "downscoped-xyz");
	assert_eq!(token.expires_at(), None);
	assert!(!token.is_cacheable());
}

#[tokio::test]
async fn malformed_success_bodies_are_retryable_parse_failures() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path(TOKEN_PATH);
			then.status(200).header("content-type", "application/json").body("{\"token\":1}");
		})
		.await;
	let client = build_reqwest_test_exchange_client(https_endpoint(&server.url(TOKEN_PATH)));
	let err = client
		.exchange_with_retry(&source_token(), &bucket_prefix_boundary("b1", "prefix/"))
		.await
		.expect_err("A body without access_token must fail to parse.");

	mock.assert_calls_async(3).await;

	assert!(matches!(err, ExchangeError::ResponseParse { status: 200, .. }));
}
