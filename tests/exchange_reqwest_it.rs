#![cfg(feature = "reqwest")]

// crates.io
use httpmock::prelude::*;
// self
use appcheck_broker::{
	_preludet::*,
	error::ExchangeError,
	exchange::{ExchangeClient, ExchangeRequest, ReqwestExchangeClient},
	url::Url,
};

fn build_client(server: &MockServer) -> ReqwestExchangeClient {
	test_exchange_client(Url::parse(&server.base_url()).expect("Mock server URL should parse."))
}

#[tokio::test]
async fn attestation_exchange_posts_the_credential_and_parses_the_token() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/v1/apps/app-wire:exchangeAttestationToken")
				.json_body(serde_json::json!({ "attestation_token": "platform-credential" }));
			then.status(200)
				.json_body(serde_json::json!({ "token": "signed-token", "ttl": "3600s" }));
		})
		.await;
	let client = build_client(&server);
	let app = test_app("app-wire");
	let before = OffsetDateTime::now_utc();
	let token = client
		.exchange(ExchangeRequest::Attestation { credential: "platform-credential".into() }, &app)
		.await
		.expect("Well-formed exchange should succeed.");

	mock.assert_async().await;
	assert_eq!(token.token(), "signed-token");
	assert!(token.expires_at() >= before + Duration::hours(1));
	assert!(token.is_valid());
}

#[tokio::test]
async fn debug_exchange_targets_the_debug_endpoint() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/v1/apps/app-debug:exchangeDebugToken")
				.json_body(serde_json::json!({ "debug_token": "debug-uuid" }));
			then.status(200).json_body(serde_json::json!({ "token": "debug-signed", "ttl": "60s" }));
		})
		.await;
	let client = build_client(&server);
	let app = test_app("app-debug");
	let token = client
		.exchange(ExchangeRequest::DebugToken { token: "debug-uuid".into() }, &app)
		.await
		.expect("Debug exchange should succeed.");

	mock.assert_async().await;
	assert_eq!(token.token(), "debug-signed");
}

#[tokio::test]
async fn non_success_statuses_classify_as_status_errors() {
	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.method(POST).path("/v1/apps/app-403:exchangeAttestationToken");
			then.status(403).body("forbidden");
		})
		.await;

	let client = build_client(&server);
	let app = test_app("app-403");
	let err = client
		.exchange(ExchangeRequest::Attestation { credential: "credential".into() }, &app)
		.await
		.expect_err("A 403 response should fail the exchange.");

	assert!(matches!(err, ExchangeError::Status { http_status: 403 }));
}

#[tokio::test]
async fn malformed_bodies_classify_as_parse_errors() {
	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.method(POST).path("/v1/apps/app-parse:exchangeAttestationToken");
			then.status(200).json_body(serde_json::json!({ "token": "signed" }));
		})
		.await;

	let client = build_client(&server);
	let app = test_app("app-parse");
	let err = client
		.exchange(ExchangeRequest::Attestation { credential: "credential".into() }, &app)
		.await
		.expect_err("A body without a TTL should fail to parse.");

	assert!(matches!(err, ExchangeError::Parse { http_status: Some(200), .. }));
}
