#![cfg(feature = "reqwest")]

// std
use std::{sync::Arc, time::Duration as StdDuration};
// crates.io
use httpmock::prelude::*;
use serde_json::json;
use url::Url;
// self
use pot_trust::{
	auth::{Grant, ProductCode, ProviderId},
	cache::{CredentialCache, GRANTS},
	error::Error,
	ext::{GrantSigner, RequestSignerExt},
	flows::{CredentialProfile, CredentialState, MAX_ATTEMPTS, Outbound, TokenManager},
	http::ReqwestHttpClient,
	oauth::{
		ReqwestTransportErrorMapper,
		oauth2::http::{HeaderMap, header::AUTHORIZATION},
	},
	provider::{DefaultProviderStrategy, GrantType, ProviderDescriptor},
};

type Manager = TokenManager<ReqwestHttpClient, ReqwestTransportErrorMapper>;

fn manager(server: &MockServer) -> (Arc<Manager>, Arc<CredentialCache>) {
	let client = reqwest::Client::builder()
		.danger_accept_invalid_certs(true)
		.build()
		.expect("Test client should build.");
	let descriptor =
		ProviderDescriptor::builder(ProviderId::new("mock").expect("Provider id should be valid."))
			.token_endpoint(Url::parse(&server.url("/token")).expect("Token URL should parse."))
			.support_grants([GrantType::Password, GrantType::RefreshToken])
			.build()
			.expect("Descriptor fixture should build.");
	let cache = Arc::new(CredentialCache::default());
	let manager = TokenManager::with_http_client(
		ProductCode::new("acme").expect("Product code should be valid."),
		cache.clone(),
		descriptor,
		Arc::new(DefaultProviderStrategy),
		CredentialProfile::default().with_client("gateway", "s3").with_user("ops", "pw"),
		ReqwestHttpClient::with_client(client),
		Arc::new(ReqwestTransportErrorMapper),
	);

	(Arc::new(manager), cache)
}

#[tokio::test]
async fn concurrent_acquires_share_one_exchange() {
	let server = MockServer::start_async().await;
	let token = server
		.mock_async(|when, then| {
			when.method(POST).path("/token").form_urlencoded_tuple("grant_type", "password");
			then.status(200)
				.delay(StdDuration::from_millis(150))
				.json_body(json!({ "access_token": "shared", "expires_in": 600 }));
		})
		.await;
	let (manager, _) = manager(&server);
	let (a, b, c) = tokio::join!(manager.acquire(), manager.acquire(), manager.acquire());

	for grant in [a, b, c] {
		let grant = grant.expect("Every caller should receive the grant.");

		assert_eq!(grant.token().map(|token| token.expose()), Some("shared"));
	}

	token.assert_calls_async(1).await;
}

#[tokio::test]
async fn concurrent_rejections_refresh_once() {
	let server = MockServer::start_async().await;
	let password = server
		.mock_async(|when, then| {
			when.method(POST).path("/token").form_urlencoded_tuple("grant_type", "password");
			then.status(200).json_body(json!({
				"access_token": "first",
				"refresh_token": "r1",
				"expires_in": 600
			}));
		})
		.await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/token")
				.form_urlencoded_tuple("grant_type", "refresh_token")
				.form_urlencoded_tuple("refresh_token", "r1");
			then.status(200)
				.delay(StdDuration::from_millis(100))
				.json_body(json!({ "access_token": "second", "expires_in": 600 }));
		})
		.await;
	let (manager, cache) = manager(&server);

	manager.acquire().await.expect("Initial grant should be issued.");

	let upstream = |header: String| async move {
		Ok::<_, Error>(if header == "Bearer first" {
			Outbound::Rejected { status: 401, reason: "expired".into() }
		} else {
			Outbound::Done(header)
		})
	};
	let (a, b) = tokio::join!(manager.call(upstream), manager.call(upstream));

	assert_eq!(a.expect("First caller should recover."), "Bearer second");
	assert_eq!(b.expect("Second caller should recover."), "Bearer second");

	password.assert_calls_async(1).await;
	refresh.assert_calls_async(1).await;

	let stored: Grant = cache.get(GRANTS, "acme").expect("Refreshed grant should be cached.");

	assert_eq!(stored.refresh_token.as_ref().map(|token| token.expose()), Some("r1"));
	assert_eq!(stored.attempts, 0);
}

#[tokio::test]
async fn persistent_rejections_end_in_too_many_attempts() {
	let server = MockServer::start_async().await;
	let token = server
		.mock_async(|when, then| {
			when.method(POST).path("/token").form_urlencoded_tuple("grant_type", "password");
			then.status(200).json_body(json!({ "access_token": "never-good" }));
		})
		.await;
	let (manager, _) = manager(&server);
	let rejected = |_: String| async {
		Ok::<Outbound<()>, Error>(Outbound::Rejected { status: 401, reason: "nope".into() })
	};
	let err = manager
		.call(rejected)
		.await
		.expect_err("A provider that keeps rejecting tokens should exhaust attempts.");

	assert!(matches!(err, Error::TooManyAttempts));
	assert_eq!(err.status(), 401);
	// One initial grant plus one re-authentication per recovery.
	token.assert_calls_async(MAX_ATTEMPTS as usize + 1).await;
	assert_eq!(manager.state(), CredentialState::Granted);
}

#[tokio::test]
async fn signed_headers_carry_the_current_grant() {
	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).json_body(json!({ "access_token": "abc", "token_type": "mac" }));
		})
		.await;

	let (manager, _) = manager(&server);
	let grant = manager.acquire().await.expect("Grant should be issued.");
	let headers =
		GrantSigner.attach_token(HeaderMap::new(), &grant).expect("Headers should be signed.");
	let value = headers.get(AUTHORIZATION).expect("Header should be set.");

	assert_eq!(value.to_str().expect("Header should be ASCII."), "mac abc");
	assert!(value.is_sensitive());
}
