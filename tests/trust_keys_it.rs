#![cfg(feature = "reqwest")]

// std
use std::sync::Arc;
// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use httpmock::prelude::*;
use jsonwebtoken::{Algorithm, EncodingKey, crypto};
use serde_json::json;
use url::Url;
// self
use pot_trust::{
	cache::{CredentialCache, TRUST_KEYS},
	http::ReqwestHttpClient,
	signature::{AuthOutcome, RequestContext, SignatureStrategy},
	trust::{TrustKeyLoader, TrustKeyRecord, TrustKeySource, TrustVerifier},
};

const PRIMARY_PUBLIC: &str = include_str!("fixtures/primary-public.pem");
const PRIMARY_PRIVATE: &str = include_str!("fixtures/primary-private.pem");
const SECONDARY_PUBLIC: &str = include_str!("fixtures/secondary-public.pem");

fn loader(cache: Arc<CredentialCache>) -> TrustKeyLoader<ReqwestHttpClient> {
	let client = reqwest::Client::builder()
		.danger_accept_invalid_certs(true)
		.build()
		.expect("Test client should build.");

	TrustKeyLoader::new(ReqwestHttpClient::with_client(client), cache)
}

fn source(server: &MockServer, path: &str, environment: &str, priority: i64) -> TrustKeySource {
	TrustKeySource {
		url: Url::parse(&server.url(path)).expect("Source URL should parse."),
		environment: environment.into(),
		priority,
	}
}

fn signed_request(body: &str) -> RequestContext {
	let key = EncodingKey::from_rsa_pem(PRIMARY_PRIVATE.as_bytes())
		.expect("Fixture private key should parse.");
	let signature =
		crypto::sign(body.as_bytes(), &key, Algorithm::RS256).expect("Signing should succeed.");
	let app_token =
		format!("e30.{}.unsigned", URL_SAFE_NO_PAD.encode(json!({ "sub": "app-42" }).to_string()));

	RequestContext::new()
		.with_raw_body(body)
		.with_header("x-pot-signature", signature)
		.with_header("x-app-token", app_token)
}

#[tokio::test]
async fn loaded_keys_authenticate_signed_requests() {
	let server = MockServer::start_async().await;
	let production = server
		.mock_async(|when, then| {
			when.method(GET).path("/production.pem");
			then.status(200).header("content-type", "application/x-pem-file").body(PRIMARY_PUBLIC);
		})
		.await;
	let staging = server
		.mock_async(|when, then| {
			when.method(GET).path("/staging.json");
			then.status(200).json_body(json!({ "public_key": SECONDARY_PUBLIC }));
		})
		.await;
	let missing = server
		.mock_async(|when, then| {
			when.method(GET).path("/gone.pem");
			then.status(404);
		})
		.await;
	let cache = Arc::new(CredentialCache::default());
	let sources = [
		source(&server, "/production.pem", "production", 5),
		source(&server, "/staging.json", "staging", 1),
		source(&server, "/gone.pem", "legacy", 0),
	];
	let loaded = loader(cache.clone()).load(&sources).await.expect("Loading should succeed.");

	production.assert_async().await;
	staging.assert_async().await;
	missing.assert_async().await;

	assert_eq!(loaded, 2);
	assert_eq!(cache.keys(TRUST_KEYS).len(), 2);

	let verifier = Arc::new(TrustVerifier::new(cache));
	let environments = verifier
		.candidates()
		.into_iter()
		.map(|record| record.environment)
		.collect::<Vec<_>>();

	assert_eq!(environments, vec!["staging", "production"]);

	let strategy = SignatureStrategy::new(verifier).pass_request(true);
	let (identity, info) =
		match strategy.authenticate(&signed_request(r#"{"query":"latest"}"#)).await {
			AuthOutcome::Success { identity, info } => (identity, info),
			other => panic!("Signed request should authenticate, got {other:?}."),
		};

	assert_eq!(identity, "app-42");
	assert_eq!(info.environment.as_deref(), Some("production"));
}

#[tokio::test]
async fn reloading_replaces_keys_per_source() {
	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.method(GET).path("/rotating.pem");
			then.status(200).body(PRIMARY_PUBLIC);
		})
		.await;

	let cache = Arc::new(CredentialCache::default());
	let rotating = source(&server, "/rotating.pem", "production", 1);
	let stale = TrustKeyRecord::new(rotating.url.as_str(), SECONDARY_PUBLIC, "production", 1);

	cache.set(TRUST_KEYS, &stale.source_url, &stale).expect("Stale key should be cached.");

	let loaded = loader(cache.clone()).load(&[rotating]).await.expect("Loading should succeed.");
	let verifier = Arc::new(TrustVerifier::new(cache));

	assert_eq!(loaded, 1);
	assert_eq!(verifier.candidates().len(), 1);

	let outcome = SignatureStrategy::new(verifier)
		.pass_request(true)
		.authenticate(&signed_request("payload"))
		.await;

	assert!(outcome.is_success());
}

#[tokio::test]
async fn unsigned_requests_are_rejected() {
	let verifier = Arc::new(TrustVerifier::new(Arc::new(CredentialCache::default())));
	let request = RequestContext::new().with_raw_body("{}").with_header("x-app-token", "t");
	let outcome = SignatureStrategy::new(verifier).authenticate(&request).await;
	let body = outcome.error_body().expect("Unsigned requests should fail.");

	assert_eq!(body.error.status, 401);
}
