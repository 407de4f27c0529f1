//! Multi-key trust verification.
//!
//! [`TrustVerifier`] gates on a declared header table, reads every [`TrustKeyRecord`] from the
//! credential cache, and tries them in ascending priority order (stable for ties). The first
//! key that verifies the canonical payload wins; later keys are never consulted.

pub mod identity;
pub mod key;
pub mod source;

pub use identity::*;
pub use key::*;
pub use source::*;

// self
use crate::{
	_prelude::*,
	cache::{CredentialCache, TRUST_KEYS},
	error::ConfigError,
	obs::{FlowKind, FlowSpan},
	signature::{
		self, AuthInfo, DEFAULT_SIGNATURE_FIELD, Rejection, RequestContext, SignatureVerifier,
		Verification, VerifyFuture,
	},
};

/// Header carrying the self-issued application token.
pub const APP_TOKEN_HEADER: &str = "x-app-token";
/// Header carrying the optional self-issued end-user token.
pub const USER_TOKEN_HEADER: &str = "x-user-token";

/// One row of the header table checked before verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustHeader {
	/// Header name (case-insensitive).
	pub name: String,
	/// Whether the request is rejected when the header is absent.
	pub required: bool,
}
impl TrustHeader {
	/// Declares a required header.
	pub fn required(name: impl Into<String>) -> Self {
		Self { name: name.into(), required: true }
	}

	/// Declares an optional header.
	pub fn optional(name: impl Into<String>) -> Self {
		Self { name: name.into(), required: false }
	}
}

/// Default header table: signature and application token required, user token optional.
pub fn default_trust_headers() -> Vec<TrustHeader> {
	vec![
		TrustHeader::required(DEFAULT_SIGNATURE_FIELD),
		TrustHeader::required(APP_TOKEN_HEADER),
		TrustHeader::optional(USER_TOKEN_HEADER),
	]
}

/// Verifies request and response signatures against cached trust keys.
#[derive(Clone, Debug)]
pub struct TrustVerifier {
	cache: Arc<CredentialCache>,
	namespace: String,
	headers: Vec<TrustHeader>,
	identity_header: String,
	user_header: String,
}
impl TrustVerifier {
	/// Creates a verifier with the default header table and namespace.
	pub fn new(cache: Arc<CredentialCache>) -> Self {
		Self {
			cache,
			namespace: TRUST_KEYS.into(),
			headers: default_trust_headers(),
			identity_header: APP_TOKEN_HEADER.into(),
			user_header: USER_TOKEN_HEADER.into(),
		}
	}

	/// Overrides the namespace holding trust keys.
	pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
		self.namespace = namespace.into();

		self
	}

	/// Replaces the header table.
	pub fn with_headers(mut self, headers: Vec<TrustHeader>) -> Self {
		self.headers = headers;

		self
	}

	/// Overrides the header carrying the application token.
	pub fn with_identity_header(mut self, name: impl Into<String>) -> Self {
		self.identity_header = name.into();

		self
	}

	/// Overrides the header carrying the end-user token.
	pub fn with_user_header(mut self, name: impl Into<String>) -> Self {
		self.user_header = name.into();

		self
	}

	/// Candidate keys in verification order.
	pub fn candidates(&self) -> Vec<TrustKeyRecord> {
		let mut keys = self.cache.get_all::<TrustKeyRecord>(&self.namespace);

		// `sort_by_key` is stable, so equal priorities keep their retrieval order.
		keys.sort_by_key(|record| record.priority);

		keys
	}

	/// Returns the first key, in priority order, that verifies `signature` over `message`.
	pub fn match_signature(&self, message: &[u8], signature: &str) -> Option<TrustKeyRecord> {
		let signature = signature::decode_signature(signature)?;

		self.candidates().into_iter().find(|record| match record.verifies(message, &signature) {
			Ok(matched) => matched,
			Err(e) => {
				tracing::warn!(
					source = %record.source_url,
					error = %e,
					"Skipping malformed trust key."
				);

				false
			},
		})
	}

	/// Rejects the request if a required header is absent.
	pub fn check_headers(&self, request: &RequestContext) -> Result<()> {
		for header in self.headers.iter().filter(|header| header.required) {
			let present = request
				.header(&header.name)
				.is_some_and(|value| !value.is_null() && value.as_str() != Some(""));

			if !present {
				return Err(Error::MissingHeader { name: header.name.clone() });
			}
		}

		Ok(())
	}

	/// Full request-side verification.
	pub fn verify_request(&self, request: &RequestContext, signature: &str) -> Verification {
		let _span = FlowSpan::new(FlowKind::TrustVerification, "verify_request").entered();

		if let Err(e) = self.check_headers(request) {
			return Verification::Rejected(e.into());
		}

		let Some(matched) = self.match_signature(&request.canonical_payload(), signature) else {
			return Verification::Rejected(Error::SignatureMismatch.into());
		};
		let Some(identity) = request.header_str(&self.identity_header).and_then(token_subject)
		else {
			return Verification::Rejected(Rejection::unauthorized("Invalid application token"));
		};
		let user = request.header_str(&self.user_header).and_then(token_subject);

		tracing::debug!(environment = %matched.environment, "Request signature trusted.");

		Verification::Verified {
			identity,
			info: AuthInfo { environment: Some(matched.environment), scope: "*".into(), user },
		}
	}

	/// Response-side verification; returns the environment tag of the matching key.
	pub fn verify_response(&self, payload: &Value, signature: &str) -> Result<String> {
		let _span = FlowSpan::new(FlowKind::TrustVerification, "verify_response").entered();

		self.match_signature(&signature::response_payload(payload), signature)
			.map(|record| record.environment)
			.ok_or(Error::SignatureMismatch)
	}
}
impl SignatureVerifier for TrustVerifier {
	fn precheck(&self, request: &RequestContext) -> Result<(), Rejection> {
		self.check_headers(request).map_err(Rejection::from)
	}

	fn verify<'a>(
		&'a self,
		request: Option<&'a RequestContext>,
		signature: &'a str,
	) -> VerifyFuture<'a> {
		Box::pin(async move {
			let request = request.ok_or(ConfigError::Insufficient { detail: "request context" })?;

			Ok(self.verify_request(request, signature))
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use base64::{
		Engine as _,
		engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
	};
	use jsonwebtoken::{Algorithm, EncodingKey, crypto};
	use serde_json::json;
	// self
	use super::*;

	const PRIMARY_PUBLIC: &str = include_str!("../tests/fixtures/primary-public.pem");
	const PRIMARY_PRIVATE: &str = include_str!("../tests/fixtures/primary-private.pem");
	const SECONDARY_PUBLIC: &str = include_str!("../tests/fixtures/secondary-public.pem");

	fn sign(message: &[u8]) -> String {
		let key = EncodingKey::from_rsa_pem(PRIMARY_PRIVATE.as_bytes())
			.expect("Fixture private key should parse.");

		crypto::sign(message, &key, Algorithm::RS256).expect("Signing should succeed.")
	}

	fn app_token(sub: &str) -> String {
		format!("e30.{}.unsigned", URL_SAFE_NO_PAD.encode(json!({ "sub": sub }).to_string()))
	}

	fn verifier_with(keys: &[TrustKeyRecord]) -> TrustVerifier {
		let cache = Arc::new(CredentialCache::default());

		for key in keys {
			cache.set(TRUST_KEYS, &key.source_url, key).expect("Trust key should be cached.");
		}

		TrustVerifier::new(cache)
	}

	fn request(body: &str, signature: &str) -> RequestContext {
		RequestContext::new()
			.with_raw_body(body)
			.with_header("x-pot-signature", signature)
			.with_header("x-app-token", app_token("app-7"))
	}

	#[test]
	fn lowest_priority_match_wins() {
		let body = r#"{"query":"latest"}"#;
		let signature = sign(body.as_bytes());
		let verifier = verifier_with(&[
			TrustKeyRecord::new("https://keys/b", PRIMARY_PUBLIC, "staging", 2),
			TrustKeyRecord::new("https://keys/a", PRIMARY_PUBLIC, "production", 1),
		]);
		let outcome = verifier.verify_request(&request(body, &signature), &signature);

		assert_eq!(
			outcome,
			Verification::Verified {
				identity: "app-7".into(),
				info: AuthInfo {
					environment: Some("production".into()),
					scope: "*".into(),
					user: None,
				},
			}
		);
	}

	#[test]
	fn equal_priorities_keep_retrieval_order() {
		let verifier = verifier_with(&[
			TrustKeyRecord::new("https://keys/2", SECONDARY_PUBLIC, "second", 5),
			TrustKeyRecord::new("https://keys/1", PRIMARY_PUBLIC, "first", 5),
		]);
		let order =
			verifier.candidates().into_iter().map(|record| record.source_url).collect::<Vec<_>>();

		assert_eq!(order, vec!["https://keys/1", "https://keys/2"]);
	}

	#[test]
	fn mismatch_and_missing_headers_are_rejected() {
		let body = "{}";
		let signature = sign(body.as_bytes());
		let verifier =
			verifier_with(&[TrustKeyRecord::new("https://keys/x", SECONDARY_PUBLIC, "dev", 1)]);
		let outcome = verifier.verify_request(&request(body, &signature), &signature);

		assert_eq!(
			outcome,
			Verification::Rejected(Rejection {
				status: 401,
				message: "Signature validation failed".into()
			})
		);

		let missing = RequestContext::new().with_header("x-pot-signature", signature.as_str());
		let Verification::Rejected(rejection) = verifier.verify_request(&missing, &signature)
		else {
			panic!("Missing headers should be rejected.");
		};

		assert_eq!(rejection.message, "Missing required header x-app-token");
	}

	#[test]
	fn malformed_keys_are_skipped() {
		let body = "payload";
		let signature = sign(body.as_bytes());
		let verifier = verifier_with(&[
			TrustKeyRecord::new("https://keys/bad", "garbage", "broken", 0),
			TrustKeyRecord::new("https://keys/good", PRIMARY_PUBLIC, "production", 1),
		]);
		let matched = verifier
			.match_signature(body.as_bytes(), &signature)
			.expect("The valid key should still match.");

		assert_eq!(matched.environment, "production");
	}

	#[test]
	fn standard_base64_signatures_are_accepted() {
		let body = "payload";
		let signature = STANDARD.encode(
			URL_SAFE_NO_PAD.decode(sign(body.as_bytes())).expect("Signature should decode."),
		);
		let verifier =
			verifier_with(&[TrustKeyRecord::new("https://keys/a", PRIMARY_PUBLIC, "prod", 1)]);

		assert!(verifier.match_signature(body.as_bytes(), &signature).is_some());
	}

	#[test]
	fn response_signature_excludes_signature_field() {
		let unsigned = json!({ "data": { "k": "v" } });
		let signature = sign(unsigned.to_string().as_bytes());
		let mut payload = unsigned.clone();

		payload["signature"] = Value::String(signature.clone());

		let verifier =
			verifier_with(&[TrustKeyRecord::new("https://keys/a", PRIMARY_PUBLIC, "prod", 1)]);

		assert_eq!(verifier.verify_response(&payload, &signature).ok().as_deref(), Some("prod"));
		assert!(matches!(
			verifier.verify_response(&json!({ "data": 1 }), &signature),
			Err(Error::SignatureMismatch)
		));
	}

	#[test]
	fn user_token_is_reported_when_present() {
		let body = "{}";
		let signature = sign(body.as_bytes());
		let verifier =
			verifier_with(&[TrustKeyRecord::new("https://keys/a", PRIMARY_PUBLIC, "prod", 1)]);
		let request = request(body, &signature).with_header("x-user-token", app_token("user-9"));
		let Verification::Verified { info, .. } = verifier.verify_request(&request, &signature)
		else {
			panic!("Signed request should verify.");
		};

		assert_eq!(info.user.as_deref(), Some("user-9"));
	}
}
