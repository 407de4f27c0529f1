//! Grant acquisition for the non-interactive strategies.
//!
//! [`TokenManager::acquire`] returns the cached grant when one is usable and otherwise runs
//! the profile's strategy under the identity guard. Every network attempt is counted in the
//! cached document first, so the fourth consecutive failure is rejected without a request.

// self
use crate::{
	_prelude::*,
	auth::Grant,
	error::ConfigError,
	flows::{GrantStrategy, TokenManager},
	http::TokenHttpClient,
	oauth::{TokenRequest, TransportErrorMapper},
	obs,
	provider::GrantType,
};

impl<C, M> TokenManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Returns a usable grant, requesting one from the provider when none is cached.
	pub async fn acquire(&self) -> Result<Grant> {
		let _singleflight = self.flow_guard.lock().await;

		if let Some(grant) = self.grant() {
			return Ok(grant);
		}

		self.acquire_locked().await
	}

	/// Requests a new grant even if a usable one is cached.
	pub async fn reacquire(&self) -> Result<Grant> {
		let _singleflight = self.flow_guard.lock().await;

		self.discard_token()?;
		self.acquire_locked().await
	}

	pub(super) async fn acquire_locked(&self) -> Result<Grant> {
		match self.profile.strategy()? {
			GrantStrategy::AuthorizationCode => Err(Error::Unauthorized {
				reason: format!("Interactive authorization required for {}", self.identity),
			}),
			GrantStrategy::Refresh => self.refresh_locked().await,
			strategy => self.request_grant(strategy).await,
		}
	}

	async fn request_grant(&self, strategy: GrantStrategy) -> Result<Grant> {
		obs::observe(strategy.flow_kind(), "acquire", async move {
			let grant_type = strategy.grant_type();

			self.ensure_supported(grant_type)?;

			let request = self.grant_request(strategy)?;
			let attempt = self.begin_attempt()?;

			tracing::debug!(identity = %self.identity, attempt, "Requesting grant.");

			let grant = self.exchange(request).await?;

			self.store(&grant)?;

			Ok(grant)
		})
		.await
	}

	fn grant_request(&self, strategy: GrantStrategy) -> Result<TokenRequest> {
		let request =
			TokenRequest::new(strategy.grant_type(), self.descriptor.endpoints.token.clone());
		let request = match strategy {
			GrantStrategy::Password | GrantStrategy::UserCredentials => {
				let (Some(username), Some(password)) =
					(self.profile.username.as_deref(), self.profile.password.as_ref())
				else {
					return Err(ConfigError::Insufficient { detail: "username or password" }.into());
				};
				let request =
					request.param("username", username).param("password", password.expose());

				if strategy == GrantStrategy::Password {
					self.with_client_auth(request)
				} else {
					request
				}
			},
			GrantStrategy::ClientCredentials => self.with_client_auth(request),
			GrantStrategy::AuthorizationCode | GrantStrategy::Refresh =>
				return Err(ConfigError::UnsupportedGrant {
					descriptor: self.descriptor.id.to_string(),
					grant: strategy.grant_type().as_str(),
				}
				.into()),
		};

		Ok(self.with_profile_params(request))
	}
}

#[cfg(all(test, feature = "reqwest"))]
mod tests {
	// crates.io
	use httpmock::prelude::*;
	// self
	use super::*;
	use crate::{
		_preludet::*,
		auth::ProviderId,
		cache::GRANTS,
		flows::{CredentialProfile, CredentialState},
		provider::{ClientAuthMethod, ProviderDescriptor},
	};

	fn descriptor(server: &MockServer, method: ClientAuthMethod) -> ProviderDescriptor {
		ProviderDescriptor::builder(ProviderId::new("mock").expect("Provider id should be valid."))
			.token_endpoint(
				Url::parse(&server.url("/token")).expect("Token endpoint should parse."),
			)
			.support_grants([GrantType::Password, GrantType::ClientCredentials])
			.client_auth_method(method)
			.build()
			.expect("Descriptor fixture should build.")
	}

	#[tokio::test]
	async fn password_grant_posts_credentials_and_stores_the_grant() {
		let server = MockServer::start_async().await;
		let mock = server
			.mock_async(|when, then| {
				when.method(POST)
					.path("/token")
					.form_urlencoded_tuple("grant_type", "password")
					.form_urlencoded_tuple("username", "ops")
					.form_urlencoded_tuple("client_id", "gateway");
				then.status(200).json_body(serde_json::json!({
					"access_token": "issued",
					"refresh_token": "again",
					"expires_in": 600
				}));
			})
			.await;
		let profile =
			CredentialProfile::default().with_client("gateway", "s3").with_user("ops", "pw");
		let (manager, cache) = build_reqwest_test_manager(
			"acme",
			descriptor(&server, ClientAuthMethod::ClientSecretPost),
			profile,
		);
		let grant = manager.acquire().await.expect("Password grant should succeed.");

		mock.assert_async().await;

		assert_eq!(grant.token().map(|token| token.expose()), Some("issued"));
		assert_eq!(manager.state(), CredentialState::Granted);

		let stored: Grant = cache.get(GRANTS, "acme").expect("Grant should be cached.");

		assert_eq!(stored.attempts, 0);

		manager.acquire().await.expect("Cached grant should be reused.");
		mock.assert_calls_async(1).await;
	}

	#[tokio::test]
	async fn basic_header_only_keeps_client_credentials_out_of_the_body() {
		let server = MockServer::start_async().await;
		let mock = server
			.mock_async(|when, then| {
				when.method(POST)
					.path("/token")
					.header("authorization", "Basic Z2F0ZXdheTpzMw==")
					.form_urlencoded_tuple("grant_type", "client_credentials")
					.body_excludes("client_secret");
				then.status(200).json_body(serde_json::json!({ "token": "legacy" }));
			})
			.await;
		let (manager, _) = build_reqwest_test_manager(
			"acme",
			descriptor(&server, ClientAuthMethod::BasicHeaderOnly),
			CredentialProfile::default().with_client("gateway", "s3"),
		);
		let grant = manager.acquire().await.expect("Client credentials grant should succeed.");

		mock.assert_async().await;

		assert_eq!(grant.token().map(|token| token.expose()), Some("legacy"));
	}

	#[tokio::test]
	async fn fourth_attempt_fails_without_a_network_call() {
		let server = MockServer::start_async().await;
		let mock = server
			.mock_async(|when, then| {
				when.method(POST).path("/token");
				then.status(500).body("upstream down");
			})
			.await;
		let (manager, _) = build_reqwest_test_manager(
			"acme",
			descriptor(&server, ClientAuthMethod::ClientSecretPost),
			CredentialProfile::default().with_client("gateway", "s3"),
		);

		for _ in 0..3 {
			let err = manager.acquire().await.expect_err("Provider failures should surface.");

			assert!(matches!(err, Error::Transient(_)));
		}

		let err = manager.acquire().await.expect_err("The ceiling should be enforced.");

		assert!(matches!(err, Error::TooManyAttempts));
		assert_eq!(err.to_string(), "Too many attempts");
		assert_eq!(manager.state(), CredentialState::Failed);
		mock.assert_calls_async(3).await;
	}

	#[tokio::test]
	async fn bad_credentials_fail_with_invalid_grant() {
		let server = MockServer::start_async().await;
		let _mock = server
			.mock_async(|when, then| {
				when.method(POST).path("/token");
				then.status(400).json_body(serde_json::json!({
					"error": "invalid_grant",
					"error_description": "wrong password"
				}));
			})
			.await;
		let (manager, _) = build_reqwest_test_manager(
			"acme",
			descriptor(&server, ClientAuthMethod::ClientSecretPost),
			CredentialProfile::default().with_user("ops", "nope"),
		);
		let err = manager.acquire().await.expect_err("Bad credentials should fail.");

		assert!(matches!(err, Error::InvalidGrant { .. }));
		assert_eq!(err.status(), 400);
	}

	#[tokio::test]
	async fn zero_lifetimes_are_stored_without_expiry() {
		let server = MockServer::start_async().await;
		let mock = server
			.mock_async(|when, then| {
				when.method(POST).path("/token");
				then.status(200).json_body(serde_json::json!({
					"access_token": "timeless",
					"expires_in": 0
				}));
			})
			.await;
		let (manager, cache) = build_reqwest_test_manager(
			"acme",
			descriptor(&server, ClientAuthMethod::ClientSecretPost),
			CredentialProfile::default().with_client("gateway", "s3"),
		);
		let grant = manager.acquire().await.expect("Zero lifetimes should not discard the token.");

		assert_eq!(grant.token().map(|token| token.expose()), Some("timeless"));
		assert_eq!(grant.expires_at(), None);
		assert_eq!(manager.state(), CredentialState::Granted);

		let stored: Grant = cache.get(GRANTS, "acme").expect("Grant should be cached.");

		assert_eq!(stored.attempts, 0);

		manager.acquire().await.expect("Cached grant should be reused.");
		mock.assert_calls_async(1).await;
	}

	#[tokio::test]
	async fn tokenless_success_is_an_upstream_fault() {
		let server = MockServer::start_async().await;
		let _mock = server
			.mock_async(|when, then| {
				when.method(POST).path("/token");
				then.status(200).json_body(serde_json::json!({ "error": "server busy" }));
			})
			.await;
		let (manager, _) = build_reqwest_test_manager(
			"acme",
			descriptor(&server, ClientAuthMethod::ClientSecretPost),
			CredentialProfile::default().with_client("gateway", "s3"),
		);
		let err = manager.acquire().await.expect_err("Tokenless responses should fail.");

		assert!(matches!(err, Error::Transient(_)));
		assert!(!err.is_reference());
		assert_eq!(err.status(), 500);
		assert_eq!(err.public_message(), "Unexpected error");
	}

	#[tokio::test]
	async fn interactive_strategies_name_their_own_grant() {
		let server = MockServer::start_async().await;
		let (manager, _) = build_reqwest_test_manager(
			"acme",
			descriptor(&server, ClientAuthMethod::ClientSecretPost),
			CredentialProfile::default().with_client("gateway", "s3"),
		);

		for (strategy, label) in [
			(GrantStrategy::AuthorizationCode, "authorization_code"),
			(GrantStrategy::Refresh, "refresh_token"),
		] {
			let err = manager
				.grant_request(strategy)
				.expect_err("Interactive strategies should not build a direct request.");

			assert!(matches!(
				err,
				Error::Config(ConfigError::UnsupportedGrant { grant, .. }) if grant == label
			));
		}
	}
}
