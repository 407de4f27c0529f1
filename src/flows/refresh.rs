//! Refresh grants and the status-code recovery table.
//!
//! [`TokenManager::refresh`] rotates the cached grant through the descriptor's refresh
//! endpoint, honoring the refresh-shape quirk (refresh token in the body or as a bearer
//! header). When the provider omits a new refresh token the previous one is carried over.
//! [`TokenManager::recover`] maps a rejected outbound call onto the next step: 400 fails,
//! 401 refreshes when possible and otherwise re-authenticates, 403 refreshes.

// self
use crate::{
	_prelude::*,
	auth::Grant,
	error::{ConfigError, TransientError},
	flows::TokenManager,
	http::TokenHttpClient,
	oauth::{TokenRequest, TransportErrorMapper},
	obs::{self, FlowKind},
	provider::{GrantType, RefreshShape},
};

impl<C, M> TokenManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Exchanges the cached refresh token for a new grant.
	pub async fn refresh(&self) -> Result<Grant> {
		let _singleflight = self.flow_guard.lock().await;

		self.refresh_locked().await
	}

	/// Applies the recovery table to an outbound call rejected with `status`.
	///
	/// Returns the grant the caller should retry with.
	pub async fn recover(&self, status: u16, reason: impl Into<String>) -> Result<Grant> {
		self.recover_from(status, reason.into(), None).await
	}

	/// Like [`TokenManager::recover`]; `rejected` is the `Authorization` value that failed.
	///
	/// If another caller already replaced that grant, the replacement is returned without
	/// contacting the provider.
	pub(super) async fn recover_from(
		&self,
		status: u16,
		reason: String,
		rejected: Option<&str>,
	) -> Result<Grant> {
		if status == 400 {
			return Err(Error::InvalidGrant { reason });
		}
		if status != 401 && status != 403 {
			return Err(TransientError::Upstream { status, message: reason }.into());
		}

		let _singleflight = self.flow_guard.lock().await;
		let current = self.grant();

		if let (Some(grant), Some(rejected)) = (current.as_ref(), rejected)
			&& grant_header(grant).as_deref() != Some(rejected)
		{
			return Ok(grant.clone());
		}

		let can_refresh = current.as_ref().is_some_and(Grant::can_refresh);

		tracing::debug!(identity = %self.identity, status, can_refresh, "Recovering grant.");

		match (status, can_refresh) {
			(401, true) => match self.refresh_locked().await {
				Ok(grant) => Ok(grant),
				Err(e) if e.is_retryable() || matches!(e, Error::InvalidGrant { .. }) => {
					self.discard_token()?;
					self.acquire_locked().await
				},
				Err(e) => Err(e),
			},
			(401, false) => {
				self.discard_token()?;
				self.acquire_locked().await
			},
			(_, true) => self.refresh_locked().await,
			(_, false) => Err(Error::Forbidden { reason }),
		}
	}

	pub(super) async fn refresh_locked(&self) -> Result<Grant> {
		obs::observe(FlowKind::Refresh, "refresh", async move {
			self.ensure_supported(GrantType::RefreshToken)?;

			let current = self.cached().unwrap_or_default();
			let Some(refresh_token) = current.refresh_token.filter(|secret| !secret.is_empty())
			else {
				return Err(ConfigError::MissingRefreshToken.into());
			};
			let request = TokenRequest::new(
				GrantType::RefreshToken,
				self.descriptor.endpoints.refresh_endpoint().clone(),
			);
			let request = match self.descriptor.quirks.refresh_shape {
				RefreshShape::Body =>
					self.with_client_auth(request.param("refresh_token", refresh_token.expose())),
				RefreshShape::BearerHeader => {
					let request = request.bearer(&refresh_token);

					match self.profile.client_id.as_deref() {
						Some(client_id) => request.param("client_id", client_id),
						None => request,
					}
				},
			};
			let attempt = self.begin_attempt()?;

			tracing::debug!(identity = %self.identity, attempt, "Refreshing grant.");

			let mut grant = self.exchange(request).await?;

			if !grant.can_refresh() {
				grant.refresh_token = Some(refresh_token);
			}

			self.store(&grant)?;

			Ok(grant)
		})
		.await
	}
}

/// `Authorization` header value for `grant`.
pub(super) fn grant_header(grant: &Grant) -> Option<String> {
	grant.token().map(|token| token.authorization(grant.scheme()))
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
		cache::{CredentialCache, GRANTS},
		flows::CredentialProfile,
		provider::{ProviderDescriptor, ProviderQuirks},
	};

	fn descriptor(server: &MockServer, quirks: ProviderQuirks) -> ProviderDescriptor {
		ProviderDescriptor::builder(ProviderId::new("mock").expect("Provider id should be valid."))
			.token_endpoint(Url::parse(&server.url("/token")).expect("Token URL should parse."))
			.refresh_endpoint(
				Url::parse(&server.url("/refresh")).expect("Refresh URL should parse."),
			)
			.support_grants([GrantType::ClientCredentials, GrantType::RefreshToken])
			.quirks(quirks)
			.build()
			.expect("Descriptor fixture should build.")
	}

	fn seed(cache: &CredentialCache, access: &str, refresh: Option<&str>) {
		let mut builder = Grant::builder().access_token(access).expires_in(600);

		if let Some(refresh) = refresh {
			builder = builder.refresh_token(refresh);
		}

		let grant = builder.build().expect("Seed grant should build.");

		cache
			.set_expiring(GRANTS, "acme", &grant, grant.lifetime())
			.expect("Seed grant should be cached.");
	}

	#[tokio::test]
	async fn forbidden_refreshes_and_keeps_the_refresh_token() {
		let server = MockServer::start_async().await;
		let mock = server
			.mock_async(|when, then| {
				when.method(POST)
					.path("/refresh")
					.form_urlencoded_tuple("grant_type", "refresh_token")
					.form_urlencoded_tuple("refresh_token", "keep-me");
				then.status(200)
					.json_body(serde_json::json!({ "access_token": "rotated", "expires_in": 60 }));
			})
			.await;
		let (manager, cache) = build_reqwest_test_manager(
			"acme",
			descriptor(&server, ProviderQuirks::default()),
			CredentialProfile::default().with_client("gateway", "s3"),
		);

		seed(&cache, "stale", Some("keep-me"));

		let grant = manager.recover(403, "expired").await.expect("403 should refresh.");

		mock.assert_async().await;

		assert_eq!(grant.token().map(|token| token.expose()), Some("rotated"));
		assert_eq!(grant.refresh_token.as_ref().map(|token| token.expose()), Some("keep-me"));
	}

	#[tokio::test]
	async fn bearer_refresh_shape_sends_the_refresh_token_as_a_header() {
		let server = MockServer::start_async().await;
		let mock = server
			.mock_async(|when, then| {
				when.method(POST)
					.path("/refresh")
					.header("authorization", "Bearer keep-me")
					.body_excludes("refresh_token=");
				then.status(200).json_body(serde_json::json!({ "access_token": "rotated" }));
			})
			.await;
		let quirks =
			ProviderQuirks { refresh_shape: RefreshShape::BearerHeader, ..Default::default() };
		let (manager, cache) = build_reqwest_test_manager(
			"acme",
			descriptor(&server, quirks),
			CredentialProfile::default().with_client("gateway", "s3"),
		);

		seed(&cache, "stale", Some("keep-me"));
		manager.refresh().await.expect("Bearer-shaped refresh should succeed.");
		mock.assert_async().await;
	}

	#[tokio::test]
	async fn unauthorized_without_refresh_token_reauthenticates() {
		let server = MockServer::start_async().await;
		let token = server
			.mock_async(|when, then| {
				when.method(POST).path("/token");
				then.status(200).json_body(serde_json::json!({ "access_token": "fresh" }));
			})
			.await;
		let (manager, cache) = build_reqwest_test_manager(
			"acme",
			descriptor(&server, ProviderQuirks::default()),
			CredentialProfile::default().with_client("gateway", "s3"),
		);

		seed(&cache, "stale", None);

		let grant = manager.recover(401, "expired").await.expect("401 should re-authenticate.");

		token.assert_async().await;

		assert_eq!(grant.token().map(|token| token.expose()), Some("fresh"));
	}

	#[tokio::test]
	async fn forbidden_without_refresh_token_and_bad_requests_fail() {
		let server = MockServer::start_async().await;
		let (manager, cache) = build_reqwest_test_manager(
			"acme",
			descriptor(&server, ProviderQuirks::default()),
			CredentialProfile::default().with_client("gateway", "s3"),
		);

		seed(&cache, "stale", None);

		assert!(matches!(manager.recover(403, "scope").await, Err(Error::Forbidden { .. })));
		assert!(matches!(manager.recover(400, "bad").await, Err(Error::InvalidGrant { .. })));
	}
}
