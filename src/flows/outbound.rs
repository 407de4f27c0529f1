//! Outbound request authorization.

// self
use crate::{
	_prelude::*,
	flows::{MAX_ATTEMPTS, TokenManager, refresh},
	http::TokenHttpClient,
	oauth::TransportErrorMapper,
};

/// Result of one authorized outbound operation run by [`TokenManager::call`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound<T> {
	/// The call succeeded.
	Done(T),
	/// The upstream rejected the call; `status` selects the recovery path.
	Rejected {
		/// HTTP status code returned upstream.
		status: u16,
		/// Short reason for logs and errors.
		reason: String,
	},
}

impl<C, M> TokenManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// `Authorization` header value for the next outbound call.
	///
	/// A static token configured on the profile wins; otherwise the cached grant is used or a
	/// new one is requested. Failing to produce a token fails the call.
	pub async fn authorization_header(&self) -> Result<String> {
		if let Some(token) = self.profile.static_token() {
			return Ok(token.authorization("Bearer"));
		}

		let grant = self.acquire().await?;

		refresh::grant_header(&grant).ok_or_else(|| Error::Unauthorized {
			reason: format!("No usable token for {}", self.identity),
		})
	}

	/// Runs `op` with an `Authorization` header value and recovers from 401/403 rejections.
	///
	/// `op` is retried at most [`MAX_ATTEMPTS`] times, so a provider that keeps rejecting fresh
	/// tokens ends in [`Error::TooManyAttempts`].
	pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T>
	where
		F: FnMut(String) -> Fut,
		Fut: Future<Output = Result<Outbound<T>>>,
	{
		let mut recoveries = 0;

		loop {
			let header = self.authorization_header().await?;
			let (status, reason) = match op(header.clone()).await? {
				Outbound::Done(value) => return Ok(value),
				Outbound::Rejected { status, reason } => (status, reason),
			};

			tracing::debug!(identity = %self.identity, status, "Outbound call rejected.");

			if self.profile.static_token().is_some() {
				return Err(match status {
					400 => Error::InvalidGrant { reason },
					403 => Error::Forbidden { reason },
					_ => Error::Unauthorized { reason },
				});
			}
			if recoveries >= MAX_ATTEMPTS {
				return Err(Error::TooManyAttempts);
			}

			recoveries += 1;

			self.recover_from(status, reason, Some(&header)).await?;
		}
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
		flows::CredentialProfile,
		provider::{GrantType, ProviderDescriptor},
	};

	fn descriptor(server: &MockServer) -> ProviderDescriptor {
		ProviderDescriptor::builder(ProviderId::new("mock").expect("Provider id should be valid."))
			.token_endpoint(Url::parse(&server.url("/token")).expect("Token URL should parse."))
			.support_grants([GrantType::ClientCredentials])
			.build()
			.expect("Descriptor fixture should build.")
	}

	#[tokio::test]
	async fn static_tokens_never_contact_the_provider() {
		let server = MockServer::start_async().await;
		let mock = server
			.mock_async(|when, then| {
				when.method(POST).path("/token");
				then.status(200).json_body(serde_json::json!({ "access_token": "unused" }));
			})
			.await;
		let profile = CredentialProfile::default().with_static_token("pinned");
		let (manager, _) = build_reqwest_test_manager("acme", descriptor(&server), profile);

		assert_eq!(
			manager.authorization_header().await.expect("Static tokens should authorize."),
			"Bearer pinned"
		);

		mock.assert_calls_async(0).await;
	}

	#[tokio::test]
	async fn call_reauthenticates_after_unauthorized() {
		let server = MockServer::start_async().await;
		let mock = server
			.mock_async(|when, then| {
				when.method(POST).path("/token");
				then.status(200).json_body(serde_json::json!({ "access_token": "issued" }));
			})
			.await;
		let (manager, _) = build_reqwest_test_manager(
			"acme",
			descriptor(&server),
			CredentialProfile::default().with_client("gateway", "s3"),
		);
		let calls = Mutex::new(Vec::new());
		let value = manager
			.call(|header| {
				let mut seen = calls.lock();

				seen.push(header);

				let outcome = if seen.len() == 1 {
					Outbound::Rejected { status: 401, reason: "expired".into() }
				} else {
					Outbound::Done(7)
				};

				async move { Ok(outcome) }
			})
			.await
			.expect("The second call should succeed.");

		assert_eq!(value, 7);
		assert_eq!(calls.lock().len(), 2);
		mock.assert_calls_async(2).await;
	}

	#[tokio::test]
	async fn call_stops_on_bad_request() {
		let server = MockServer::start_async().await;
		let _mock = server
			.mock_async(|when, then| {
				when.method(POST).path("/token");
				then.status(200).json_body(serde_json::json!({ "access_token": "issued" }));
			})
			.await;
		let (manager, _) = build_reqwest_test_manager(
			"acme",
			descriptor(&server),
			CredentialProfile::default().with_client("gateway", "s3"),
		);
		let err = manager
			.call(|_| async { Ok(Outbound::<()>::Rejected { status: 400, reason: "bad".into() }) })
			.await
			.expect_err("400 should not be retried.");

		assert!(matches!(err, Error::InvalidGrant { .. }));
	}
}
