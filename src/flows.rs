//! Grant lifecycle orchestration for one logical identity.
//!
//! [`TokenManager`] owns the credential profile, provider descriptor, and transport for a
//! single product code. Grants live in the shared [`CredentialCache`] under
//! [`GRANTS`](crate::cache::GRANTS), so any manager (or the interactive endpoints) sharing the
//! cache observes the same document. Acquisition, refresh, and interactive completion for one
//! manager are serialized through an async guard; concurrent callers reuse the grant stored by
//! whoever ran first.

pub mod acquire;
pub mod authorize;
pub mod outbound;
pub mod profile;
pub mod refresh;

pub use authorize::*;
pub use outbound::*;
pub use profile::*;

// self
use crate::{
	_prelude::*,
	auth::{Grant, ProductCode, TokenSecret},
	cache::{CredentialCache, DEFAULT_TTL, GRANTS},
	error::ConfigError,
	http::TokenHttpClient,
	oauth::{TokenFacade, TokenRequest, TransportErrorMapper},
	provider::{ClientAuthMethod, GrantType, ProviderDescriptor, ProviderStrategy},
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestHttpClient, oauth::ReqwestTransportErrorMapper};

/// Grant attempts allowed before the identity fails fast.
pub const MAX_ATTEMPTS: u32 = 3;

#[cfg(feature = "reqwest")]
/// Token manager specialized for the crate's default reqwest transport stack.
pub type ReqwestTokenManager = TokenManager<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Observable lifecycle state of an identity's grant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialState {
	/// No usable grant is cached and the attempt ceiling has not been reached.
	NoGrant,
	/// A usable grant is cached.
	Granted,
	/// The attempt ceiling was reached; no further network calls are made.
	Failed,
}

/// Coordinates grant acquisition, refresh, and outbound authorization for one product code.
pub struct TokenManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	identity: ProductCode,
	cache: Arc<CredentialCache>,
	descriptor: ProviderDescriptor,
	strategy: Arc<dyn ProviderStrategy>,
	profile: CredentialProfile,
	facade: TokenFacade<C, M>,
	flow_guard: AsyncMutex<()>,
}
impl<C, M> TokenManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a manager that reuses the caller-provided transport + mapper pair.
	pub fn with_http_client(
		identity: ProductCode,
		cache: Arc<CredentialCache>,
		descriptor: ProviderDescriptor,
		strategy: Arc<dyn ProviderStrategy>,
		profile: CredentialProfile,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			identity,
			cache,
			descriptor,
			strategy,
			profile,
			facade: TokenFacade::new(http_client.into(), mapper.into()),
			flow_guard: AsyncMutex::new(()),
		}
	}

	/// Product code this manager serves.
	pub fn identity(&self) -> &ProductCode {
		&self.identity
	}

	/// Provider descriptor used for every token request.
	pub fn descriptor(&self) -> &ProviderDescriptor {
		&self.descriptor
	}

	/// Credential profile used to select the grant strategy.
	pub fn profile(&self) -> &CredentialProfile {
		&self.profile
	}

	/// Returns the cached grant when it carries a usable token.
	pub fn grant(&self) -> Option<Grant> {
		self.cached().filter(Grant::is_usable)
	}

	/// Current lifecycle state derived from the cached grant document.
	pub fn state(&self) -> CredentialState {
		match self.cached() {
			Some(grant) if grant.is_usable() => CredentialState::Granted,
			Some(grant) if grant.attempts >= MAX_ATTEMPTS => CredentialState::Failed,
			_ => CredentialState::NoGrant,
		}
	}

	/// Drops the cached grant, attempt counter included.
	pub fn forget(&self) -> bool {
		self.cache.delete(GRANTS, &self.identity)
	}

	fn cached(&self) -> Option<Grant> {
		self.cache.get(GRANTS, &self.identity)
	}

	/// Counts one grant attempt, failing fast once the ceiling is reached.
	///
	/// The counter is written back before any network call so a crashing or failing
	/// request still consumes its attempt.
	fn begin_attempt(&self) -> Result<u32> {
		let current = self.cached().unwrap_or_default();

		if current.attempts >= MAX_ATTEMPTS {
			tracing::warn!(identity = %self.identity, "Grant attempt ceiling reached.");

			return Err(Error::TooManyAttempts);
		}

		let next = current.with_attempt();
		let ttl = current
			.expires_at()
			.map(|expiry| expiry - OffsetDateTime::now_utc())
			.filter(|remaining| remaining.is_positive())
			.unwrap_or(DEFAULT_TTL);

		self.cache.set_expiring(GRANTS, &self.identity, &next, Some(ttl))?;

		Ok(next.attempts)
	}

	/// Replaces the cached document with a token-less placeholder keeping the attempt count.
	fn discard_token(&self) -> Result<()> {
		let attempts = self.cached().map(|grant| grant.attempts).unwrap_or_default();
		let placeholder = Grant { attempts, ..Default::default() };

		self.cache.set_expiring(GRANTS, &self.identity, &placeholder, Some(DEFAULT_TTL))?;

		Ok(())
	}

	/// Stores a freshly issued grant; its ttl is the provider's `expires_in`.
	fn store(&self, grant: &Grant) -> Result<()> {
		self.cache.set_expiring(GRANTS, &self.identity, grant, grant.lifetime())?;

		tracing::debug!(
			identity = %self.identity,
			refresh = grant.can_refresh(),
			expires_at = ?grant.expires_at(),
			"Stored grant."
		);

		Ok(())
	}

	fn ensure_supported(&self, grant: GrantType) -> Result<()> {
		if self.descriptor.supports(grant) {
			Ok(())
		} else {
			Err(ConfigError::UnsupportedGrant {
				descriptor: self.descriptor.id.to_string(),
				grant: grant.as_str(),
			}
			.into())
		}
	}

	/// Places client credentials according to the descriptor's client auth method.
	fn with_client_auth(&self, request: TokenRequest) -> TokenRequest {
		let Some(client_id) = self.profile.client_id.as_deref() else {
			return request;
		};
		let secret = self.profile.client_secret.as_ref().map(TokenSecret::expose);

		match (self.descriptor.client_auth_method, secret) {
			(ClientAuthMethod::BasicHeaderOnly, secret) =>
				request.basic_auth(client_id, secret.unwrap_or_default()),
			(ClientAuthMethod::ClientSecretBasic, Some(secret)) =>
				request.basic_auth(client_id, secret),
			(_, Some(secret)) =>
				request.param("client_id", client_id).param("client_secret", secret),
			(_, None) => request.param("client_id", client_id),
		}
	}

	/// Adds the profile's scopes and extra parameters.
	fn with_profile_params(&self, mut request: TokenRequest) -> TokenRequest {
		if !self.profile.scopes.is_empty() {
			let delimiter = self.descriptor.quirks.scope_delimiter.to_string();

			request = request.param("scope", self.profile.scopes.join(&delimiter));
		}
		for (name, value) in &self.profile.extra_params {
			request = request.param(name.as_str(), value.as_str());
		}

		request
	}

	async fn exchange(&self, request: TokenRequest) -> Result<Grant> {
		self.facade
			.exchange(self.strategy.as_ref(), request, self.descriptor.quirks.body_format)
			.await
	}
}
#[cfg(feature = "reqwest")]
impl TokenManager<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a manager backed by its own reqwest transport.
	pub fn new(
		identity: ProductCode,
		cache: Arc<CredentialCache>,
		descriptor: ProviderDescriptor,
		strategy: Arc<dyn ProviderStrategy>,
		profile: CredentialProfile,
	) -> Self {
		Self::with_http_client(
			identity,
			cache,
			descriptor,
			strategy,
			profile,
			ReqwestHttpClient::default(),
			Arc::new(ReqwestTransportErrorMapper),
		)
	}
}
impl<C, M> Debug for TokenManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenManager")
			.field("identity", &self.identity)
			.field("descriptor", &self.descriptor.id)
			.field("profile", &self.profile)
			.finish()
	}
}
