//! Interactive authorization code round trip.
//!
//! [`TokenManager::start_authorization`] mints an opaque state value, stores it in the
//! [`CSRF_STATES`] namespace for five minutes (with the PKCE verifier when the descriptor
//! requires one), and returns the provider URL embedding it. The redirect callback hands the
//! returned state and code to [`TokenManager::complete_authorization`], which consumes the
//! state exactly once before exchanging the code.

// crates.io
use base64::{
	Engine as _,
	engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::Grant,
	cache::{CSRF_STATE_TTL, CSRF_STATES},
	error::ConfigError,
	flows::{Handoff, TokenManager},
	http::TokenHttpClient,
	oauth::{TokenRequest, TransportErrorMapper},
	obs::{self, FlowKind},
	provider::GrantType,
};

const STATE_LEN: usize = 32;
const PKCE_VERIFIER_LEN: usize = 64;

/// Provider URL and state produced by [`TokenManager::start_authorization`].
#[derive(Clone, Debug)]
pub struct AuthorizationStart {
	/// Opaque state value the redirect must echo back.
	pub state: String,
	/// Provider authorization URL the user agent should visit.
	pub authorize_url: Url,
}

/// Result of a completed interactive authorization.
#[derive(Clone, Debug)]
pub enum AuthorizationHandoff {
	/// Redirect to the external target; the grant travels in the query string.
	Redirect(Url),
	/// The grant was persisted; the operator must copy the token into `variable`.
	Persisted {
		/// External configuration variable.
		variable: String,
		/// Stored grant.
		grant: Grant,
	},
}

#[derive(Serialize, Deserialize)]
struct PendingAuthorization {
	identity: String,
	verifier: Option<String>,
}

impl<C, M> TokenManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Starts an interactive authorization and returns the provider URL to visit.
	pub fn start_authorization(&self) -> Result<AuthorizationStart> {
		self.ensure_supported(GrantType::AuthorizationCode)?;

		let Some(mut authorize_url) = self.descriptor.endpoints.authorization.clone() else {
			return Err(ConfigError::Insufficient { detail: "authorization endpoint" }.into());
		};
		let (Some(client_id), Some(redirect_uri)) =
			(self.profile.client_id.as_deref(), self.profile.redirect_uri.as_ref())
		else {
			return Err(ConfigError::Insufficient { detail: "client id or redirect uri" }.into());
		};
		let state = random_string(STATE_LEN);
		let verifier =
			self.descriptor.quirks.pkce_required.then(|| random_string(PKCE_VERIFIER_LEN));
		let pending = PendingAuthorization {
			identity: self.identity.to_string(),
			verifier: verifier.clone(),
		};

		self.cache.set_expiring(CSRF_STATES, &state, &pending, Some(CSRF_STATE_TTL))?;

		{
			let mut pairs = authorize_url.query_pairs_mut();

			pairs.append_pair("response_type", "code");
			pairs.append_pair("client_id", client_id);
			pairs.append_pair("redirect_uri", redirect_uri.as_str());

			if !self.profile.scopes.is_empty() {
				let delimiter = self.descriptor.quirks.scope_delimiter.to_string();

				pairs.append_pair("scope", &self.profile.scopes.join(&delimiter));
			}

			pairs.append_pair("state", &state);

			if let Some(verifier) = &verifier {
				pairs.append_pair("code_challenge", &pkce_challenge(verifier));
				pairs.append_pair("code_challenge_method", "S256");
			}
		}

		tracing::debug!(identity = %self.identity, "Started interactive authorization.");

		Ok(AuthorizationStart { state, authorize_url })
	}

	/// Consumes `state`, exchanges `code`, and hands the grant off per the profile.
	///
	/// Unknown, expired, or foreign state values fail with 401 before any network call.
	pub async fn complete_authorization(
		&self,
		state: &str,
		code: &str,
	) -> Result<AuthorizationHandoff> {
		obs::observe(FlowKind::AuthorizationCode, "complete_authorization", async move {
			let pending = self
				.cache
				.take_if::<PendingAuthorization, _>(CSRF_STATES, state, |pending| {
					pending.identity == self.identity.as_ref()
				})
				.ok_or_else(|| Error::Unauthorized {
					reason: "Unknown or expired authorization state".into(),
				})?;
			let Some(redirect_uri) = self.profile.redirect_uri.as_ref() else {
				return Err(ConfigError::Insufficient { detail: "redirect uri" }.into());
			};
			let endpoint = self.descriptor.endpoints.token.clone();
			let mut request = TokenRequest::new(GrantType::AuthorizationCode, endpoint)
				.param("code", code)
				.param("redirect_uri", redirect_uri.as_str());

			if let Some(verifier) = pending.verifier {
				request = request.param("code_verifier", verifier);
			}

			let request = self.with_profile_params(self.with_client_auth(request));
			let _singleflight = self.flow_guard.lock().await;

			self.begin_attempt()?;

			let grant = self.exchange(request).await?;

			match &self.profile.handoff {
				Handoff::Redirect { target, param } => {
					let mut target = target.clone();
					let encoded = STANDARD.encode(grant.handoff_document().to_string());

					target.query_pairs_mut().append_pair(param, &encoded);
					// Handed-off grants are not cached; the successful exchange clears attempts.
					self.forget();

					Ok(AuthorizationHandoff::Redirect(target))
				},
				Handoff::Persist { variable } => {
					self.store(&grant)?;

					Ok(AuthorizationHandoff::Persisted { variable: variable.clone(), grant })
				},
			}
		})
		.await
	}
}

fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

fn pkce_challenge(verifier: &str) -> String {
	URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn pkce_challenge_is_unpadded_url_safe_sha256() {
		assert_eq!(
			pkce_challenge("Gw3kT9pQz7LmN2xR5vB8cY1hJ4dF6sA0eU3iO9wK2qE"),
			"vO92I0X0bLQg0rbeup5MxSp4Vna4Bx2z-r_l9KXFjEE"
		);
	}

	#[test]
	fn random_state_is_alphanumeric() {
		let state = random_string(STATE_LEN);

		assert_eq!(state.len(), STATE_LEN);
		assert!(state.chars().all(|c| c.is_ascii_alphanumeric()));
	}
}
