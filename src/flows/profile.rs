//! Credential profiles and grant strategy selection.

// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	error::ConfigError,
	obs::FlowKind,
	provider::GrantType,
};

/// Query parameter carrying the base64 grant when handing off by redirect.
pub const DEFAULT_HANDOFF_PARAM: &str = "grant";

/// What happens to a grant obtained through the interactive flow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Handoff {
	/// Persist the grant in the cache and tell the operator which variable receives the token.
	Persist {
		/// External configuration variable the operator should set.
		variable: String,
	},
	/// Redirect to an external URL with the grant as base64-encoded JSON in a query parameter.
	Redirect {
		/// Redirect target.
		target: Url,
		/// Query parameter name.
		#[serde(default = "default_handoff_param")]
		param: String,
	},
}
impl Default for Handoff {
	fn default() -> Self {
		Self::Persist { variable: "ACCESS_TOKEN".into() }
	}
}

/// Mutually exclusive ways of obtaining a grant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrantStrategy {
	/// Password grant carrying client and user credentials.
	Password,
	/// Client credentials only.
	ClientCredentials,
	/// Password grant carrying only user credentials.
	UserCredentials,
	/// Interactive browser round trip.
	AuthorizationCode,
	/// Refresh a previously stored grant.
	Refresh,
}
impl GrantStrategy {
	/// Wire grant type sent to the token endpoint.
	pub fn grant_type(self) -> GrantType {
		match self {
			Self::Password | Self::UserCredentials => GrantType::Password,
			Self::ClientCredentials => GrantType::ClientCredentials,
			Self::AuthorizationCode => GrantType::AuthorizationCode,
			Self::Refresh => GrantType::RefreshToken,
		}
	}

	/// Flow label used for spans and counters.
	pub fn flow_kind(self) -> FlowKind {
		match self {
			Self::Password => FlowKind::Password,
			Self::ClientCredentials => FlowKind::ClientCredentials,
			Self::UserCredentials => FlowKind::UserCredentials,
			Self::AuthorizationCode => FlowKind::AuthorizationCode,
			Self::Refresh => FlowKind::Refresh,
		}
	}
}

/// Credentials and options configured for one product code.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialProfile {
	/// OAuth client identifier.
	pub client_id: Option<String>,
	/// OAuth client secret; also the confirmation secret of the interactive form.
	pub client_secret: Option<TokenSecret>,
	/// Resource owner username.
	pub username: Option<String>,
	/// Resource owner password.
	pub password: Option<TokenSecret>,
	/// Explicit grant type; inferred from the populated credentials when absent.
	pub grant_type: Option<GrantType>,
	/// Requested scopes, joined with the descriptor's delimiter.
	pub scopes: Vec<String>,
	/// Static access token that bypasses the provider entirely.
	pub static_token: Option<TokenSecret>,
	/// Redirect URI registered for the interactive flow.
	pub redirect_uri: Option<Url>,
	/// Interactive flow hand-off mode.
	pub handoff: Handoff,
	/// Extra token request parameters.
	pub extra_params: BTreeMap<String, String>,
}
impl CredentialProfile {
	/// Sets the client credentials.
	pub fn with_client(mut self, client_id: impl Into<String>, secret: impl Into<String>) -> Self {
		self.client_id = Some(client_id.into());
		self.client_secret = Some(TokenSecret::new(secret));

		self
	}

	/// Sets the resource owner credentials.
	pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
		self.username = Some(username.into());
		self.password = Some(TokenSecret::new(password));

		self
	}

	/// Forces a grant type instead of inferring one.
	pub fn with_grant_type(mut self, grant: GrantType) -> Self {
		self.grant_type = Some(grant);

		self
	}

	/// Sets the requested scopes.
	pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.scopes = scopes.into_iter().map(Into::into).collect();

		self
	}

	/// Configures a static access token.
	pub fn with_static_token(mut self, token: impl Into<String>) -> Self {
		self.static_token = Some(TokenSecret::new(token));

		self
	}

	/// Sets the interactive redirect URI.
	pub fn with_redirect_uri(mut self, uri: Url) -> Self {
		self.redirect_uri = Some(uri);

		self
	}

	/// Sets the interactive hand-off mode.
	pub fn with_handoff(mut self, handoff: Handoff) -> Self {
		self.handoff = handoff;

		self
	}

	/// Adds an extra token request parameter.
	pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.extra_params.insert(name.into(), value.into());

		self
	}

	/// Returns the static token when one is configured and non-empty.
	pub fn static_token(&self) -> Option<&TokenSecret> {
		self.static_token.as_ref().filter(|token| !token.is_empty())
	}

	/// Selects the acquisition strategy from the grant type and populated credentials.
	pub fn strategy(&self) -> Result<GrantStrategy> {
		let client = self.client_id.as_deref().is_some_and(|id| !id.is_empty())
			&& self.client_secret.as_ref().is_some_and(|secret| !secret.is_empty());
		let user = self.username.as_deref().is_some_and(|name| !name.is_empty())
			&& self.password.as_ref().is_some_and(|password| !password.is_empty());

		match (self.grant_type, client, user) {
			(Some(GrantType::AuthorizationCode), ..) =>
				if self.client_id.is_some() && self.redirect_uri.is_some() {
					Ok(GrantStrategy::AuthorizationCode)
				} else {
					Err(ConfigError::Insufficient { detail: "client id or redirect uri" }.into())
				},
			(Some(GrantType::RefreshToken), ..) => Ok(GrantStrategy::Refresh),
			(Some(GrantType::ClientCredentials), true, _) => Ok(GrantStrategy::ClientCredentials),
			(Some(GrantType::Password) | None, true, true) => Ok(GrantStrategy::Password),
			(Some(GrantType::Password) | None, false, true) => Ok(GrantStrategy::UserCredentials),
			(None, true, false) => Ok(GrantStrategy::ClientCredentials),
			_ => Err(ConfigError::Insufficient { detail: "credentials" }.into()),
		}
	}
}
impl Debug for CredentialProfile {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialProfile")
			.field("client_id", &self.client_id)
			.field("client_secret_set", &self.client_secret.is_some())
			.field("username", &self.username)
			.field("password_set", &self.password.is_some())
			.field("grant_type", &self.grant_type)
			.field("scopes", &self.scopes)
			.field("static_token_set", &self.static_token.is_some())
			.field("redirect_uri", &self.redirect_uri)
			.field("handoff", &self.handoff)
			.finish()
	}
}

fn default_handoff_param() -> String {
	DEFAULT_HANDOFF_PARAM.into()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn strategy_follows_populated_credentials() {
		let both = CredentialProfile::default().with_client("id", "secret").with_user("u", "p");

		assert_eq!(both.strategy().expect("Both pairs select a grant."), GrantStrategy::Password);
		assert_eq!(
			CredentialProfile::default().with_client("id", "secret").strategy().ok(),
			Some(GrantStrategy::ClientCredentials)
		);
		assert_eq!(
			CredentialProfile::default().with_user("u", "p").strategy().ok(),
			Some(GrantStrategy::UserCredentials)
		);
	}

	#[test]
	fn empty_profiles_are_insufficient() {
		let err = CredentialProfile::default().strategy().expect_err("Nothing is configured.");

		assert_eq!(err.status(), 500);
		assert_eq!(err.public_message(), crate::error::INSUFFICIENT_CONFIGURATION);
	}

	#[test]
	fn authorization_code_needs_a_redirect_uri() {
		let profile = CredentialProfile::default()
			.with_client("id", "secret")
			.with_grant_type(GrantType::AuthorizationCode);

		assert!(profile.strategy().is_err());

		let redirect = Url::parse("https://gateway.example.com/acme/redirect")
			.expect("Redirect fixture should parse.");
		let profile = profile.with_redirect_uri(redirect);

		assert_eq!(profile.strategy().ok(), Some(GrantStrategy::AuthorizationCode));
	}

	#[test]
	fn profiles_deserialize_with_handoff_defaults() {
		let profile: CredentialProfile = serde_json::from_value(serde_json::json!({
			"client_id": "id",
			"client_secret": "secret",
			"handoff": { "mode": "redirect", "target": "https://ops.example.com/landing" }
		}))
		.expect("Profile should deserialize.");

		assert!(matches!(
			profile.handoff,
			Handoff::Redirect { ref param, .. } if param == DEFAULT_HANDOFF_PARAM
		));
		assert!(!format!("{profile:?}").contains("\"secret\""));
	}
}
