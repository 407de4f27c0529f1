// self
use crate::_prelude::*;

/// Grant types understood by the token manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
	/// Resource owner password grant.
	Password,
	/// Client Credentials grant for app-only tokens.
	ClientCredentials,
	/// Authorization Code grant completed through the interactive flow.
	AuthorizationCode,
	/// Refresh Token grant.
	RefreshToken,
}
impl GrantType {
	/// Returns the RFC 6749 identifier for the grant type.
	pub fn as_str(self) -> &'static str {
		match self {
			GrantType::Password => "password",
			GrantType::ClientCredentials => "client_credentials",
			GrantType::AuthorizationCode => "authorization_code",
			GrantType::RefreshToken => "refresh_token",
		}
	}
}
impl Display for GrantType {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl FromStr for GrantType {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"password" => Ok(Self::Password),
			"client_credentials" => Ok(Self::ClientCredentials),
			"authorization_code" => Ok(Self::AuthorizationCode),
			"refresh_token" => Ok(Self::RefreshToken),
			other => Err(format!("unknown grant type `{other}`")),
		}
	}
}

/// Grant flags wired into the descriptor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupportedGrants {
	/// Password grant enabled.
	pub password: bool,
	/// Client Credentials grant enabled.
	pub client_credentials: bool,
	/// Authorization Code grant enabled.
	pub authorization_code: bool,
	/// Refresh Token grant enabled.
	pub refresh_token: bool,
}
impl SupportedGrants {
	/// Returns true if the provided grant is supported.
	pub fn supports(self, grant: GrantType) -> bool {
		match grant {
			GrantType::Password => self.password,
			GrantType::ClientCredentials => self.client_credentials,
			GrantType::AuthorizationCode => self.authorization_code,
			GrantType::RefreshToken => self.refresh_token,
		}
	}

	/// Marks a grant as supported.
	pub fn enable(mut self, grant: GrantType) -> Self {
		match grant {
			GrantType::Password => self.password = true,
			GrantType::ClientCredentials => self.client_credentials = true,
			GrantType::AuthorizationCode => self.authorization_code = true,
			GrantType::RefreshToken => self.refresh_token = true,
		}

		self
	}

	/// Returns true when no grants are enabled.
	pub fn is_empty(self) -> bool {
		!(self.password || self.client_credentials || self.authorization_code || self.refresh_token)
	}
}
