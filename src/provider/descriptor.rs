//! Provider descriptor data structures shared by every grant flow.

/// Builder API for assembling provider descriptors.
pub mod builder;
/// Grant identifiers and support flags.
pub mod grant;
/// Provider-specific quirk toggles.
pub mod quirks;

pub use builder::*;
pub use grant::*;
pub use quirks::*;

// self
use crate::{_prelude::*, auth::ProviderId};

/// Where client credentials travel on token endpoint calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
	/// `client_id`/`client_secret` as body parameters.
	#[default]
	ClientSecretPost,
	/// HTTP Basic header, with `client_id` repeated in the body.
	ClientSecretBasic,
	/// HTTP Basic header only; the body never carries client credentials.
	BasicHeaderOnly,
}
impl ClientAuthMethod {
	/// Returns `true` if the method sends an HTTP Basic header.
	pub fn uses_basic_header(self) -> bool {
		matches!(self, Self::ClientSecretBasic | Self::BasicHeaderOnly)
	}
}

/// Endpoint set declared by a provider descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
	/// Authorization endpoint used by the interactive flow.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub authorization: Option<Url>,
	/// Token endpoint used for every grant.
	pub token: Url,
	/// Dedicated refresh endpoint for providers that do not refresh at the token endpoint.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh: Option<Url>,
}
impl ProviderEndpoints {
	/// Endpoint used for refresh-token requests.
	pub fn refresh_endpoint(&self) -> &Url {
		self.refresh.as_ref().unwrap_or(&self.token)
	}
}

/// Immutable provider descriptor consumed by the token manager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
	/// Descriptor identifier.
	pub id: ProviderId,
	/// Endpoint definitions exposed by the provider.
	pub endpoints: ProviderEndpoints,
	/// Supported grant flags.
	pub supported_grants: SupportedGrants,
	/// Client credential placement.
	#[serde(default)]
	pub client_auth_method: ClientAuthMethod,
	/// Provider-specific quirks.
	#[serde(default)]
	pub quirks: ProviderQuirks,
}
impl ProviderDescriptor {
	/// Creates a new builder for the provided identifier.
	pub fn builder(id: ProviderId) -> ProviderDescriptorBuilder {
		ProviderDescriptorBuilder::new(id)
	}

	/// Checks whether the descriptor supports a given grant.
	pub fn supports(&self, grant: GrantType) -> bool {
		self.supported_grants.supports(grant)
	}
}
