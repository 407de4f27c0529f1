// self
use crate::_prelude::*;

/// Encoding of token endpoint request bodies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyFormat {
	/// `application/x-www-form-urlencoded`.
	#[default]
	Form,
	/// `application/json`.
	Json,
}

/// Shape of refresh-token requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshShape {
	/// `refresh_token` travels as a body parameter.
	#[default]
	Body,
	/// `refresh_token` travels as `Authorization: Bearer <refresh_token>`.
	BearerHeader,
}

/// Provider-specific quirks that influence how flows behave.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderQuirks {
	/// Token request body encoding.
	pub body_format: BodyFormat,
	/// Refresh request shape.
	pub refresh_shape: RefreshShape,
	/// Indicates whether PKCE must accompany the interactive flow.
	pub pkce_required: bool,
	/// Character used to join scopes when constructing `scope` parameters.
	pub scope_delimiter: char,
}
impl Default for ProviderQuirks {
	fn default() -> Self {
		Self {
			body_format: BodyFormat::Form,
			refresh_shape: RefreshShape::Body,
			pkce_required: false,
			scope_delimiter: ' ',
		}
	}
}
