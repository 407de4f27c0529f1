//! Attach grants to outbound requests.

// crates.io
use oauth2::http::{HeaderMap, HeaderValue, header::AUTHORIZATION};
// self
use crate::{_prelude::*, auth::Grant, error::ConfigError};

/// Describes how to attach a [`Grant`] to an outbound request without constraining the HTTP
/// client type.
pub trait RequestSignerExt<Request, Error>
where
	Self: Send + Sync,
{
	/// Consumes the provided request and injects `Authorization: <scheme> <token>`.
	fn attach_token(&self, request: Request, grant: &Grant) -> Result<Request, Error>;
}

/// Default signer for `http` header maps and reqwest builders.
#[derive(Clone, Copy, Debug, Default)]
pub struct GrantSigner;
impl GrantSigner {
	fn header_value(grant: &Grant) -> Result<HeaderValue> {
		let token = grant.token().ok_or_else(|| Error::Unauthorized {
			reason: "Grant carries no usable token".into(),
		})?;
		let mut value = HeaderValue::from_str(&token.authorization(grant.scheme()))
			.map_err(|e| ConfigError::from(oauth2::http::Error::from(e)))?;

		value.set_sensitive(true);

		Ok(value)
	}
}
impl RequestSignerExt<HeaderMap, Error> for GrantSigner {
	fn attach_token(&self, mut request: HeaderMap, grant: &Grant) -> Result<HeaderMap> {
		request.insert(AUTHORIZATION, Self::header_value(grant)?);

		Ok(request)
	}
}
#[cfg(feature = "reqwest")]
impl RequestSignerExt<reqwest::RequestBuilder, Error> for GrantSigner {
	fn attach_token(
		&self,
		request: reqwest::RequestBuilder,
		grant: &Grant,
	) -> Result<reqwest::RequestBuilder> {
		Ok(request.header(AUTHORIZATION, Self::header_value(grant)?))
	}
}
