//! Provider strategy hooks that customize token exchanges.
//!
//! Implementations decorate outgoing token requests and classify provider failures without
//! tying flows to any particular HTTP client.

// self
use crate::{_prelude::*, provider::descriptor::GrantType};

/// Strategy hook that allows providers to decorate requests and classify errors.
pub trait ProviderStrategy
where
	Self: Send + Sync,
{
	/// Maps a failed token request onto a recovery category.
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind;

	/// Adds provider-specific parameters (audience, resource, ...) before dispatching.
	fn augment_token_request(&self, _grant: GrantType, _params: &mut BTreeMap<String, String>) {}
}

/// Provider error categories; each maps onto one recovery path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
	/// Bad credentials (HTTP 400); fail without retrying.
	InvalidGrant,
	/// Client or token rejected (HTTP 401); refresh if possible, otherwise re-authenticate.
	InvalidClient,
	/// Token lacks rights or must be refreshed (HTTP 403).
	InsufficientScope,
	/// Anything else; surfaced as an unexpected error.
	Transient,
}
impl ProviderErrorKind {
	/// Converts the category into the crate error carrying `reason`.
	pub fn into_error(self, reason: String, status: Option<u16>) -> Error {
		match self {
			Self::InvalidGrant => Error::InvalidGrant { reason },
			Self::InvalidClient => Error::Unauthorized { reason },
			Self::InsufficientScope => Error::Forbidden { reason },
			Self::Transient => crate::error::TransientError::TokenEndpoint {
				message: reason,
				status,
				retry_after: None,
			}
			.into(),
		}
	}
}

/// Context passed to provider strategies when classifying token errors.
///
/// Only primitive data (status code, OAuth fields, body preview) is carried so strategies stay
/// decoupled from the HTTP client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderErrorContext {
	/// Grant type associated with the failing request.
	pub grant_type: GrantType,
	/// HTTP status code returned by the provider, when available.
	pub http_status: Option<u16>,
	/// Provider-supplied OAuth `error` field.
	pub oauth_error: Option<String>,
	/// Provider-supplied `error_description` (or `message`) field.
	pub error_description: Option<String>,
	/// Preview of the response body for non-JSON payloads.
	pub body_preview: Option<String>,
}
impl ProviderErrorContext {
	const BODY_PREVIEW_LIMIT: usize = 256;

	/// Creates a new context scoped to the provided grant type.
	pub fn new(grant_type: GrantType) -> Self {
		Self {
			grant_type,
			http_status: None,
			oauth_error: None,
			error_description: None,
			body_preview: None,
		}
	}

	/// Adds an HTTP status code.
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Adds the OAuth error code string returned by the provider.
	pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
		self.oauth_error = Some(error.into());

		self
	}

	/// Adds the `error_description` field.
	pub fn with_error_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}

	/// Adds a body preview for providers that return non-JSON payloads.
	pub fn with_body_preview(mut self, body: impl Into<String>) -> Self {
		self.body_preview = Some(body.into().chars().take(Self::BODY_PREVIEW_LIMIT).collect());

		self
	}

	/// Best human-readable reason available.
	pub fn reason(&self) -> String {
		self.error_description
			.clone()
			.or_else(|| self.oauth_error.clone())
			.or_else(|| self.body_preview.clone().filter(|body| !body.trim().is_empty()))
			.unwrap_or_else(|| match self.http_status {
				Some(status) => format!("token endpoint answered with status {status}"),
				None => "token endpoint request failed".into(),
			})
	}
}

/// Default strategy: the HTTP status selects the category, OAuth fields break ties.
///
/// 400/401/403 map directly onto [`ProviderErrorKind::InvalidGrant`],
/// [`ProviderErrorKind::InvalidClient`] and [`ProviderErrorKind::InsufficientScope`]. Other
/// statuses fall back to the OAuth `error` code, then to hints in the body.
#[derive(Debug, Default)]
pub struct DefaultProviderStrategy;
impl Display for DefaultProviderStrategy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("default-provider-strategy")
	}
}
impl ProviderStrategy for DefaultProviderStrategy {
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind {
		if let Some(kind) = classify_status(ctx.http_status) {
			return kind;
		}

		ctx.oauth_error
			.as_deref()
			.and_then(classify_oauth_error)
			.or_else(|| classify_body(ctx.error_description.as_deref()))
			.or_else(|| classify_body(ctx.body_preview.as_deref()))
			.unwrap_or(ProviderErrorKind::Transient)
	}
}

fn classify_status(status: Option<u16>) -> Option<ProviderErrorKind> {
	match status? {
		400 => Some(ProviderErrorKind::InvalidGrant),
		401 => Some(ProviderErrorKind::InvalidClient),
		403 => Some(ProviderErrorKind::InsufficientScope),
		_ => None,
	}
}

fn classify_oauth_error(value: &str) -> Option<ProviderErrorKind> {
	match value.to_ascii_lowercase().as_str() {
		"invalid_grant" | "invalid_request" | "unsupported_grant_type" | "access_denied" =>
			Some(ProviderErrorKind::InvalidGrant),
		"invalid_client" | "unauthorized_client" | "invalid_token" =>
			Some(ProviderErrorKind::InvalidClient),
		"invalid_scope" | "insufficient_scope" => Some(ProviderErrorKind::InsufficientScope),
		_ => None,
	}
}

fn classify_body(body: Option<&str>) -> Option<ProviderErrorKind> {
	let lowered = body?.to_ascii_lowercase();

	if lowered.contains("invalid_grant") {
		Some(ProviderErrorKind::InvalidGrant)
	} else if lowered.contains("invalid_client") || lowered.contains("invalid_token") {
		Some(ProviderErrorKind::InvalidClient)
	} else if lowered.contains("insufficient_scope") || lowered.contains("invalid_scope") {
		Some(ProviderErrorKind::InsufficientScope)
	} else {
		None
	}
}
