//! Grant documents persisted per product code, plus their builder and lifecycle helpers.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Errors produced by [`GrantBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum GrantBuilderError {
	/// Issued when neither an access token nor a legacy token was provided.
	#[error("Access token is required.")]
	MissingToken,
	/// Issued when the provider lifetime is zero or negative.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiry,
}

/// Persisted access credential for one product code.
///
/// The document is stored in the credential cache under the grant namespace. The `attempts`
/// counter lives inside the document, so storing a freshly issued grant resets it.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Grant {
	/// Standard OAuth 2.0 access token.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub access_token: Option<TokenSecret>,
	/// Token issued by providers that answer with a bare `token` field.
	#[serde(default, rename = "token", skip_serializing_if = "Option::is_none")]
	pub legacy_token: Option<TokenSecret>,
	/// Refresh token, if the provider issued one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh_token: Option<TokenSecret>,
	/// Provider-reported token type (`bearer` when absent).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token_type: Option<String>,
	/// Provider-supplied lifetime in seconds.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expires_in: Option<i64>,
	/// Instant the grant was issued.
	#[serde(
		default,
		skip_serializing_if = "Option::is_none",
		with = "time::serde::timestamp::option"
	)]
	pub issued_at: Option<OffsetDateTime>,
	/// Grant attempts made since the last successfully stored grant.
	#[serde(default)]
	pub attempts: u32,
}
impl Grant {
	/// Returns a builder for provider responses.
	pub fn builder() -> GrantBuilder {
		GrantBuilder::default()
	}

	/// Token used for outbound authorization, preferring the standard access token.
	pub fn token(&self) -> Option<&TokenSecret> {
		self.access_token
			.as_ref()
			.filter(|secret| !secret.is_empty())
			.or_else(|| self.legacy_token.as_ref().filter(|secret| !secret.is_empty()))
	}

	/// Returns `true` when the document carries a token (attempt placeholders do not).
	pub fn is_usable(&self) -> bool {
		self.token().is_some()
	}

	/// Returns `true` if a refresh token is available.
	pub fn can_refresh(&self) -> bool {
		self.refresh_token.as_ref().is_some_and(|secret| !secret.is_empty())
	}

	/// Provider lifetime as a [`Duration`].
	pub fn lifetime(&self) -> Option<Duration> {
		self.expires_in.filter(|secs| *secs > 0).map(Duration::seconds)
	}

	/// Expiry instant derived from `issued_at + expires_in`.
	pub fn expires_at(&self) -> Option<OffsetDateTime> {
		Some(self.issued_at? + self.lifetime()?)
	}

	/// Returns `true` if the grant has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		self.expires_at().is_some_and(|expiry| instant >= expiry)
	}

	/// Authorization scheme derived from the token type.
	pub fn scheme(&self) -> &str {
		match self.token_type.as_deref() {
			Some(kind) if !kind.eq_ignore_ascii_case("bearer") => kind,
			_ => "Bearer",
		}
	}

	/// JSON document handed to external systems: token, refresh token, scheme, and lifetime.
	pub fn handoff_document(&self) -> Value {
		serde_json::json!({
			"access_token": self.token().map(TokenSecret::expose),
			"refresh_token": self.refresh_token.as_ref().map(TokenSecret::expose),
			"token_type": self.scheme(),
			"expires_in": self.expires_in,
		})
	}

	/// Copy of the document with the attempt counter advanced by one.
	pub(crate) fn with_attempt(&self) -> Self {
		let mut next = self.clone();

		next.attempts = next.attempts.saturating_add(1);

		next
	}
}
impl Debug for Grant {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Grant")
			.field("token", &self.token().map(|_| "<redacted>"))
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("token_type", &self.token_type)
			.field("expires_in", &self.expires_in)
			.field("issued_at", &self.issued_at)
			.field("attempts", &self.attempts)
			.finish()
	}
}

/// Builder for [`Grant`].
#[derive(Clone, Debug, Default)]
pub struct GrantBuilder {
	access_token: Option<TokenSecret>,
	legacy_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	token_type: Option<String>,
	expires_in: Option<i64>,
	issued_at: Option<OffsetDateTime>,
}
impl GrantBuilder {
	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides a legacy `token` value.
	pub fn legacy_token(mut self, token: impl Into<String>) -> Self {
		self.legacy_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Sets the provider-reported token type.
	pub fn token_type(mut self, kind: impl Into<String>) -> Self {
		self.token_type = Some(kind.into());

		self
	}

	/// Sets the provider lifetime in seconds.
	pub fn expires_in(mut self, seconds: i64) -> Self {
		self.expires_in = Some(seconds);

		self
	}

	/// Sets the issued-at instant.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Consumes the builder and produces a [`Grant`] with a zeroed attempt counter.
	pub fn build(self) -> Result<Grant, GrantBuilderError> {
		if self.access_token.is_none() && self.legacy_token.is_none() {
			return Err(GrantBuilderError::MissingToken);
		}
		if self.expires_in.is_some_and(|secs| secs <= 0) {
			return Err(GrantBuilderError::NonPositiveExpiry);
		}

		Ok(Grant {
			access_token: self.access_token,
			legacy_token: self.legacy_token,
			refresh_token: self.refresh_token,
			token_type: self.token_type,
			expires_in: self.expires_in,
			issued_at: Some(self.issued_at.unwrap_or_else(OffsetDateTime::now_utc)),
			attempts: 0,
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn legacy_token_is_used_when_access_token_is_absent() {
		let grant = Grant::builder()
			.legacy_token("legacy")
			.build()
			.expect("Legacy-only grants should build.");

		assert_eq!(grant.token().map(TokenSecret::expose), Some("legacy"));
		assert!(grant.is_usable());
		assert!(!grant.can_refresh());
	}

	#[test]
	fn builder_rejects_missing_token_and_bad_lifetime() {
		assert_eq!(
			Grant::builder().build().expect_err("Token-less grants should fail."),
			GrantBuilderError::MissingToken
		);
		assert_eq!(
			Grant::builder()
				.access_token("a")
				.expires_in(0)
				.build()
				.expect_err("Zero lifetimes should fail."),
			GrantBuilderError::NonPositiveExpiry
		);
	}

	#[test]
	fn expiry_is_derived_from_issue_time() {
		let issued = macros::datetime!(2025-11-10 12:00 UTC);
		let grant = Grant::builder()
			.access_token("a")
			.expires_in(3600)
			.issued_at(issued)
			.build()
			.expect("Grant fixture should build.");

		assert_eq!(grant.expires_at(), Some(issued + Duration::hours(1)));
		assert!(!grant.is_expired_at(issued + Duration::minutes(59)));
		assert!(grant.is_expired_at(issued + Duration::hours(1)));
	}

	#[test]
	fn attempt_placeholders_are_not_usable() {
		let placeholder = Grant::default().with_attempt().with_attempt();

		assert_eq!(placeholder.attempts, 2);
		assert!(!placeholder.is_usable());

		let json = serde_json::to_value(&placeholder).expect("Placeholder should serialize.");

		assert_eq!(json, serde_json::json!({ "attempts": 2 }));
	}

	#[test]
	fn provider_documents_deserialize_without_attempts() {
		let grant: Grant = serde_json::from_str(
			r#"{"access_token":"abc","refresh_token":"def","expires_in":60,"token_type":"bearer"}"#,
		)
		.expect("Provider-shaped documents should deserialize.");

		assert_eq!(grant.attempts, 0);
		assert_eq!(grant.scheme(), "Bearer");
		assert!(grant.can_refresh());
	}
}
