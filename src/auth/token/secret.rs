//! Redacted wrapper for access tokens, refresh tokens, and client secrets.

// self
use crate::_prelude::*;

/// Redacted secret wrapper keeping sensitive material out of logs and debug output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Returns `true` when the secret holds no characters.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Formats the value of an `Authorization` header, e.g. `Bearer <token>`.
	pub fn authorization(&self, scheme: &str) -> String {
		format!("{scheme} {}", self.0)
	}

	/// Constant-shape comparison against a candidate supplied by an operator.
	pub fn matches(&self, candidate: &str) -> bool {
		let expected = self.0.as_bytes();
		let candidate = candidate.as_bytes();

		if expected.len() != candidate.len() {
			return false;
		}

		expected.iter().zip(candidate).fold(0_u8, |acc, (a, b)| acc | (a ^ b)) == 0
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}
