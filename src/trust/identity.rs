//! Identity extraction from self-issued, dot-delimited application tokens.
//!
//! Only the payload segment is decoded. The token's own signature is never checked: trust is
//! established solely by the outer request signature.

// crates.io
use base64::{
	Engine as _,
	engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
// self
use crate::_prelude::*;

/// Returns the `sub` claim of the token's payload segment.
pub fn token_subject(token: &str) -> Option<String> {
	let segment = token.split('.').nth(1)?;
	let bytes = URL_SAFE_NO_PAD
		.decode(segment.trim_end_matches('='))
		.ok()
		.or_else(|| STANDARD.decode(segment).ok())?;
	let claims = serde_json::from_slice::<Value>(&bytes).ok()?;

	match claims.get("sub")? {
		Value::String(sub) if !sub.is_empty() => Some(sub.clone()),
		Value::Number(sub) => Some(sub.to_string()),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn token(payload: &str) -> String {
		format!("e30.{}.c2ln", URL_SAFE_NO_PAD.encode(payload))
	}

	#[test]
	fn reads_string_and_numeric_subjects() {
		assert_eq!(token_subject(&token(r#"{"sub":"app-42"}"#)).as_deref(), Some("app-42"));
		assert_eq!(token_subject(&token(r#"{"sub":7}"#)).as_deref(), Some("7"));
	}

	#[test]
	fn accepts_padded_standard_segments() {
		let padded = format!("e30.{}.sig", STANDARD.encode(r#"{"sub":"padded?"}"#));

		assert_eq!(token_subject(&padded).as_deref(), Some("padded?"));
	}

	#[test]
	fn rejects_malformed_tokens() {
		assert_eq!(token_subject("no-dots"), None);
		assert_eq!(token_subject("a.!!!.c"), None);
		assert_eq!(token_subject(&token(r#"{"iss":"x"}"#)), None);
		assert_eq!(token_subject(&token(r#"{"sub":""}"#)), None);
	}
}
