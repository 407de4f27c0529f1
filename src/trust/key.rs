//! Trust key records stored in the credential cache.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, crypto, errors::Error as JwtError};
// self
use crate::_prelude::*;

/// RSA public key plus the trust environment it vouches for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustKeyRecord {
	/// URL the key was fetched from; doubles as its cache key.
	pub source_url: String,
	/// PEM-encoded RSA public key.
	pub public_key: String,
	/// Environment tag reported when this key matches.
	pub environment: String,
	/// Lower values are tried first.
	#[serde(default)]
	pub priority: i64,
}
impl TrustKeyRecord {
	/// Creates a record.
	pub fn new(
		source_url: impl Into<String>,
		public_key: impl Into<String>,
		environment: impl Into<String>,
		priority: i64,
	) -> Self {
		Self {
			source_url: source_url.into(),
			public_key: public_key.into(),
			environment: environment.into(),
			priority,
		}
	}

	/// Parses the PEM material.
	pub fn decoding_key(&self) -> Result<DecodingKey, JwtError> {
		DecodingKey::from_rsa_pem(self.public_key.as_bytes())
	}

	/// Checks an RSA-SHA256 signature of `message` against this key.
	pub fn verifies(&self, message: &[u8], signature: &[u8]) -> Result<bool, JwtError> {
		let key = self.decoding_key()?;

		crypto::verify(&URL_SAFE_NO_PAD.encode(signature), message, &key, Algorithm::RS256)
	}
}
