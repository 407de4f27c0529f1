//! Loading trust keys from remote PEM sources into the credential cache.

// crates.io
use oauth2::http::{Method, Request, header::ACCEPT};
// self
use crate::{
	_prelude::*,
	cache::{CredentialCache, TRUST_KEYS},
	error::{ConfigError, TransientError, TransportError},
	http::{self, TokenHttpClient},
	obs::{self, FlowKind},
	trust::TrustKeyRecord,
};

/// Remote location serving one RSA public key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustKeySource {
	/// URL serving the PEM (or a JSON document with a `public_key` field).
	pub url: Url,
	/// Environment tag reported when the key matches.
	pub environment: String,
	/// Lower values are tried first.
	#[serde(default)]
	pub priority: i64,
}

/// Fetches [`TrustKeySource`]s through a [`TokenHttpClient`] and caches the resulting records.
pub struct TrustKeyLoader<C>
where
	C: ?Sized + TokenHttpClient,
{
	http_client: Arc<C>,
	cache: Arc<CredentialCache>,
	namespace: String,
}
impl<C> TrustKeyLoader<C>
where
	C: ?Sized + TokenHttpClient,
{
	/// Creates a loader writing into the default trust key namespace.
	pub fn new(http_client: impl Into<Arc<C>>, cache: Arc<CredentialCache>) -> Self {
		Self { http_client: http_client.into(), cache, namespace: TRUST_KEYS.into() }
	}

	/// Overrides the target namespace.
	pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
		self.namespace = namespace.into();

		self
	}

	/// Loads every source, skipping (and logging) the ones that fail.
	///
	/// Returns how many records were written. Records of other sources already in the cache
	/// are left untouched.
	pub async fn load(&self, sources: &[TrustKeySource]) -> Result<usize> {
		obs::observe(FlowKind::TrustKeyLoad, "load", async move {
			let mut loaded = 0;

			for source in sources {
				match self.fetch(source).await {
					Ok(record) => {
						self.cache.set(&self.namespace, &record.source_url, &record)?;

						loaded += 1;
					},
					Err(e) => tracing::warn!(
						source = %source.url,
						error = %e,
						"Skipping trust key source."
					),
				}
			}

			Ok(loaded)
		})
		.await
	}

	/// Fetches and validates a single source without caching it.
	pub async fn fetch(&self, source: &TrustKeySource) -> Result<TrustKeyRecord> {
		let request = Request::builder()
			.method(Method::GET)
			.uri(source.url.as_str())
			.header(ACCEPT, "application/x-pem-file, application/json, text/plain")
			.body(Vec::new())
			.map_err(ConfigError::from)?;
		let (response, _) = http::send(self.http_client.as_ref(), request).await;
		let response = response.map_err(TransportError::network)?;
		let status = response.status();

		if !status.is_success() {
			return Err(TransientError::TrustSource {
				url: source.url.to_string(),
				status: status.as_u16(),
			}
			.into());
		}

		let body = String::from_utf8_lossy(response.body());
		let pem = extract_pem(&body).ok_or_else(|| TransientError::InvalidTrustKey {
			url: source.url.to_string(),
			message: "no PEM material found".into(),
		})?;
		let record = TrustKeyRecord::new(
			source.url.as_str(),
			pem,
			source.environment.clone(),
			source.priority,
		);

		record.decoding_key().map_err(|e| TransientError::InvalidTrustKey {
			url: source.url.to_string(),
			message: e.to_string(),
		})?;

		Ok(record)
	}
}
impl<C> Debug for TrustKeyLoader<C>
where
	C: ?Sized + TokenHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TrustKeyLoader").field("namespace", &self.namespace).finish()
	}
}

fn extract_pem(body: &str) -> Option<String> {
	let trimmed = body.trim();

	if trimmed.starts_with('{') {
		let document = serde_json::from_str::<Value>(trimmed).ok()?;

		return ["public_key", "publicKey", "key"]
			.iter()
			.find_map(|field| document.get(field).and_then(Value::as_str))
			.map(|pem| pem.trim().to_owned());
	}

	trimmed.contains("-----BEGIN").then(|| trimmed.to_owned())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn pem_is_read_from_plain_and_json_bodies() {
		let pem = "-----BEGIN PUBLIC KEY-----\nabc\n-----END PUBLIC KEY-----";

		assert_eq!(extract_pem(&format!("\n{pem}\n")).as_deref(), Some(pem));

		let json = serde_json::json!({ "publicKey": pem }).to_string();

		assert_eq!(extract_pem(&json).as_deref(), Some(pem));
		assert_eq!(extract_pem("<html>nope</html>"), None);
	}
}
