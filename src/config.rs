//! Gateway configuration document.
//!
//! [`GatewayConfig`] is parsed from JSON; errors name the offending field path. Every section
//! is optional and falls back to the defaults the components use on their own.

// self
use crate::{
	_prelude::*,
	auth::ProductCode,
	cache::{CredentialCache, DEFAULT_TTL, TRUST_KEYS},
	error::ConfigError,
	ext::{ConfirmationRateLimiter, RateLimitPolicy},
	flows::CredentialProfile,
	provider::ProviderDescriptor,
	signature::{DEFAULT_SIGNATURE_FIELD, SignatureStrategy},
	trust::{
		APP_TOKEN_HEADER, TrustHeader, TrustKeySource, TrustVerifier, USER_TOKEN_HEADER,
		default_trust_headers,
	},
};
#[cfg(feature = "reqwest")]
use crate::{
	flows::ReqwestTokenManager,
	provider::{DefaultProviderStrategy, ProviderStrategy},
};

/// Root configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
	/// Credential profiles keyed by product code.
	#[serde(default)]
	pub profiles: BTreeMap<String, ProfileConfig>,
	/// Signature and trust key settings.
	#[serde(default)]
	pub trust: TrustConfig,
	/// Cache defaults.
	#[serde(default)]
	pub cache: CacheConfig,
	/// Interactive confirmation throttling.
	#[serde(default)]
	pub confirmation: ConfirmationConfig,
}
impl GatewayConfig {
	/// Parses and validates a JSON document.
	pub fn from_json(document: &str) -> Result<Self> {
		let mut de = serde_json::Deserializer::from_str(document);
		let config: Self = serde_path_to_error::deserialize(&mut de).map_err(|e| {
			ConfigError::InvalidDocument { path: e.path().to_string(), source: e.into_inner() }
		})?;

		config.validate()?;

		Ok(config)
	}

	/// Validates product codes and provider descriptors.
	pub fn validate(&self) -> Result<()> {
		for (code, profile) in &self.profiles {
			ProductCode::new(code).map_err(ConfigError::from)?;
			profile.provider.validate().map_err(ConfigError::from)?;
		}
		if !self.cache.default_ttl_secs.is_positive() {
			return Err(ConfigError::Insufficient { detail: "positive cache ttl" }.into());
		}

		Ok(())
	}

	/// Product codes of every configured profile.
	pub fn product_codes(&self) -> Result<Vec<ProductCode>> {
		self.profiles
			.keys()
			.map(|code| ProductCode::new(code).map_err(|e| Error::from(ConfigError::from(e))))
			.collect()
	}

	/// Builds the shared credential cache.
	pub fn credential_cache(&self) -> CredentialCache {
		CredentialCache::new(self.cache.default_ttl())
	}

	/// Builds the trust verifier reading keys from `cache`.
	pub fn trust_verifier(&self, cache: Arc<CredentialCache>) -> TrustVerifier {
		TrustVerifier::new(cache)
			.with_namespace(self.trust.namespace.clone())
			.with_headers(self.trust.headers.clone())
			.with_identity_header(self.trust.identity_header.clone())
			.with_user_header(self.trust.user_header.clone())
	}

	/// Builds the signature strategy backed by `verifier`.
	pub fn signature_strategy(&self, verifier: Arc<TrustVerifier>) -> SignatureStrategy {
		SignatureStrategy::new(verifier)
			.with_field(self.trust.signature_field.clone())
			.pass_request(true)
	}

	/// Builds the confirmation rate limiter.
	pub fn rate_limiter(&self) -> ConfirmationRateLimiter {
		ConfirmationRateLimiter::new(self.confirmation.policy())
	}

	/// Builds one reqwest-backed token manager per profile.
	#[cfg(feature = "reqwest")]
	pub fn token_managers(&self, cache: &Arc<CredentialCache>) -> Result<Vec<ReqwestTokenManager>> {
		let strategy: Arc<dyn ProviderStrategy> = Arc::new(DefaultProviderStrategy);

		self.profiles
			.iter()
			.map(|(code, profile)| -> Result<ReqwestTokenManager> {
				Ok(ReqwestTokenManager::new(
					ProductCode::new(code).map_err(ConfigError::from)?,
					cache.clone(),
					profile.provider.clone(),
					strategy.clone(),
					profile.credentials.clone(),
				))
			})
			.collect()
	}
}

/// Provider plus credentials for one product code.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProfileConfig {
	/// Provider descriptor; validated after parsing.
	pub provider: ProviderDescriptor,
	/// Credential fields, inlined next to `provider`.
	#[serde(flatten)]
	pub credentials: CredentialProfile,
}

/// Signature and trust settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
	/// Header (or key chain) holding the request signature.
	pub signature_field: String,
	/// Cache namespace holding trust keys.
	pub namespace: String,
	/// Header carrying the application token.
	pub identity_header: String,
	/// Header carrying the end-user token.
	pub user_header: String,
	/// Required/optional header table.
	pub headers: Vec<TrustHeader>,
	/// Remote trust key sources.
	pub sources: Vec<TrustKeySource>,
}
impl Default for TrustConfig {
	fn default() -> Self {
		Self {
			signature_field: DEFAULT_SIGNATURE_FIELD.into(),
			namespace: TRUST_KEYS.into(),
			identity_header: APP_TOKEN_HEADER.into(),
			user_header: USER_TOKEN_HEADER.into(),
			headers: default_trust_headers(),
			sources: Vec::new(),
		}
	}
}

/// Cache defaults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
	/// Ttl of implicitly created namespaces, in seconds.
	pub default_ttl_secs: i64,
}
impl CacheConfig {
	/// Default ttl as a [`Duration`].
	pub fn default_ttl(self) -> Duration {
		Duration::seconds(self.default_ttl_secs)
	}
}
impl Default for CacheConfig {
	fn default() -> Self {
		Self { default_ttl_secs: DEFAULT_TTL.whole_seconds() }
	}
}

/// Confirmation throttling timings, in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
	/// Block window added per consecutive failure.
	pub step_secs: i64,
	/// Age after which expired failure records are swept.
	pub retention_secs: i64,
	/// Sweeper period.
	pub sweep_secs: i64,
}
impl ConfirmationConfig {
	/// Converts the timings into a [`RateLimitPolicy`].
	pub fn policy(self) -> RateLimitPolicy {
		RateLimitPolicy {
			step: Duration::seconds(self.step_secs),
			retention: Duration::seconds(self.retention_secs),
			sweep_every: Duration::seconds(self.sweep_secs),
		}
	}
}
impl Default for ConfirmationConfig {
	fn default() -> Self {
		let policy = RateLimitPolicy::default();

		Self {
			step_secs: policy.step.whole_seconds(),
			retention_secs: policy.retention.whole_seconds(),
			sweep_secs: policy.sweep_every.whole_seconds(),
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::provider::GrantType;

	const DOCUMENT: &str = r#"{
		"profiles": {
			"acme": {
				"provider": {
					"id": "acme-idp",
					"endpoints": { "token": "https://idp.example.com/oauth/token" },
					"supported_grants": { "password": true, "refresh_token": true },
					"client_auth_method": "basic_header_only",
					"quirks": { "body_format": "json" }
				},
				"client_id": "gateway",
				"client_secret": "s3",
				"username": "ops",
				"password": "pw"
			}
		},
		"trust": {
			"sources": [
				{ "url": "https://keys.example.com/prod.pem", "environment": "prod", "priority": 1 }
			]
		},
		"confirmation": { "step_secs": 10 }
	}"#;

	#[test]
	fn documents_parse_with_defaults() {
		let config = GatewayConfig::from_json(DOCUMENT).expect("Document should parse.");
		let profile = &config.profiles["acme"];

		assert!(profile.provider.supports(GrantType::Password));
		assert_eq!(profile.credentials.username.as_deref(), Some("ops"));
		assert_eq!(config.trust.signature_field, DEFAULT_SIGNATURE_FIELD);
		assert_eq!(config.trust.sources[0].priority, 1);
		assert_eq!(config.cache.default_ttl(), DEFAULT_TTL);
		assert_eq!(config.confirmation.policy().step, Duration::seconds(10));
		assert_eq!(config.confirmation.policy().sweep_every, Duration::minutes(30));
	}

	#[test]
	fn parse_errors_report_the_field_path() {
		let err = GatewayConfig::from_json(r#"{ "cache": { "default_ttl_secs": "day" } }"#)
			.expect_err("Strings are not valid ttls.");

		match err {
			Error::Config(ConfigError::InvalidDocument { path, .. }) =>
				assert_eq!(path, "cache.default_ttl_secs"),
			other => panic!("Unexpected error: {other:?}."),
		}
	}

	#[test]
	fn insecure_descriptors_are_rejected() {
		let document = DOCUMENT.replace("https://idp", "http://idp");
		let err = GatewayConfig::from_json(&document).expect_err("HTTP endpoints must fail.");

		assert!(err.is_reference());
	}
}
