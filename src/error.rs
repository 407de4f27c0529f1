//! Crate-level error types shared across the cache, trust, and credential flows.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Message surfaced for every failure caused by incomplete credential configuration.
pub const INSUFFICIENT_CONFIGURATION: &str = "Insufficient authentication configurations";

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Credential cache failure.
	#[error("{0}")]
	Cache(
		#[from]
		#[source]
		crate::cache::CacheError,
	),
	/// Local configuration problem; never retried.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Unexpected upstream response.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// The inbound request carried no usable signature.
	#[error("Missing signature")]
	MissingSignature,
	/// A required header was absent from the inbound request.
	#[error("Missing required header {name}")]
	MissingHeader {
		/// Header name as declared in the trust header table.
		name: String,
	},
	/// No trust key verified the request signature.
	#[error("Signature validation failed")]
	SignatureMismatch,
	/// Caller or client authentication was rejected (HTTP 401).
	#[error("Unauthorized: {reason}.")]
	Unauthorized {
		/// Provider- or gateway-supplied reason string.
		reason: String,
	},
	/// Caller lacks permission or the grant must be refreshed (HTTP 403).
	#[error("Forbidden: {reason}.")]
	Forbidden {
		/// Provider- or gateway-supplied reason string.
		reason: String,
	},
	/// Provider rejected the supplied credentials (HTTP 400); never retried.
	#[error("Provider rejected the grant: {reason}.")]
	InvalidGrant {
		/// Provider- or gateway-supplied reason string.
		reason: String,
	},
	/// The per-identity attempt ceiling was reached.
	#[error("Too many attempts")]
	TooManyAttempts,
	/// Interactive confirmations from this address are temporarily blocked.
	#[error("Too many failed attempts. Try again in {} seconds.", whole_seconds_ceil(*.wait))]
	RateLimited {
		/// Remaining time until the address may retry.
		wait: Duration,
	},
}
impl Error {
	/// HTTP-style status code reported for this error.
	pub fn status(&self) -> u16 {
		match self {
			Self::MissingSignature
			| Self::MissingHeader { .. }
			| Self::SignatureMismatch
			| Self::Unauthorized { .. }
			| Self::TooManyAttempts => 401,
			Self::Forbidden { .. } => 403,
			Self::InvalidGrant { .. } => 400,
			Self::RateLimited { .. } => 429,
			Self::Cache(_) | Self::Config(_) | Self::Transient(_) | Self::Transport(_) => 500,
		}
	}

	/// Returns `true` for failures that originate locally (configuration, cache) and must never
	/// trigger a retry against the provider.
	pub fn is_reference(&self) -> bool {
		matches!(self, Self::Config(_) | Self::Cache(_))
	}

	/// Returns `true` when the status-code recovery table allows another attempt (401 re-auth
	/// or refresh, 403 refresh). Reference errors and bad credentials are final.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Unauthorized { .. } | Self::Forbidden { .. })
	}

	/// Message exposed to request callers.
	///
	/// Internal failures collapse into fixed strings so upstream details never leak.
	pub fn public_message(&self) -> String {
		match self {
			Self::Config(_) => INSUFFICIENT_CONFIGURATION.into(),
			Self::Cache(_) | Self::Transient(_) | Self::Transport(_) => "Unexpected error".into(),
			other => other.to_string(),
		}
	}
}

fn whole_seconds_ceil(wait: Duration) -> i64 {
	let whole = wait.whole_seconds();

	if wait.subsec_nanoseconds() > 0 {
		whole + 1
	} else {
		whole
	}
}

/// Normalized error payload returned to request callers: `{ "error": { status, message } }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
	/// Status and message pair.
	pub error: ErrorDetail,
}
impl From<&Error> for ErrorBody {
	fn from(err: &Error) -> Self {
		Self { error: ErrorDetail { status: err.status(), message: err.public_message() } }
	}
}

/// Inner status/message pair of an [`ErrorBody`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
	/// HTTP-style status code.
	pub status: u16,
	/// Human-readable message.
	pub message: String,
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Redirect URI cannot be parsed.
	#[error("Redirect URI is invalid.")]
	InvalidRedirect {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Gateway configuration document could not be parsed.
	#[error("Configuration is invalid at `{path}`.")]
	InvalidDocument {
		/// JSON path of the offending field.
		path: String,
		/// Underlying parsing failure.
		#[source]
		source: serde_json::Error,
	},
	/// Descriptor validation failed.
	#[error(transparent)]
	Descriptor(#[from] crate::provider::ProviderDescriptorError),
	/// Product code failed validation.
	#[error(transparent)]
	Identifier(#[from] crate::auth::IdentifierError),

	/// The profile is missing the fields needed to select a grant strategy.
	#[error("Insufficient authentication configurations: {detail}.")]
	Insufficient {
		/// Which part of the configuration is missing.
		detail: &'static str,
	},
	/// Descriptor does not enable the requested grant.
	#[error("Descriptor `{descriptor}` does not enable the {grant} grant.")]
	UnsupportedGrant {
		/// Provider identifier string.
		descriptor: String,
		/// Disabled grant label.
		grant: &'static str,
	},
	/// Cached grant is missing a refresh secret.
	#[error("Cached grant is missing a refresh token.")]
	MissingRefreshToken,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Unexpected provider responses that do not map onto an authentication outcome.
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Provider returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Provider- or gateway-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Token endpoint responded with malformed JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// An authorized outbound call failed with a status outside the recovery table.
	#[error("Upstream call returned status {status}: {message}.")]
	Upstream {
		/// HTTP status code.
		status: u16,
		/// Caller-supplied reason.
		message: String,
	},
	/// A trust key source served something that is not an RSA public key.
	#[error("Trust key source `{url}` served an invalid key: {message}.")]
	InvalidTrustKey {
		/// Source URL.
		url: String,
		/// Parser message.
		message: String,
	},
	/// A trust key source answered with a non-success status.
	#[error("Trust key source `{url}` returned status {status}.")]
	TrustSource {
		/// Source URL.
		url: String,
		/// HTTP status code.
		status: u16,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the upstream endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the upstream endpoint.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn status_table_covers_authentication_failures() {
		assert_eq!(Error::SignatureMismatch.status(), 401);
		assert_eq!(Error::Forbidden { reason: "scope".into() }.status(), 403);
		assert_eq!(Error::InvalidGrant { reason: "password".into() }.status(), 400);
		assert_eq!(Error::RateLimited { wait: Duration::seconds(12) }.status(), 429);
		assert_eq!(Error::from(ConfigError::MissingRefreshToken).status(), 500);
	}

	#[test]
	fn error_body_hides_internal_details() {
		let err = Error::from(ConfigError::Insufficient { detail: "token endpoint" });
		let body = ErrorBody::from(&err);

		assert_eq!(body.error.status, 500);
		assert_eq!(body.error.message, INSUFFICIENT_CONFIGURATION);
		assert!(err.is_reference());

		let json = serde_json::to_value(&body).expect("Error body should serialize.");

		assert_eq!(json["error"]["status"], 500);
	}

	#[test]
	fn rate_limited_message_reports_remaining_seconds() {
		let err = Error::RateLimited { wait: Duration::seconds(42) };

		assert_eq!(err.to_string(), "Too many failed attempts. Try again in 42 seconds.");
	}

	#[test]
	fn rate_limited_message_rounds_partial_seconds_up() {
		let err = Error::RateLimited { wait: Duration::milliseconds(400) };

		assert_eq!(err.to_string(), "Too many failed attempts. Try again in 1 seconds.");

		let err = Error::RateLimited { wait: Duration::milliseconds(41_001) };

		assert_eq!(err.to_string(), "Too many failed attempts. Try again in 42 seconds.");
	}

	#[test]
	fn header_failures_name_the_header() {
		let err = Error::MissingHeader { name: "x-app-token".into() };

		assert_eq!(err.to_string(), "Missing required header x-app-token");
		assert!(!err.is_reference());
	}

	#[test]
	fn only_authorization_failures_are_retryable() {
		assert!(Error::Unauthorized { reason: "expired".into() }.is_retryable());
		assert!(Error::Forbidden { reason: "scope".into() }.is_retryable());
		assert!(!Error::InvalidGrant { reason: "password".into() }.is_retryable());
		assert!(!Error::TooManyAttempts.is_retryable());
		assert!(!Error::from(ConfigError::MissingRefreshToken).is_retryable());
	}
}
