//! Token endpoint facade.
//!
//! [`TokenRequest`] describes a single grant call (endpoint, parameters, optional
//! `Authorization` header). The facade encodes it as form or JSON, sends it through the
//! configured [`TokenHttpClient`], and turns the answer into a [`Grant`] or a classified
//! [`Error`]. Requests are assembled by hand rather than through `oauth2::BasicClient` because
//! providers in scope answer with legacy `token` fields, omit `expires_in`, accept JSON bodies,
//! or want refresh tokens in headers.

pub use oauth2;

// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
use oauth2::{
	HttpClientError, HttpRequest, HttpResponse,
	http::{
		Method, Request,
		header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
	},
};
use url::form_urlencoded;
// self
use crate::{
	_prelude::*,
	auth::{Grant, GrantBuilderError, TokenSecret},
	error::{ConfigError, TransientError, TransportError},
	http::{self, ResponseMetadata, TokenHttpClient},
	provider::{BodyFormat, GrantType, ProviderErrorContext, ProviderErrorKind, ProviderStrategy},
};

type FacadeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Parameters whose values are redacted in [`TokenRequest`] debug output.
const SECRET_PARAMS: [&str; 5] =
	["client_secret", "password", "refresh_token", "code", "code_verifier"];

/// Maps HTTP transport failures into crate [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into a crate error.
	fn map_transport_error(
		&self,
		grant: GrantType,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		grant: GrantType,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(grant, meta, *inner),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			HttpClientError::Other(message) => TransientError::TokenEndpoint {
				message: format!("HTTP client error during the {grant} grant: {message}"),
				status: meta.and_then(|meta| meta.status),
				retry_after: meta.and_then(|meta| meta.retry_after),
			}
			.into(),
			_ => TransientError::TokenEndpoint {
				message: format!("HTTP client error during the {grant} grant"),
				status: meta.and_then(|meta| meta.status),
				retry_after: meta.and_then(|meta| meta.retry_after),
			}
			.into(),
		}
	}
}

/// One token endpoint call before encoding.
#[derive(Clone)]
pub struct TokenRequest {
	/// Grant being requested.
	pub grant: GrantType,
	/// Target endpoint.
	pub endpoint: Url,
	/// Body parameters.
	pub params: BTreeMap<String, String>,
	/// Full `Authorization` header value, if any.
	pub authorization: Option<TokenSecret>,
}
impl TokenRequest {
	/// Creates a request carrying `grant_type`.
	pub fn new(grant: GrantType, endpoint: Url) -> Self {
		let mut params = BTreeMap::new();

		params.insert("grant_type".into(), grant.as_str().into());

		Self { grant, endpoint, params, authorization: None }
	}

	/// Adds or replaces a body parameter.
	pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.params.insert(name.into(), value.into());

		self
	}

	/// Sends client credentials as an HTTP Basic header.
	pub fn basic_auth(mut self, client_id: &str, client_secret: &str) -> Self {
		let encode =
			|value: &str| form_urlencoded::byte_serialize(value.as_bytes()).collect::<String>();
		let credentials = format!("{}:{}", encode(client_id), encode(client_secret));

		self.authorization =
			Some(TokenSecret::new(format!("Basic {}", STANDARD.encode(credentials))));

		self
	}

	/// Sends `token` as a bearer header.
	pub fn bearer(mut self, token: &TokenSecret) -> Self {
		self.authorization = Some(TokenSecret::new(token.authorization("Bearer")));

		self
	}

	/// Encodes the request body and headers.
	pub fn encode(&self, format: BodyFormat) -> Result<HttpRequest> {
		let (content_type, body) = match format {
			BodyFormat::Form => (
				"application/x-www-form-urlencoded",
				form_urlencoded::Serializer::new(String::new())
					.extend_pairs(self.params.iter())
					.finish()
					.into_bytes(),
			),
			BodyFormat::Json => {
				let body = Value::from_iter(self.params.clone());

				("application/json", body.to_string().into_bytes())
			},
		};
		let mut builder = Request::builder()
			.method(Method::POST)
			.uri(self.endpoint.as_str())
			.header(CONTENT_TYPE, content_type)
			.header(ACCEPT, "application/json");

		if let Some(value) = &self.authorization {
			builder = builder.header(AUTHORIZATION, value.expose());
		}

		Ok(builder.body(body).map_err(ConfigError::from)?)
	}
}
impl Debug for TokenRequest {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let params = self
			.params
			.iter()
			.map(|(name, value)| {
				let redacted = SECRET_PARAMS.contains(&name.as_str());

				(name.as_str(), if redacted { "<redacted>" } else { value.as_str() })
			})
			.collect::<BTreeMap<_, _>>();

		f.debug_struct("TokenRequest")
			.field("grant", &self.grant)
			.field("endpoint", &self.endpoint.as_str())
			.field("params", &params)
			.field("authorization", &self.authorization.as_ref().map(|_| "<redacted>"))
			.finish()
	}
}

/// Sends [`TokenRequest`]s and maps responses.
pub(crate) struct TokenFacade<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	http_client: Arc<C>,
	error_mapper: Arc<M>,
}
impl<C, M> TokenFacade<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	pub(crate) fn new(http_client: Arc<C>, error_mapper: Arc<M>) -> Self {
		Self { http_client, error_mapper }
	}

	/// Performs the call and returns the issued grant (with a zeroed attempt counter).
	pub(crate) fn exchange<'a>(
		&'a self,
		strategy: &'a dyn ProviderStrategy,
		mut request: TokenRequest,
		format: BodyFormat,
	) -> FacadeFuture<'a, Grant> {
		Box::pin(async move {
			strategy.augment_token_request(request.grant, &mut request.params);

			tracing::debug!(request = ?request, "Calling token endpoint.");

			let grant = request.grant;
			let encoded = request.encode(format)?;
			let (response, meta) = http::send(self.http_client.as_ref(), encoded).await;
			let response = response
				.map_err(|e| self.error_mapper.map_transport_error(grant, meta.as_ref(), e))?;

			if !response.status().is_success() {
				return Err(map_error_response(strategy, grant, &response, meta.as_ref()));
			}

			parse_grant(&response)
		})
	}
}

#[derive(Deserialize)]
struct TokenEndpointResponse {
	#[serde(default)]
	access_token: Option<String>,
	#[serde(default)]
	token: Option<String>,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	token_type: Option<String>,
	#[serde(default)]
	expires_in: Option<ExpiresIn>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
	Seconds(i64),
	Text(String),
}
impl ExpiresIn {
	fn seconds(&self) -> Option<i64> {
		match self {
			Self::Seconds(secs) => Some(*secs),
			Self::Text(text) => text.trim().parse().ok(),
		}
	}
}

#[derive(Default, Deserialize)]
struct ErrorEndpointResponse {
	#[serde(default)]
	error: Option<Value>,
	#[serde(default)]
	error_description: Option<String>,
	#[serde(default)]
	message: Option<String>,
}

fn parse_grant(response: &HttpResponse) -> Result<Grant> {
	let status = Some(response.status().as_u16());
	let mut de = serde_json::Deserializer::from_slice(response.body());
	let body: TokenEndpointResponse = serde_path_to_error::deserialize(&mut de)
		.map_err(|source| TransientError::TokenResponseParse { source, status })?;
	let mut builder = Grant::builder().issued_at(OffsetDateTime::now_utc());

	if let Some(token) = body.access_token {
		builder = builder.access_token(token);
	}
	if let Some(token) = body.token {
		builder = builder.legacy_token(token);
	}
	if let Some(refresh) = body.refresh_token {
		builder = builder.refresh_token(refresh);
	}
	if let Some(kind) = body.token_type {
		builder = builder.token_type(kind);
	}
	// A non-positive lifetime means the provider did not state one.
	if let Some(secs) = body.expires_in.as_ref().and_then(ExpiresIn::seconds).filter(|s| *s > 0) {
		builder = builder.expires_in(secs);
	}

	builder.build().map_err(|e| {
		let message = match e {
			GrantBuilderError::MissingToken => "response carried no access token",
			GrantBuilderError::NonPositiveExpiry => "response carried a non-positive lifetime",
		};

		TransientError::TokenEndpoint { message: message.into(), status, retry_after: None }.into()
	})
}

fn map_error_response(
	strategy: &dyn ProviderStrategy,
	grant: GrantType,
	response: &HttpResponse,
	meta: Option<&ResponseMetadata>,
) -> Error {
	let status = response.status().as_u16();
	let body = String::from_utf8_lossy(response.body());
	let parsed = serde_json::from_str::<ErrorEndpointResponse>(&body).unwrap_or_default();
	let mut ctx = ProviderErrorContext::new(grant).with_http_status(status);

	match parsed.error {
		Some(Value::String(code)) => ctx = ctx.with_oauth_error(code),
		Some(Value::Object(nested)) =>
			if let Some(message) = nested.get("message").and_then(Value::as_str) {
				ctx = ctx.with_error_description(message);
			},
		_ => {},
	}
	if let Some(description) = parsed.error_description.or(parsed.message) {
		ctx = ctx.with_error_description(description);
	}
	if ctx.oauth_error.is_none() && ctx.error_description.is_none() {
		ctx = ctx.with_body_preview(body.into_owned());
	}

	let reason = ctx.reason();

	tracing::warn!(%grant, status, reason = %reason, "Token endpoint rejected the request.");

	match strategy.classify_token_error(&ctx) {
		ProviderErrorKind::Transient => TransientError::TokenEndpoint {
			message: reason,
			status: Some(status),
			retry_after: meta.and_then(|meta| meta.retry_after),
		}
		.into(),
		kind => kind.into_error(reason, Some(status)),
	}
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(
	grant: GrantType,
	meta: Option<&ResponseMetadata>,
	err: ReqwestError,
) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() {
		return TransientError::TokenEndpoint {
			message: format!("Request timed out during the {grant} grant"),
			status: meta.and_then(|meta| meta.status).or_else(|| err.status().map(|s| s.as_u16())),
			retry_after: meta.and_then(|meta| meta.retry_after),
		}
		.into();
	}

	TransportError::from(err).into()
}
