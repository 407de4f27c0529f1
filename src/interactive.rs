//! Interactive authorization endpoints, independent of any HTTP server.
//!
//! A front door maps `GET|POST /{identity}/{action}` onto [`InteractiveRequest`] and renders
//! the returned [`InteractiveResponse`]. `POST authorize` confirms the operator knows the
//! client secret before the provider redirect is issued; failed confirmations are throttled
//! per remote address through [`ConfirmationRateLimiter`].

// self
use crate::{
	_prelude::*,
	auth::ProductCode,
	error::{ConfigError, ErrorBody, ErrorDetail},
	ext::{ConfirmationRateLimiter, RateLimitDecision},
	flows::{AuthorizationHandoff, TokenManager},
	http::TokenHttpClient,
	oauth::TransportErrorMapper,
};

/// Form field carrying the confirmation secret.
pub const CONFIRMATION_FIELD: &str = "client_secret";

/// HTTP method of an interactive request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InteractiveMethod {
	/// `GET`.
	Get,
	/// `POST`.
	Post,
}

/// Path action of an interactive request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InteractiveAction {
	/// `/{identity}/authorize`.
	Authorize,
	/// `/{identity}/redirect`.
	Redirect,
	/// `/{identity}/fetch`.
	Fetch,
}
impl FromStr for InteractiveAction {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"authorize" => Ok(Self::Authorize),
			"redirect" => Ok(Self::Redirect),
			"fetch" => Ok(Self::Fetch),
			other => Err(format!("unknown interactive action `{other}`")),
		}
	}
}

/// Transport-neutral view of an interactive request.
#[derive(Clone, Debug)]
pub struct InteractiveRequest {
	/// Request method.
	pub method: InteractiveMethod,
	/// Product code path segment.
	pub identity: String,
	/// Action path segment.
	pub action: String,
	/// Query parameters (GET) or form fields (POST).
	pub params: BTreeMap<String, String>,
	/// Caller address used for throttling.
	pub remote_addr: IpAddr,
}
impl InteractiveRequest {
	/// Creates a request without parameters.
	pub fn new(
		method: InteractiveMethod,
		identity: impl Into<String>,
		action: impl Into<String>,
		remote_addr: IpAddr,
	) -> Self {
		Self {
			method,
			identity: identity.into(),
			action: action.into(),
			params: BTreeMap::new(),
			remote_addr,
		}
	}

	/// Adds a query parameter or form field.
	pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.params.insert(name.into(), value.into());

		self
	}

	fn param(&self, name: &str) -> Option<&str> {
		self.params.get(name).map(String::as_str).filter(|value| !value.is_empty())
	}
}

/// Response rendered by the front door.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InteractiveResponse {
	/// `302` to the URL.
	Redirect(Url),
	/// `200` HTML page.
	Html(String),
	/// `200` JSON document.
	Json(Value),
	/// Error payload; the status lives in the body.
	Error(ErrorBody),
}
impl InteractiveResponse {
	/// HTTP status the front door should use.
	pub fn status(&self) -> u16 {
		match self {
			Self::Redirect(_) => 302,
			Self::Html(_) | Self::Json(_) => 200,
			Self::Error(body) => body.error.status,
		}
	}

	fn error(err: &Error) -> Self {
		Self::Error(ErrorBody::from(err))
	}

	fn status_error(status: u16, message: impl Into<String>) -> Self {
		Self::Error(ErrorBody { error: ErrorDetail { status, message: message.into() } })
	}
}

/// Dispatches interactive requests to the token manager of each identity.
pub struct InteractiveEndpoints<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	managers: BTreeMap<ProductCode, Arc<TokenManager<C, M>>>,
	limiter: Arc<ConfirmationRateLimiter>,
}
impl<C, M> InteractiveEndpoints<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a dispatcher sharing `limiter` across identities.
	pub fn new(limiter: Arc<ConfirmationRateLimiter>) -> Self {
		Self { managers: BTreeMap::new(), limiter }
	}

	/// Registers the manager serving its product code, replacing any previous one.
	pub fn register(&mut self, manager: Arc<TokenManager<C, M>>) {
		self.managers.insert(manager.identity().clone(), manager);
	}

	/// Rate limiter in use.
	pub fn limiter(&self) -> &Arc<ConfirmationRateLimiter> {
		&self.limiter
	}

	/// Handles one request.
	pub async fn handle(&self, request: &InteractiveRequest) -> InteractiveResponse {
		let Some(manager) = self.managers.get(request.identity.as_str()) else {
			return InteractiveResponse::status_error(404, "Unknown identity");
		};
		let Ok(action) = request.action.parse::<InteractiveAction>() else {
			return InteractiveResponse::status_error(404, "Unknown action");
		};
		let result = match (request.method, action) {
			(InteractiveMethod::Get, InteractiveAction::Authorize) =>
				Ok(InteractiveResponse::Html(confirmation_page(manager.identity()))),
			(InteractiveMethod::Post, InteractiveAction::Authorize) =>
				self.confirm(manager, request),
			(InteractiveMethod::Get, InteractiveAction::Redirect) =>
				Self::complete(manager, request).await,
			(InteractiveMethod::Get, InteractiveAction::Fetch) => Ok(Self::fetch(manager)),
			_ => return InteractiveResponse::status_error(405, "Method not allowed"),
		};

		result.unwrap_or_else(|e| {
			tracing::debug!(
				identity = %request.identity,
				error = %e,
				"Interactive request failed."
			);

			InteractiveResponse::error(&e)
		})
	}

	fn confirm(
		&self,
		manager: &TokenManager<C, M>,
		request: &InteractiveRequest,
	) -> Result<InteractiveResponse> {
		if let RateLimitDecision::Delay(directive) = self.limiter.check(request.remote_addr) {
			tracing::warn!(remote_addr = %request.remote_addr, "Confirmation rate limited.");

			return Err(directive.into_error());
		}

		let Some(expected) = manager.profile().client_secret.as_ref() else {
			return Err(ConfigError::Insufficient { detail: "client secret" }.into());
		};

		if !request.param(CONFIRMATION_FIELD).is_some_and(|candidate| expected.matches(candidate))
		{
			self.limiter.record_failure(request.remote_addr);

			return Err(Error::Unauthorized { reason: "Invalid client secret".into() });
		}

		self.limiter.record_success(request.remote_addr);

		let start = manager.start_authorization()?;

		Ok(InteractiveResponse::Redirect(start.authorize_url))
	}

	async fn complete(
		manager: &TokenManager<C, M>,
		request: &InteractiveRequest,
	) -> Result<InteractiveResponse> {
		if let Some(error) = request.param("error") {
			let reason = request.param("error_description").unwrap_or(error);

			return Err(Error::Unauthorized { reason: reason.into() });
		}

		let (Some(state), Some(code)) = (request.param("state"), request.param("code")) else {
			return Err(Error::Unauthorized { reason: "Missing authorization code".into() });
		};

		match manager.complete_authorization(state, code).await? {
			AuthorizationHandoff::Redirect(target) => Ok(InteractiveResponse::Redirect(target)),
			AuthorizationHandoff::Persisted { variable, grant } => {
				let token = grant.token().map(|token| token.expose()).unwrap_or_default();

				Ok(InteractiveResponse::Html(persisted_page(manager.identity(), &variable, token)))
			},
		}
	}

	fn fetch(manager: &TokenManager<C, M>) -> InteractiveResponse {
		let grant = manager.grant();

		InteractiveResponse::Json(serde_json::json!({
			"identity": manager.identity().as_ref(),
			"authorized": grant.is_some(),
			"expires_at": grant
				.as_ref()
				.and_then(|grant| grant.expires_at())
				.map(|expiry| expiry.unix_timestamp()),
		}))
	}
}
impl<C, M> Debug for InteractiveEndpoints<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("InteractiveEndpoints")
			.field("identities", &self.managers.keys().collect::<Vec<_>>())
			.field("limiter", &self.limiter)
			.finish()
	}
}

fn confirmation_page(identity: &ProductCode) -> String {
	let identity = escape_html(identity);

	format!(
		"<!DOCTYPE html><html><head><title>Authorize {identity}</title></head><body>\
		<h1>Authorize {identity}</h1>\
		<form method=\"post\" action=\"/{identity}/authorize\">\
		<label>Client secret <input type=\"password\" name=\"{CONFIRMATION_FIELD}\"></label>\
		<button type=\"submit\">Continue</button></form></body></html>"
	)
}

fn persisted_page(identity: &ProductCode, variable: &str, token: &str) -> String {
	let identity = escape_html(identity);
	let variable = escape_html(variable);
	let token = escape_html(token);

	format!(
		"<!DOCTYPE html><html><head><title>{identity} authorized</title></head><body>\
		<h1>{identity} authorized</h1>\
		<p>Set <code>{variable}</code> to the access token below and restart the gateway.</p>\
		<pre>{token}</pre></body></html>"
	)
}

fn escape_html(raw: &str) -> String {
	let mut escaped = String::with_capacity(raw.len());

	for c in raw.chars() {
		match c {
			'&' => escaped.push_str("&amp;"),
			'<' => escaped.push_str("&lt;"),
			'>' => escaped.push_str("&gt;"),
			'"' => escaped.push_str("&quot;"),
			'\'' => escaped.push_str("&#39;"),
			c => escaped.push(c),
		}
	}

	escaped
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn html_is_escaped() {
		assert_eq!(escape_html("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
	}

	#[test]
	fn actions_parse_from_path_segments() {
		assert_eq!("fetch".parse::<InteractiveAction>(), Ok(InteractiveAction::Fetch));
		assert!("token".parse::<InteractiveAction>().is_err());
	}

	#[test]
	fn confirmation_page_posts_the_secret_field() {
		let identity = ProductCode::new("acme").expect("Product code should be valid.");
		let page = confirmation_page(&identity);

		assert!(page.contains("action=\"/acme/authorize\""));
		assert!(page.contains("name=\"client_secret\""));
	}
}
