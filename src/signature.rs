//! Signature authentication strategy.
//!
//! [`SignatureStrategy`] extracts a signature token from the inbound headers and delegates the
//! trust decision to a [`SignatureVerifier`]. The verifier answers with an explicit
//! [`Verification`]; the strategy only translates it into an [`AuthOutcome`].

pub mod request;

pub use request::*;

// crates.io
use base64::{
	Engine as _,
	engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
// self
use crate::{
	_prelude::*,
	error::ErrorBody,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

/// Header consulted when no signature field is configured.
pub const DEFAULT_SIGNATURE_FIELD: &str = "x-pot-signature";

/// Boxed future returned by [`SignatureVerifier::verify`].
pub type VerifyFuture<'a> = Pin<Box<dyn Future<Output = Result<Verification>> + 'a + Send>>;

/// Pluggable verification hook used by [`SignatureStrategy`].
///
/// `request` is only supplied when the strategy was configured with
/// [`SignatureStrategy::pass_request`]. Returning `Err` yields [`AuthOutcome::Error`].
pub trait SignatureVerifier
where
	Self: Send + Sync,
{
	/// Gate evaluated before the signature is looked up (e.g. required headers).
	fn precheck(&self, _request: &RequestContext) -> Result<(), Rejection> {
		Ok(())
	}

	/// Verifies `signature`, optionally against the full request.
	fn verify<'a>(
		&'a self,
		request: Option<&'a RequestContext>,
		signature: &'a str,
	) -> VerifyFuture<'a>;
}

/// Auxiliary data attached to an authenticated request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInfo {
	/// Environment tag of the trust source that matched.
	pub environment: Option<String>,
	/// Granted scope (`*` for trust-verified callers).
	pub scope: String,
	/// End-user identity, when the request carried one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user: Option<String>,
}

/// Reason attached to a failed authentication.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
	/// HTTP-style status code.
	pub status: u16,
	/// Short human-readable reason.
	pub message: String,
}
impl Rejection {
	/// Creates a new 401 rejection.
	pub fn unauthorized(message: impl Into<String>) -> Self {
		Self { status: 401, message: message.into() }
	}
}
impl From<&Error> for Rejection {
	fn from(err: &Error) -> Self {
		Self { status: err.status(), message: err.public_message() }
	}
}
impl From<Error> for Rejection {
	fn from(err: Error) -> Self {
		Self::from(&err)
	}
}

/// Result returned by a [`SignatureVerifier`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verification {
	/// The signature was trusted and an identity extracted.
	Verified {
		/// Caller identity.
		identity: String,
		/// Auxiliary authentication data.
		info: AuthInfo,
	},
	/// The signature was not trusted.
	Rejected(Rejection),
}

/// Outcome of [`SignatureStrategy::authenticate`].
#[derive(Debug)]
pub enum AuthOutcome {
	/// Caller authenticated.
	Success {
		/// Caller identity.
		identity: String,
		/// Auxiliary authentication data.
		info: AuthInfo,
	},
	/// Caller rejected with a 401-style reason.
	Fail(Rejection),
	/// Verification itself failed.
	Error(Error),
}
impl AuthOutcome {
	/// Returns `true` for [`AuthOutcome::Success`].
	pub fn is_success(&self) -> bool {
		matches!(self, Self::Success { .. })
	}

	/// Normalized `{ error: { status, message } }` body for failures.
	pub fn error_body(&self) -> Option<ErrorBody> {
		match self {
			Self::Success { .. } => None,
			Self::Fail(rejection) => Some(ErrorBody {
				error: crate::error::ErrorDetail {
					status: rejection.status,
					message: rejection.message.clone(),
				},
			}),
			Self::Error(err) => Some(ErrorBody::from(err)),
		}
	}
}

/// Authenticator reading a signature header and delegating to a [`SignatureVerifier`].
#[derive(Clone)]
pub struct SignatureStrategy {
	field: String,
	pass_request: bool,
	verifier: Arc<dyn SignatureVerifier>,
}
impl SignatureStrategy {
	/// Strategy name used when registering with a request router.
	pub const NAME: &'static str = "signature";

	/// Creates a strategy reading [`DEFAULT_SIGNATURE_FIELD`].
	pub fn new(verifier: Arc<dyn SignatureVerifier>) -> Self {
		Self { field: DEFAULT_SIGNATURE_FIELD.into(), pass_request: false, verifier }
	}

	/// Overrides the signature key chain (e.g. `auth[signature]`).
	pub fn with_field(mut self, field: impl Into<String>) -> Self {
		self.field = field.into();

		self
	}

	/// Passes the full request context to the verifier.
	pub fn pass_request(mut self, pass: bool) -> Self {
		self.pass_request = pass;

		self
	}

	/// Configured signature key chain.
	pub fn field(&self) -> &str {
		&self.field
	}

	/// Authenticates `request`.
	///
	/// The verifier's [`precheck`](SignatureVerifier::precheck) runs first. A missing, empty or
	/// non-scalar signature then fails with "Missing signature" before the verifier runs.
	pub async fn authenticate(&self, request: &RequestContext) -> AuthOutcome {
		const KIND: FlowKind = FlowKind::SignatureAuth;

		let span = FlowSpan::new(KIND, "authenticate");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		if let Err(rejection) = self.verifier.precheck(request) {
			obs::record_flow_outcome(KIND, FlowOutcome::Failure);

			return AuthOutcome::Fail(rejection);
		}

		let Some(signature) = request.lookup(&self.field).and_then(scalar) else {
			obs::record_flow_outcome(KIND, FlowOutcome::Failure);

			return AuthOutcome::Fail(Rejection::from(Error::MissingSignature));
		};
		let context = self.pass_request.then_some(request);
		let verification = span.instrument_future(self.verifier.verify(context, &signature)).await;
		let outcome = match verification {
			Ok(Verification::Verified { identity, info }) if !identity.is_empty() =>
				AuthOutcome::Success { identity, info },
			Ok(Verification::Verified { .. }) =>
				AuthOutcome::Fail(Rejection::unauthorized("Unauthorized")),
			Ok(Verification::Rejected(rejection)) => AuthOutcome::Fail(rejection),
			Err(e) => AuthOutcome::Error(e),
		};

		match &outcome {
			AuthOutcome::Success { .. } => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			_ => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		outcome
	}
}
impl Debug for SignatureStrategy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SignatureStrategy")
			.field("field", &self.field)
			.field("pass_request", &self.pass_request)
			.finish()
	}
}

/// Decodes a signature supplied as standard base64 or URL-safe base64 without padding.
pub fn decode_signature(signature: &str) -> Option<Vec<u8>> {
	let trimmed = signature.trim();

	STANDARD
		.decode(trimmed)
		.ok()
		.or_else(|| URL_SAFE_NO_PAD.decode(trimmed.trim_end_matches('=')).ok())
}

/// Bytes signed on the response side: the payload object without its `signature` field.
pub fn response_payload(payload: &Value) -> Vec<u8> {
	match payload {
		Value::Object(map) => {
			let mut unsigned = map.clone();

			unsigned.remove("signature");

			Value::Object(unsigned).to_string().into_bytes()
		},
		other => other.to_string().into_bytes(),
	}
}

fn scalar(value: &Value) -> Option<String> {
	match value {
		Value::String(text) if !text.is_empty() => Some(text.clone()),
		Value::Number(number) => Some(number.to_string()),
		Value::Bool(flag) => Some(flag.to_string()),
		_ => None,
	}
}
