//! Observability helpers shared by every authentication and credential flow.
//!
//! Flows run inside `tracing` spans named `pot_trust.flow` carrying the `flow` and `stage`
//! fields. With the `metrics` feature enabled, every attempt/success/failure also increments
//! the `pot_trust_flow_total` counter labeled by `flow` + `outcome`.

mod metrics;
mod tracing;

pub use self::metrics::*;
pub use self::tracing::*;

// self
use crate::_prelude::*;

/// Flow kinds observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Password grant with client and user credentials.
	Password,
	/// Client-credentials-only grant.
	ClientCredentials,
	/// User-credentials-only grant.
	UserCredentials,
	/// Interactive authorization code round trip.
	AuthorizationCode,
	/// Refresh token grant.
	Refresh,
	/// Signature strategy entry point.
	SignatureAuth,
	/// Trust key matching.
	TrustVerification,
	/// Trust key source loading.
	TrustKeyLoad,
	/// Timer-driven request re-issue.
	ScheduledRequest,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::Password => "password",
			FlowKind::ClientCredentials => "client_credentials",
			FlowKind::UserCredentials => "user_credentials",
			FlowKind::AuthorizationCode => "authorization_code",
			FlowKind::Refresh => "refresh",
			FlowKind::SignatureAuth => "signature_auth",
			FlowKind::TrustVerification => "trust_verification",
			FlowKind::TrustKeyLoad => "trust_key_load",
			FlowKind::ScheduledRequest => "scheduled_request",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a flow.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Runs `fut` inside a [`FlowSpan`] and records attempt plus success/failure outcomes.
pub(crate) async fn observe<T, Fut>(kind: FlowKind, stage: &'static str, fut: Fut) -> Result<T>
where
	Fut: Future<Output = Result<T>>,
{
	let span = FlowSpan::new(kind, stage);

	record_flow_outcome(kind, FlowOutcome::Attempt);

	let result = span.instrument_future(fut).await;

	match &result {
		Ok(_) => record_flow_outcome(kind, FlowOutcome::Success),
		Err(e) => {
			span.in_scope(|| ::tracing::debug!(error = %e, "Flow failed."));
			record_flow_outcome(kind, FlowOutcome::Failure);
		},
	}

	result
}
