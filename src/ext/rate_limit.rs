//! Per-address throttling of failed interactive confirmations.
//!
//! Each failed client-secret confirmation extends the address's block window to
//! `step × failures` from the moment of the failure; a success clears the record. A sweeper
//! task drops records whose window ended more than `retention` ago.

// std
use std::sync::Weak;
// crates.io
use tokio::{task::JoinHandle, time::MissedTickBehavior};
// self
use crate::_prelude::*;

/// Timings applied by [`ConfirmationRateLimiter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
	/// Block window added per consecutive failure.
	pub step: Duration,
	/// Age after which an expired record is swept.
	pub retention: Duration,
	/// Sweeper period.
	pub sweep_every: Duration,
}
impl Default for RateLimitPolicy {
	fn default() -> Self {
		Self {
			step: Duration::seconds(30),
			retention: Duration::minutes(10),
			sweep_every: Duration::minutes(30),
		}
	}
}

/// Result emitted by [`ConfirmationRateLimiter::check`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
	/// The confirmation may proceed immediately.
	Allow,
	/// The address is blocked.
	Delay(RetryDirective),
}

/// Advises callers when to retry after a [`RateLimitDecision::Delay`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryDirective {
	/// Instant when it is safe to retry.
	pub earliest_retry_at: OffsetDateTime,
	/// Remaining wait.
	pub wait: Duration,
}
impl RetryDirective {
	/// Converts the directive into the caller-facing error.
	pub fn into_error(self) -> Error {
		Error::RateLimited { wait: self.wait }
	}
}

/// Failure bookkeeping for one remote address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthFailureRecord {
	/// Remote address.
	pub remote_addr: IpAddr,
	/// Consecutive failures.
	pub failures: u32,
	/// End of the current block window.
	pub reset_at: OffsetDateTime,
}

/// Owned registry of [`AuthFailureRecord`]s.
#[derive(Debug)]
pub struct ConfirmationRateLimiter {
	policy: RateLimitPolicy,
	records: Mutex<HashMap<IpAddr, AuthFailureRecord>>,
	sweeper: Mutex<Option<JoinHandle<()>>>,
}
impl ConfirmationRateLimiter {
	/// Creates a limiter with the provided timings.
	pub fn new(policy: RateLimitPolicy) -> Self {
		Self { policy, records: Default::default(), sweeper: Default::default() }
	}

	/// Timings in effect.
	pub fn policy(&self) -> RateLimitPolicy {
		self.policy
	}

	/// Checks `addr` against the current time.
	pub fn check(&self, addr: IpAddr) -> RateLimitDecision {
		self.check_at(addr, OffsetDateTime::now_utc())
	}

	/// Checks `addr` at `now`.
	pub fn check_at(&self, addr: IpAddr, now: OffsetDateTime) -> RateLimitDecision {
		match self.records.lock().get(&addr) {
			Some(record) if record.reset_at > now => RateLimitDecision::Delay(RetryDirective {
				earliest_retry_at: record.reset_at,
				wait: record.reset_at - now,
			}),
			_ => RateLimitDecision::Allow,
		}
	}

	/// Records a failed confirmation from `addr` and returns the updated record.
	pub fn record_failure(&self, addr: IpAddr) -> AuthFailureRecord {
		self.record_failure_at(addr, OffsetDateTime::now_utc())
	}

	/// Records a failed confirmation from `addr` at `now`.
	pub fn record_failure_at(&self, addr: IpAddr, now: OffsetDateTime) -> AuthFailureRecord {
		let mut records = self.records.lock();
		let record = records.entry(addr).or_insert(AuthFailureRecord {
			remote_addr: addr,
			failures: 0,
			reset_at: now,
		});

		record.failures = record.failures.saturating_add(1);
		record.reset_at = now + self.policy.step * record.failures;

		tracing::warn!(
			remote_addr = %addr,
			failures = record.failures,
			"Interactive confirmation failed."
		);

		record.clone()
	}

	/// Clears the record of `addr` after a successful confirmation.
	pub fn record_success(&self, addr: IpAddr) {
		self.records.lock().remove(&addr);
	}

	/// Current record for `addr`.
	pub fn record(&self, addr: IpAddr) -> Option<AuthFailureRecord> {
		self.records.lock().get(&addr).cloned()
	}

	/// Drops records whose block window ended more than `retention` before `now`.
	pub fn sweep(&self, now: OffsetDateTime) -> usize {
		let mut records = self.records.lock();
		let before = records.len();

		records.retain(|_, record| now - record.reset_at <= self.policy.retention);

		before - records.len()
	}

	/// Starts the periodic sweeper on the current tokio runtime, replacing a running one.
	///
	/// The task holds a weak reference and exits once the limiter is dropped.
	pub fn spawn_sweeper(self: &Arc<Self>) {
		let limiter = Arc::downgrade(self);
		let period = to_std(self.policy.sweep_every);
		let handle = tokio::spawn(async move {
			let start = tokio::time::Instant::now() + period;
			let mut interval = tokio::time::interval_at(start, period);

			interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

			loop {
				interval.tick().await;

				let Some(limiter) = Weak::upgrade(&limiter) else {
					break;
				};
				let swept = limiter.sweep(OffsetDateTime::now_utc());

				tracing::debug!(swept, "Swept confirmation failure records.");
			}
		});

		if let Some(previous) = self.sweeper.lock().replace(handle) {
			previous.abort();
		}
	}

	/// Stops the sweeper and drops every record.
	pub fn dispose(&self) {
		if let Some(handle) = self.sweeper.lock().take() {
			handle.abort();
		}

		self.records.lock().clear();
	}
}
impl Default for ConfirmationRateLimiter {
	fn default() -> Self {
		Self::new(RateLimitPolicy::default())
	}
}
impl Drop for ConfirmationRateLimiter {
	fn drop(&mut self) {
		if let Some(handle) = self.sweeper.get_mut().take() {
			handle.abort();
		}
	}
}

fn to_std(duration: Duration) -> std::time::Duration {
	std::time::Duration::try_from(duration)
		.ok()
		.filter(|period| !period.is_zero())
		.unwrap_or(std::time::Duration::from_secs(1))
}
