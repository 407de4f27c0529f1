//! Timer-driven re-issuing of requests.
//!
//! [`Scheduler::register`] persists a request's parameters under its identity and, when the
//! `scheduler.interval` is an integer, starts one recurring timer per identity. Each firing
//! re-synthesizes the request from the persisted parameters, runs it through the injected
//! [`RequestExecutor`], and forwards the (optionally harmonized) output to the sink of the
//! schedule's plugin. Registering an identity again always replaces its timer.

// crates.io
use tokio::{task::JoinHandle, time::MissedTickBehavior};
// self
use crate::{
	_prelude::*,
	cache::{CredentialCache, SCHEDULED_REQUESTS},
	harmonize::Harmonizer,
	obs::{self, FlowKind},
	plugin::{SinkContext, SinkResolver},
};

/// Lower bound of a schedule period.
pub const MIN_INTERVAL: std::time::Duration = std::time::Duration::from_millis(10_000);
/// Parameter holding the schedule settings.
pub const SCHEDULER_FIELD: &str = "scheduler";
/// Schedule mode that drops `start`/`end` so every run fetches the latest data.
pub const LATEST_MODE: &str = "latest";

/// Boxed future returned by [`RequestExecutor::execute`].
pub type ExecuteFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<Value>>> + 'a + Send>>;

/// Runs a synthesized request through the gateway.
pub trait RequestExecutor
where
	Self: Send + Sync,
{
	/// Executes `request`; `None` means there is nothing to forward.
	fn execute<'a>(&'a self, request: &'a SyntheticRequest) -> ExecuteFuture<'a>;
}

/// Request re-created from persisted parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticRequest {
	/// Request identity.
	pub identity: String,
	/// Persisted parameters, minus the scheduler settings.
	pub params: JsonMap<String, Value>,
}

/// Outcome of [`Scheduler::register`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registration {
	/// No `scheduler.interval` was supplied; nothing changed.
	Ignored,
	/// Parameters persisted and prior timer cancelled, but the interval is not an integer.
	Persisted,
	/// A timer was started.
	Scheduled {
		/// Effective period.
		period: std::time::Duration,
	},
}

struct ScheduleEntry {
	interval_ms: u64,
	mode: Option<String>,
	handle: JoinHandle<()>,
}

struct ScheduledJob {
	identity: String,
	latest: bool,
	plugin: Option<String>,
	cache: Arc<CredentialCache>,
	executor: Arc<dyn RequestExecutor>,
	sinks: Arc<dyn SinkResolver>,
	harmonizer: Option<Harmonizer>,
}
impl ScheduledJob {
	async fn run(&self) -> Result<()> {
		let Some(mut params) =
			self.cache.get::<JsonMap<String, Value>>(SCHEDULED_REQUESTS, &self.identity)
		else {
			tracing::debug!(identity = %self.identity, "Scheduled parameters are gone.");

			return Ok(());
		};

		if self.latest {
			params.remove("start");
			params.remove("end");
		}

		let request = SyntheticRequest { identity: self.identity.clone(), params };
		let Some(output) = self.executor.execute(&request).await? else {
			return Ok(());
		};
		let payload = match &self.harmonizer {
			Some(harmonizer) => harmonizer.harmonize(&output).into_value(),
			None => output,
		};
		let Some((plugin, sink)) = self
			.plugin
			.as_deref()
			.and_then(|plugin| Some((plugin, self.sinks.resolve(plugin)?)))
		else {
			tracing::warn!(identity = %self.identity, "No sink configured for scheduled output.");

			return Ok(());
		};
		let context = SinkContext { identity: self.identity.clone(), plugin: plugin.to_owned() };

		sink.stream(&context, payload).await
	}
}

/// Owns every schedule timer.
pub struct Scheduler {
	cache: Arc<CredentialCache>,
	executor: Arc<dyn RequestExecutor>,
	sinks: Arc<dyn SinkResolver>,
	harmonizer: Option<Harmonizer>,
	timers: Mutex<HashMap<String, ScheduleEntry>>,
}
impl Scheduler {
	/// Creates a scheduler; persisted parameters never expire.
	pub fn new(
		cache: Arc<CredentialCache>,
		executor: Arc<dyn RequestExecutor>,
		sinks: Arc<dyn SinkResolver>,
	) -> Self {
		cache.create_namespace(SCHEDULED_REQUESTS, None);

		Self { cache, executor, sinks, harmonizer: None, timers: Default::default() }
	}

	/// Harmonizes every output before it reaches the sink.
	pub fn with_harmonizer(mut self, harmonizer: Harmonizer) -> Self {
		self.harmonizer = Some(harmonizer);

		self
	}

	/// Registers (or replaces) the schedule of `identity`.
	///
	/// Must be called within a tokio runtime when the interval is valid.
	pub fn register(
		&self,
		identity: &str,
		params: &JsonMap<String, Value>,
	) -> Result<Registration> {
		let Some(settings) = params.get(SCHEDULER_FIELD).and_then(Value::as_object) else {
			return Ok(Registration::Ignored);
		};
		let Some(interval) = settings.get("interval") else {
			return Ok(Registration::Ignored);
		};

		self.cancel(identity);

		let mut persisted = params.clone();

		persisted.remove(SCHEDULER_FIELD);
		self.cache.set(SCHEDULED_REQUESTS, identity, &persisted)?;

		let Some(interval_ms) = parse_interval(interval) else {
			tracing::debug!(identity, %interval, "Schedule interval is not an integer.");

			return Ok(Registration::Persisted);
		};
		let period = MIN_INTERVAL.max(std::time::Duration::from_millis(interval_ms));
		let mode = settings.get("mode").and_then(Value::as_str).map(str::to_owned);
		let plugin = settings
			.get("plugin")
			.or_else(|| params.get("plugin"))
			.and_then(Value::as_str)
			.map(str::to_owned);
		let job = ScheduledJob {
			identity: identity.to_owned(),
			latest: mode.as_deref() == Some(LATEST_MODE),
			plugin,
			cache: self.cache.clone(),
			executor: self.executor.clone(),
			sinks: self.sinks.clone(),
			harmonizer: self.harmonizer.clone(),
		};
		let handle = tokio::spawn(async move {
			let start = tokio::time::Instant::now() + period;
			let mut interval = tokio::time::interval_at(start, period);

			interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

			loop {
				interval.tick().await;

				let result = obs::observe(FlowKind::ScheduledRequest, "execute", job.run()).await;

				if let Err(e) = result {
					tracing::warn!(
						identity = %job.identity,
						error = %e,
						"Scheduled request failed."
					);
				}
			}
		});

		tracing::debug!(identity, ?period, "Schedule registered.");
		self.timers.lock().insert(identity.to_owned(), ScheduleEntry { interval_ms, mode, handle });

		Ok(Registration::Scheduled { period })
	}

	/// Stops the timer of `identity`; persisted parameters stay.
	pub fn cancel(&self, identity: &str) -> bool {
		match self.timers.lock().remove(identity) {
			Some(entry) => {
				entry.handle.abort();

				true
			},
			None => false,
		}
	}

	/// Identities with an active timer, sorted.
	pub fn active(&self) -> Vec<String> {
		let mut identities = self.timers.lock().keys().cloned().collect::<Vec<_>>();

		identities.sort();

		identities
	}

	/// Configured interval (milliseconds) and mode of an active schedule.
	pub fn schedule(&self, identity: &str) -> Option<(u64, Option<String>)> {
		self.timers.lock().get(identity).map(|entry| (entry.interval_ms, entry.mode.clone()))
	}

	/// Stops every timer.
	pub fn dispose(&self) {
		for (_, entry) in self.timers.lock().drain() {
			entry.handle.abort();
		}
	}
}
impl Drop for Scheduler {
	fn drop(&mut self) {
		for (_, entry) in self.timers.get_mut().drain() {
			entry.handle.abort();
		}
	}
}
impl Debug for Scheduler {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Scheduler")
			.field("active", &self.active())
			.field("harmonizer", &self.harmonizer)
			.finish()
	}
}

// Negative intervals clamp to zero and then to the minimum period.
fn parse_interval(value: &Value) -> Option<u64> {
	let millis = match value {
		Value::Number(number) => number.as_i64()?,
		Value::String(text) => text.trim().parse::<i64>().ok()?,
		_ => return None,
	};

	Some(millis.max(0) as u64)
}
