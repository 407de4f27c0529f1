//! Capability-tagged plugin hooks and downstream stream sinks.
//!
//! A [`Plugin`] declares which hooks of the fixed [`Hook`] set it implements;
//! [`PluginPipeline`] calls only declared hooks, in registration order. When a hook fails,
//! plugins declaring [`Hook::OnError`] observe the failure before it propagates.
//!
//! [`StreamSink`]s receive scheduled results; a [`SinkResolver`] maps a plugin name to its
//! sink.

// self
use crate::_prelude::*;

/// Boxed future returned by plugin hooks and sinks.
pub type PluginFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + 'a + Send>>;

/// Fixed hook set a plugin may implement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hook {
	/// Adjust the outbound request.
	Request,
	/// Inspect the raw upstream response.
	Response,
	/// Reshape the output document.
	Output,
	/// Render templated values.
	Template,
	/// Derive the request identity.
	Id,
	/// Observe a failure raised by another hook.
	OnError,
}

/// Mutable state threaded through hook invocations.
#[derive(Clone, Debug, Default)]
pub struct HookContext {
	/// Logical identity of the request, once known.
	pub identity: Option<String>,
	/// Request parameters.
	pub request: JsonMap<String, Value>,
	/// Raw upstream response.
	pub response: Value,
	/// Output document.
	pub output: Value,
	/// Public message of the failure being handled by [`Hook::OnError`].
	pub error: Option<String>,
}

/// Plugin declaring a subset of [`Hook`]s.
pub trait Plugin
where
	Self: Send + Sync,
{
	/// Name used to resolve the plugin's sink.
	fn name(&self) -> &str;

	/// Hooks this plugin implements.
	fn hooks(&self) -> &[Hook];

	/// Runs `hook`; only called for hooks listed by [`Plugin::hooks`].
	fn run<'a>(&'a self, hook: Hook, context: &'a mut HookContext) -> PluginFuture<'a>;

	/// Returns `true` if `hook` is declared.
	fn implements(&self, hook: Hook) -> bool {
		self.hooks().contains(&hook)
	}
}

/// Ordered plugin list.
#[derive(Clone, Default)]
pub struct PluginPipeline {
	plugins: Vec<Arc<dyn Plugin>>,
}
impl PluginPipeline {
	/// Appends a plugin.
	pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
		self.plugins.push(plugin);

		self
	}

	/// Names of the registered plugins, in order.
	pub fn names(&self) -> Vec<&str> {
		self.plugins.iter().map(|plugin| plugin.name()).collect()
	}

	/// Runs `hook` on every plugin declaring it.
	///
	/// The first failure stops the pass; `onerror` hooks then see its public message and the
	/// original error is returned.
	pub async fn run(&self, hook: Hook, context: &mut HookContext) -> Result<()> {
		for plugin in self.plugins.iter().filter(|plugin| plugin.implements(hook)) {
			if let Err(e) = plugin.run(hook, context).await {
				tracing::debug!(plugin = plugin.name(), ?hook, error = %e, "Plugin hook failed.");

				if hook != Hook::OnError {
					context.error = Some(e.public_message());

					for handler in self.plugins.iter().filter(|p| p.implements(Hook::OnError)) {
						if let Err(nested) = handler.run(Hook::OnError, context).await {
							tracing::warn!(
								plugin = handler.name(),
								error = %nested,
								"Error hook failed."
							);
						}
					}
				}

				return Err(e);
			}
		}

		Ok(())
	}
}
impl Debug for PluginPipeline {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PluginPipeline").field("plugins", &self.names()).finish()
	}
}

/// Where a sink call originates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkContext {
	/// Request identity of the schedule.
	pub identity: String,
	/// Plugin that resolved the sink.
	pub plugin: String,
}

/// Downstream consumer of scheduled results.
pub trait StreamSink
where
	Self: Send + Sync,
{
	/// Forwards `payload`.
	fn stream<'a>(&'a self, context: &'a SinkContext, payload: Value) -> PluginFuture<'a>;
}

/// Resolves the sink configured for a plugin.
pub trait SinkResolver
where
	Self: Send + Sync,
{
	/// Returns the sink of `plugin`, if any.
	fn resolve(&self, plugin: &str) -> Option<Arc<dyn StreamSink>>;
}

/// Name-keyed [`SinkResolver`].
#[derive(Default)]
pub struct SinkRegistry {
	sinks: RwLock<HashMap<String, Arc<dyn StreamSink>>>,
}
impl SinkRegistry {
	/// Registers (or replaces) the sink of `plugin`.
	pub fn register(&self, plugin: impl Into<String>, sink: Arc<dyn StreamSink>) {
		self.sinks.write().insert(plugin.into(), sink);
	}
}
impl SinkResolver for SinkRegistry {
	fn resolve(&self, plugin: &str) -> Option<Arc<dyn StreamSink>> {
		self.sinks.read().get(plugin).cloned()
	}
}
impl Debug for SinkRegistry {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let mut names = self.sinks.read().keys().cloned().collect::<Vec<_>>();

		names.sort();

		f.debug_struct("SinkRegistry").field("plugins", &names).finish()
	}
}
