//! Process-wide namespaced key/value cache with per-namespace time-to-live.
//!
//! Every value is stored as a structurally independent copy: [`CredentialCache::set`]
//! serializes the caller's value into a JSON tree and every read deserializes a fresh
//! instance, so no caller can observe or induce aliasing mutations of cached state.
//!
//! A namespace is created implicitly by its first write and keeps the ttl supplied at that
//! moment; later writes into the same namespace share it. Namespaces created through
//! [`CredentialCache::create_namespace`] with `None` never expire their entries.

mod namespace;

use namespace::Namespace;

// self
use crate::_prelude::*;

/// Generic default ttl applied when callers do not supply one (24 hours).
pub const DEFAULT_TTL: Duration = Duration::seconds(86_400);
/// Lifetime of interactive authorization state values (5 minutes).
pub const CSRF_STATE_TTL: Duration = Duration::seconds(300);

/// Namespace holding [`Grant`](crate::auth::Grant) documents keyed by product code.
pub const GRANTS: &str = "grants";
/// Namespace holding interactive authorization state values.
pub const CSRF_STATES: &str = "authorization-states";
/// Namespace holding [`TrustKeyRecord`](crate::trust::TrustKeyRecord)s.
pub const TRUST_KEYS: &str = "public-keys";
/// Namespace holding the parameters of scheduled requests.
pub const SCHEDULED_REQUESTS: &str = "scheduled-requests";

/// Error type produced by the [`CredentialCache`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum CacheError {
	/// The value could not be converted into its cached representation.
	#[error("Failed to cache {namespace}/{key}: {message}.")]
	Serialization {
		/// Target namespace.
		namespace: String,
		/// Target key.
		key: String,
		/// Human-readable error payload.
		message: String,
	},
}

/// Thread-safe namespaced cache shared by every component of the gateway.
#[derive(Debug)]
pub struct CredentialCache {
	default_ttl: Duration,
	namespaces: RwLock<HashMap<String, Namespace>>,
}
impl CredentialCache {
	/// Creates a cache whose implicit namespaces default to `default_ttl`.
	pub fn new(default_ttl: Duration) -> Self {
		Self { default_ttl, namespaces: Default::default() }
	}

	/// Declares a namespace ahead of its first write.
	///
	/// `None` (or a non-positive ttl) creates a namespace whose entries never expire. Existing
	/// namespaces keep their configuration.
	pub fn create_namespace(&self, namespace: &str, ttl: Option<Duration>) {
		self.namespaces
			.write()
			.entry(namespace.to_owned())
			.or_insert_with(|| Namespace::new(normalize_ttl(ttl)));
	}

	/// Returns a fresh copy of the value stored under `namespace/key`.
	///
	/// Unknown namespaces, absent or expired keys, and values that no longer deserialize into
	/// `T` all read as `None`.
	pub fn get<T>(&self, namespace: &str, key: &str) -> Option<T>
	where
		T: DeserializeOwned,
	{
		let value = self.get_value(namespace, key)?;

		decode(namespace, key, value)
	}

	/// Returns a copy of the raw JSON tree stored under `namespace/key`.
	pub fn get_value(&self, namespace: &str, key: &str) -> Option<Value> {
		let now = OffsetDateTime::now_utc();

		self.namespaces.read().get(namespace)?.get(key, now).cloned()
	}

	/// Returns copies of every live value in `namespace`, ordered by key.
	pub fn get_all<T>(&self, namespace: &str) -> Vec<T>
	where
		T: DeserializeOwned,
	{
		let now = OffsetDateTime::now_utc();
		let live = match self.namespaces.read().get(namespace) {
			Some(ns) => ns.live(now).map(|(key, value)| (key.to_owned(), value.clone())).collect(),
			None => Vec::new(),
		};

		live.into_iter().filter_map(|(key, value)| decode(namespace, &key, value)).collect()
	}

	/// Returns the live keys of `namespace` in order.
	pub fn keys(&self, namespace: &str) -> Vec<String> {
		let now = OffsetDateTime::now_utc();

		match self.namespaces.read().get(namespace) {
			Some(ns) => ns.live(now).map(|(key, _)| key.to_owned()).collect(),
			None => Vec::new(),
		}
	}

	/// Stores a copy of `value` using the cache's default ttl for new namespaces.
	pub fn set<T>(&self, namespace: &str, key: &str, value: &T) -> Result<(), CacheError>
	where
		T: ?Sized + Serialize,
	{
		self.set_with_ttl(namespace, key, value, self.default_ttl)
	}

	/// Stores a copy of `value`; `ttl` configures the namespace if this is its first write.
	pub fn set_with_ttl<T>(
		&self,
		namespace: &str,
		key: &str,
		value: &T,
		ttl: Duration,
	) -> Result<(), CacheError>
	where
		T: ?Sized + Serialize,
	{
		let value = encode(namespace, key, value)?;
		let now = OffsetDateTime::now_utc();
		let mut namespaces = self.namespaces.write();
		let ns = namespaces
			.entry(namespace.to_owned())
			.or_insert_with(|| Namespace::new(normalize_ttl(Some(ttl))));
		let ttl = ns.ttl();

		ns.insert(key, value, ttl.map(|ttl| now + ttl));

		Ok(())
	}

	/// Stores a copy of `value` with its own lifetime, overriding the namespace ttl.
	///
	/// Grants use this so each document lives exactly as long as the provider's
	/// `expires_in`; `None` keeps the entry until it is deleted.
	pub fn set_expiring<T>(
		&self,
		namespace: &str,
		key: &str,
		value: &T,
		ttl: Option<Duration>,
	) -> Result<(), CacheError>
	where
		T: ?Sized + Serialize,
	{
		let value = encode(namespace, key, value)?;
		let now = OffsetDateTime::now_utc();
		let mut namespaces = self.namespaces.write();
		let ns = namespaces
			.entry(namespace.to_owned())
			.or_insert_with(|| Namespace::new(normalize_ttl(Some(self.default_ttl))));

		ns.insert(key, value, normalize_ttl(ttl).map(|ttl| now + ttl));

		Ok(())
	}

	/// Removes `namespace/key`, returning `true` if a live entry existed.
	pub fn delete(&self, namespace: &str, key: &str) -> bool {
		let now = OffsetDateTime::now_utc();

		self.namespaces.write().get_mut(namespace).is_some_and(|ns| ns.remove(key, now))
	}

	/// Removes and returns the value under `namespace/key` in one step.
	///
	/// Used for single-use values such as authorization state.
	pub fn take<T>(&self, namespace: &str, key: &str) -> Option<T>
	where
		T: DeserializeOwned,
	{
		let now = OffsetDateTime::now_utc();
		let value = self.namespaces.write().get_mut(namespace)?.take(key, now)?;

		decode(namespace, key, value)
	}

	/// Removes and returns `namespace/key` only if `accept` approves the decoded value.
	///
	/// Rejected or undecodable entries stay in place.
	pub fn take_if<T, F>(&self, namespace: &str, key: &str, accept: F) -> Option<T>
	where
		T: DeserializeOwned,
		F: FnOnce(&T) -> bool,
	{
		let now = OffsetDateTime::now_utc();
		let mut namespaces = self.namespaces.write();
		let ns = namespaces.get_mut(namespace)?;
		let value = decode::<T>(namespace, key, ns.get(key, now)?.clone())?;

		if !accept(&value) {
			return None;
		}

		ns.remove(key, now);

		Some(value)
	}

	/// Drops every expired entry and returns how many were removed.
	pub fn purge_expired(&self) -> usize {
		let now = OffsetDateTime::now_utc();

		self.namespaces.write().values_mut().map(|ns| ns.purge(now)).sum()
	}

	/// Names of every namespace known to the cache, sorted.
	pub fn namespaces(&self) -> Vec<String> {
		let mut names = self.namespaces.read().keys().cloned().collect::<Vec<_>>();

		names.sort();

		names
	}
}
impl Default for CredentialCache {
	fn default() -> Self {
		Self::new(DEFAULT_TTL)
	}
}

fn normalize_ttl(ttl: Option<Duration>) -> Option<Duration> {
	ttl.filter(|ttl| ttl.is_positive())
}

fn encode<T>(namespace: &str, key: &str, value: &T) -> Result<Value, CacheError>
where
	T: ?Sized + Serialize,
{
	serde_json::to_value(value).map_err(|e| CacheError::Serialization {
		namespace: namespace.to_owned(),
		key: key.to_owned(),
		message: e.to_string(),
	})
}

fn decode<T>(namespace: &str, key: &str, value: Value) -> Option<T>
where
	T: DeserializeOwned,
{
	match serde_json::from_value(value) {
		Ok(decoded) => Some(decoded),
		Err(e) => {
			tracing::warn!(namespace, key, error = %e, "Cached value has an unexpected shape.");

			None
		},
	}
}
