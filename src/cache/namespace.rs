//! Per-namespace entry table with lazy expiry.

// self
use crate::_prelude::*;

#[derive(Clone, Debug)]
struct CacheEntry {
	value: Value,
	expires_at: Option<OffsetDateTime>,
}
impl CacheEntry {
	fn is_live(&self, now: OffsetDateTime) -> bool {
		self.expires_at.is_none_or(|expiry| now < expiry)
	}
}

/// Entries of one namespace, ordered by key.
#[derive(Clone, Debug)]
pub(super) struct Namespace {
	ttl: Option<Duration>,
	entries: BTreeMap<String, CacheEntry>,
}
impl Namespace {
	pub(super) fn new(ttl: Option<Duration>) -> Self {
		Self { ttl, entries: BTreeMap::new() }
	}

	pub(super) fn ttl(&self) -> Option<Duration> {
		self.ttl
	}

	pub(super) fn get(&self, key: &str, now: OffsetDateTime) -> Option<&Value> {
		self.entries.get(key).filter(|entry| entry.is_live(now)).map(|entry| &entry.value)
	}

	pub(super) fn live(&self, now: OffsetDateTime) -> impl Iterator<Item = (&str, &Value)> {
		self.entries
			.iter()
			.filter(move |(_, entry)| entry.is_live(now))
			.map(|(key, entry)| (key.as_str(), &entry.value))
	}

	pub(super) fn insert(&mut self, key: &str, value: Value, expires_at: Option<OffsetDateTime>) {
		self.entries.insert(key.to_owned(), CacheEntry { value, expires_at });
	}

	pub(super) fn remove(&mut self, key: &str, now: OffsetDateTime) -> bool {
		self.take(key, now).is_some()
	}

	pub(super) fn take(&mut self, key: &str, now: OffsetDateTime) -> Option<Value> {
		self.entries.remove(key).filter(|entry| entry.is_live(now)).map(|entry| entry.value)
	}

	pub(super) fn purge(&mut self, now: OffsetDateTime) -> usize {
		let before = self.entries.len();

		self.entries.retain(|_, entry| entry.is_live(now));

		before - self.entries.len()
	}
}
