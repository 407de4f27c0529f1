//! Inbound request view handed to authentication strategies.

// self
use crate::_prelude::*;

/// Transport-agnostic snapshot of an inbound request.
///
/// Header names are stored lowercased; values are JSON so nested header structures produced
/// by body parsers (e.g. `auth[signature]=...`) survive intact.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
	headers: JsonMap<String, Value>,
	/// Parsed request body.
	pub body: Value,
	/// Raw request body, when the transport kept it.
	pub raw_body: Option<String>,
	/// Remote peer address.
	pub remote_addr: Option<IpAddr>,
}
impl RequestContext {
	/// Creates an empty request context.
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds or replaces a header.
	pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<Value>) -> Self {
		self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());

		self
	}

	/// Sets the parsed body.
	pub fn with_body(mut self, body: Value) -> Self {
		self.body = body;

		self
	}

	/// Sets the raw body used for signature verification.
	pub fn with_raw_body(mut self, raw: impl Into<String>) -> Self {
		self.raw_body = Some(raw.into());

		self
	}

	/// Sets the remote peer address.
	pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
		self.remote_addr = Some(addr);

		self
	}

	/// All headers, keyed by lowercased name.
	pub fn headers(&self) -> &JsonMap<String, Value> {
		&self.headers
	}

	/// Looks up a header by case-insensitive name.
	pub fn header(&self, name: &str) -> Option<&Value> {
		self.headers.get(&name.to_ascii_lowercase())
	}

	/// Looks up a header whose value is a non-empty string.
	pub fn header_str(&self, name: &str) -> Option<&str> {
		self.header(name).and_then(Value::as_str).filter(|value| !value.is_empty())
	}

	/// Walks a bracket/dot-separated key chain through the header map.
	///
	/// `auth[signature]`, `auth.signature` and `list[0]` are all accepted. Returns `None` as
	/// soon as a segment is absent.
	pub fn lookup(&self, chain: &str) -> Option<&Value> {
		let mut segments = key_chain(chain);
		let first = segments.next()?.to_ascii_lowercase();
		let mut current = self.headers.get(&first)?;

		for segment in segments {
			current = match current {
				Value::Object(map) => map.get(segment)?,
				Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
				_ => return None,
			};
		}

		Some(current)
	}

	/// Bytes the caller signed: the raw body when available, otherwise the serialized body.
	pub fn canonical_payload(&self) -> Vec<u8> {
		match &self.raw_body {
			Some(raw) => raw.as_bytes().to_vec(),
			None => match &self.body {
				Value::Null => Vec::new(),
				Value::String(text) => text.as_bytes().to_vec(),
				other => other.to_string().into_bytes(),
			},
		}
	}
}

fn key_chain(chain: &str) -> impl Iterator<Item = &str> {
	chain.split(['.', '[', ']']).filter(|segment| !segment.is_empty())
}
