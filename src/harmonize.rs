//! Merge per-item transform results into one harmonized document.
//!
//! The output document holds its source entries as `{ "id", "data" }` objects in a `data`
//! array. Each entry is passed to a [`Transform`] together with the shape's schema fragment;
//! the partial results are concatenated under the shape's single key. One resulting item is
//! stored bare instead of as a one-element array.
//!
//! Harmonization never fails its caller: any transform or merge error yields
//! [`Harmonization::Unchanged`] carrying the original document.

// self
use crate::_prelude::*;

/// Field of the output document holding the entries.
pub const ENTRIES_FIELD: &str = "data";

/// Failure raised while transforming or merging one entry.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum HarmonizeError {
	/// The output document has no entry array.
	#[error("Output document has no `{ENTRIES_FIELD}` array.")]
	MissingEntries,
	/// A transform result was not a JSON object.
	#[error("Transform result for entry {index} is not an object.")]
	NotAnObject {
		/// Entry position.
		index: usize,
	},
	/// The transform itself failed.
	#[error("Transform failed: {0}.")]
	Transform(String),
}

/// Per-item transform supplied by a downstream adapter.
pub trait Transform
where
	Self: Send + Sync,
{
	/// Maps one `{ id, data }` entry onto a partial result shaped by `schema`.
	fn transform(&self, item: &Value, schema: &Value) -> Result<Value, HarmonizeError>;
}
impl<F> Transform for F
where
	F: Send + Sync + Fn(&Value, &Value) -> Result<Value, HarmonizeError>,
{
	fn transform(&self, item: &Value, schema: &Value) -> Result<Value, HarmonizeError> {
		self(item, schema)
	}
}

/// Target shape: the single top-level key and the schema fragment handed to transforms.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputShape {
	/// Key under which harmonized items belong.
	pub key: String,
	/// Schema fragment passed to every transform call.
	#[serde(default)]
	pub schema: Value,
}
impl OutputShape {
	/// Creates a shape without a schema fragment.
	pub fn new(key: impl Into<String>) -> Self {
		Self { key: key.into(), schema: Value::Null }
	}

	/// Attaches a schema fragment.
	pub fn with_schema(mut self, schema: Value) -> Self {
		self.schema = schema;

		self
	}
}

/// Result of [`Harmonizer::harmonize`].
#[derive(Clone, Debug, PartialEq)]
pub enum Harmonization {
	/// The document's entries were merged.
	Harmonized(Value),
	/// Harmonization failed; the original document is returned as is.
	Unchanged(Value),
}
impl Harmonization {
	/// Returns `true` when harmonization took place.
	pub fn is_harmonized(&self) -> bool {
		matches!(self, Self::Harmonized(_))
	}

	/// Returns the resulting document either way.
	pub fn into_value(self) -> Value {
		match self {
			Self::Harmonized(value) | Self::Unchanged(value) => value,
		}
	}
}

/// Shape plus transform.
#[derive(Clone)]
pub struct Harmonizer {
	shape: OutputShape,
	transform: Arc<dyn Transform>,
}
impl Harmonizer {
	/// Creates a harmonizer.
	pub fn new(shape: OutputShape, transform: Arc<dyn Transform>) -> Self {
		Self { shape, transform }
	}

	/// Target shape.
	pub fn shape(&self) -> &OutputShape {
		&self.shape
	}

	/// Harmonizes `output`, falling back to a copy of it on any failure.
	pub fn harmonize(&self, output: &Value) -> Harmonization {
		match self.merge(output) {
			Ok(merged) => {
				let mut document = output.clone();

				document[ENTRIES_FIELD] = merged;

				Harmonization::Harmonized(document)
			},
			Err(e) => {
				tracing::warn!(key = %self.shape.key, error = %e, "Harmonization skipped.");

				Harmonization::Unchanged(output.clone())
			},
		}
	}

	fn merge(&self, output: &Value) -> Result<Value, HarmonizeError> {
		let entries = output
			.get(ENTRIES_FIELD)
			.and_then(Value::as_array)
			.ok_or(HarmonizeError::MissingEntries)?;
		let key = self.shape.key.as_str();
		let mut accumulator: Option<JsonMap<String, Value>> = None;

		for (index, entry) in entries.iter().enumerate() {
			let Value::Object(mut partial) = self.transform.transform(entry, &self.shape.schema)?
			else {
				return Err(HarmonizeError::NotAnObject { index });
			};

			match accumulator.as_mut() {
				None => accumulator = Some(partial),
				Some(accumulator) => {
					let mut items = into_sequence(accumulator.remove(key));

					items.extend(into_sequence(partial.remove(key)));
					accumulator.insert(key.to_owned(), Value::Array(items));
				},
			}
		}

		let mut accumulator = accumulator.unwrap_or_default();
		let items = into_sequence(accumulator.remove(key));
		let collapsed = if items.len() == 1 {
			items.into_iter().next().unwrap_or_default()
		} else {
			Value::Array(flatten_one_level(items))
		};

		accumulator.insert(key.to_owned(), collapsed);

		Ok(Value::Object(accumulator))
	}
}
impl Debug for Harmonizer {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Harmonizer").field("shape", &self.shape).finish()
	}
}

/// Absent values become empty, sequences stay, anything else is wrapped.
fn into_sequence(value: Option<Value>) -> Vec<Value> {
	match value {
		None => Vec::new(),
		Some(Value::Array(items)) => items,
		Some(other) => vec![other],
	}
}

fn flatten_one_level(items: Vec<Value>) -> Vec<Value> {
	items
		.into_iter()
		.flat_map(|item| match item {
			Value::Array(inner) => inner,
			other => vec![other],
		})
		.collect()
}
