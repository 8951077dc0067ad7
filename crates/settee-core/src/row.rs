//! Row views over multi-item responses.

use serde_json::Value;

/// What a row hook extracts from a response for one row position:
/// the raw fragment, its interpreted form, and optional
/// document-construction input.
#[derive(Debug, Clone, PartialEq)]
pub struct RowSeed {
    pub raw: Value,
    pub value: Value,
    pub doc: Option<Value>,
}

impl RowSeed {
    pub fn new(raw: Value, value: Value) -> Self {
        Self {
            raw,
            value,
            doc: None,
        }
    }

    pub fn with_doc(mut self, doc: Value) -> Self {
        self.doc = Some(doc);
        self
    }
}

/// One materialized element of a multi-item response.
///
/// Rows are built lazily on first access and cached per result in a
/// sparse per-column table keyed by their 1-based number; the owning
/// result keeps the cache, so a row only needs to know where it sits.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// 1-based position within its column.
    pub number: usize,
    /// Query index for multi-query responses; 0 for plain ones.
    pub column: usize,
    pub raw: Value,
    pub value: Value,
    pub doc: Option<Value>,
}

impl Row {
    pub(crate) fn from_seed(number: usize, column: usize, seed: RowSeed) -> Self {
        Self {
            number,
            column,
            raw: seed.raw,
            value: seed.value,
            doc: seed.doc,
        }
    }
}
