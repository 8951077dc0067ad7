//! Documents as the client sees them: an id, a revision once the
//! server assigned one, and free-form fields.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use settee_core::{CallResult, NotReadyError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("document has no '_id'")]
    MissingId,

    #[error("document body must be a JSON object")]
    NotAnObject,

    #[error(transparent)]
    NotReady(#[from] NotReadyError),
}

/// One document. Fields exclude the `_id`/`_rev` bookkeeping, which
/// lives in the typed accessors.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    id: String,
    rev: Option<String>,
    fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            fields: Map::new(),
        }
    }

    /// Parse a wire object, pulling `_id` and `_rev` out of the fields.
    pub fn from_wire(value: Value) -> Result<Self, DocumentError> {
        let Value::Object(mut fields) = value else {
            return Err(DocumentError::NotAnObject);
        };
        let id = fields
            .remove("_id")
            .and_then(|id| id.as_str().map(ToOwned::to_owned))
            .ok_or(DocumentError::MissingId)?;
        let rev = fields
            .remove("_rev")
            .and_then(|rev| rev.as_str().map(ToOwned::to_owned));
        Ok(Self { id, rev, fields })
    }

    /// Parse the primary payload of a successful get.
    pub fn from_result(result: &CallResult) -> Result<Self, DocumentError> {
        Self::from_wire(result.values()?)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn rev(&self) -> Option<&str> {
        self.rev.as_deref()
    }

    /// Record the revision the server answered with.
    pub fn set_rev(&mut self, rev: impl Into<String>) {
        self.rev = Some(rev.into());
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Wire form for a put: fields plus `_id`, plus `_rev` when known.
    pub fn to_wire(&self) -> Value {
        let mut body = self.fields.clone();
        body.insert(String::from("_id"), Value::String(self.id.clone()));
        if let Some(rev) = &self.rev {
            body.insert(String::from("_rev"), Value::String(rev.clone()));
        }
        Value::Object(body)
    }
}

impl Serialize for Document {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_wire(value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_round_trip_keeps_bookkeeping_out_of_fields() {
        let doc = Document::from_wire(json!({
            "_id": "recipe-42",
            "_rev": "3-abc",
            "title": "stew",
        }))
        .expect("valid document");

        assert_eq!(doc.id(), "recipe-42");
        assert_eq!(doc.rev(), Some("3-abc"));
        assert_eq!(doc.field("title"), Some(&json!("stew")));
        assert!(doc.field("_id").is_none());

        assert_eq!(
            doc.to_wire(),
            json!({"_id": "recipe-42", "_rev": "3-abc", "title": "stew"})
        );
    }

    #[test]
    fn missing_id_is_rejected() {
        let err = Document::from_wire(json!({"title": "stew"})).expect_err("no id");
        assert_eq!(err, DocumentError::MissingId);
    }

    #[test]
    fn fresh_documents_have_no_rev_on_the_wire() {
        let mut doc = Document::new("note-1");
        doc.set_field("text", json!("hello"));

        assert_eq!(doc.to_wire(), json!({"_id": "note-1", "text": "hello"}));
    }
}
