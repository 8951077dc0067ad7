//! Named bidirectional converters between wire JSON and richer values.
//!
//! Endpoint methods pick fields to translate by symbolic name ("epoch",
//! "node", ...). Callers may register their own entries at construction
//! time; a registered entry overrides the built-in per function, and a
//! query encoding falls back to the wire encoding, then to the default
//! string form.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::ConvertError;
use crate::version::ServerVersion;

pub type DecodeFn = Arc<dyn Fn(&Value) -> Result<Value, ConvertError> + Send + Sync>;
pub type EncodeFn = Arc<dyn Fn(&Value) -> Result<Value, ConvertError> + Send + Sync>;
pub type QueryFn = Arc<dyn Fn(&Value) -> Result<String, ConvertError> + Send + Sync>;

/// One named conversion triple. Unset functions fall back to the
/// built-in entry of the same name, then to identity/default behavior.
#[derive(Clone, Default)]
pub struct Converter {
    pub decode: Option<DecodeFn>,
    pub encode: Option<EncodeFn>,
    pub to_query: Option<QueryFn>,
}

impl Converter {
    pub fn decoding(decode: impl Fn(&Value) -> Result<Value, ConvertError> + Send + Sync + 'static) -> Self {
        Self {
            decode: Some(Arc::new(decode)),
            ..Self::default()
        }
    }

    pub fn with_encode(
        mut self,
        encode: impl Fn(&Value) -> Result<Value, ConvertError> + Send + Sync + 'static,
    ) -> Self {
        self.encode = Some(Arc::new(encode));
        self
    }

    pub fn with_query(
        mut self,
        to_query: impl Fn(&Value) -> Result<String, ConvertError> + Send + Sync + 'static,
    ) -> Self {
        self.to_query = Some(Arc::new(to_query));
        self
    }
}

/// Registry mapping symbolic names to converters.
#[derive(Clone, Default)]
pub struct ConverterTable {
    entries: HashMap<String, Converter>,
}

impl ConverterTable {
    /// Empty table, no built-ins. Mostly useful in tests.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Table seeded with the built-in entries: "epoch", "bool", "uri",
    /// "version" and "node".
    pub fn builtin() -> Self {
        let mut table = Self::default();
        table.insert("epoch", epoch_converter());
        table.insert("bool", bool_converter());
        table.insert("uri", uri_converter());
        table.insert("version", version_converter());
        table.insert("node", node_converter());
        table
    }

    /// Add or override an entry. Functions left unset keep whatever the
    /// existing entry (usually a built-in) provides.
    pub fn insert(&mut self, name: impl Into<String>, converter: Converter) {
        let name = name.into();
        let merged = match self.entries.remove(&name) {
            Some(existing) => Converter {
                decode: converter.decode.or(existing.decode),
                encode: converter.encode.or(existing.encode),
                to_query: converter.to_query.or(existing.to_query),
            },
            None => converter,
        };
        self.entries.insert(name, merged);
    }

    fn entry(&self, name: &str) -> Result<&Converter, ConvertError> {
        self.entries.get(name).ok_or_else(|| ConvertError::UnknownConverter {
            name: name.to_owned(),
        })
    }

    /// Wire representation to native representation.
    pub fn decode(&self, name: &str, value: &Value) -> Result<Value, ConvertError> {
        match &self.entry(name)?.decode {
            Some(decode) => decode(value),
            None => Ok(value.clone()),
        }
    }

    /// Native representation to wire body representation.
    pub fn encode(&self, name: &str, value: &Value) -> Result<Value, ConvertError> {
        match &self.entry(name)?.encode {
            Some(encode) => encode(value),
            None => Ok(value.clone()),
        }
    }

    /// Native representation to a query-string fragment.
    ///
    /// Lookup order: the entry's query encoder, then its wire encoder
    /// (stringified), then the default string form.
    pub fn query_encode(&self, name: &str, value: &Value) -> Result<String, ConvertError> {
        let entry = self.entry(name)?;
        if let Some(to_query) = &entry.to_query {
            return to_query(value);
        }
        if let Some(encode) = &entry.encode {
            return Ok(plain_query_form(&encode(value)?));
        }
        Ok(plain_query_form(value))
    }
}

impl std::fmt::Debug for ConverterTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ConverterTable").field("entries", &names).finish()
    }
}

/// Default query form: bare strings stay bare, everything else is
/// compact JSON (the server expects JSON-encoded keys and arrays).
pub fn plain_query_form(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn epoch_converter() -> Converter {
    Converter::decoding(|value| {
        let seconds = value.as_i64().ok_or(ConvertError::BadShape {
            name: "epoch",
            expected: "an integer number of seconds",
        })?;
        let stamp = OffsetDateTime::from_unix_timestamp(seconds).map_err(|_| {
            ConvertError::BadShape {
                name: "epoch",
                expected: "seconds within the representable range",
            }
        })?;
        let text = stamp.format(&Rfc3339).map_err(|_| ConvertError::BadShape {
            name: "epoch",
            expected: "a formattable timestamp",
        })?;
        Ok(Value::String(text))
    })
    .with_encode(|value| {
        let text = value.as_str().ok_or(ConvertError::BadShape {
            name: "epoch",
            expected: "an RFC3339 timestamp string",
        })?;
        let stamp = OffsetDateTime::parse(text, &Rfc3339).map_err(|_| ConvertError::BadShape {
            name: "epoch",
            expected: "an RFC3339 timestamp string",
        })?;
        Ok(Value::from(stamp.unix_timestamp()))
    })
}

fn bool_converter() -> Converter {
    Converter::decoding(|value| {
        value.as_bool().map(Value::Bool).ok_or(ConvertError::BadShape {
            name: "bool",
            expected: "a JSON boolean",
        })
    })
    .with_query(|value| {
        let flag = value.as_bool().ok_or(ConvertError::BadShape {
            name: "bool",
            expected: "a JSON boolean",
        })?;
        Ok(String::from(if flag { "true" } else { "false" }))
    })
}

fn uri_converter() -> Converter {
    Converter::decoding(|value| {
        let text = value.as_str().ok_or(ConvertError::BadShape {
            name: "uri",
            expected: "a string",
        })?;
        Ok(Value::String(text.trim().to_owned()))
    })
}

fn version_converter() -> Converter {
    Converter::decoding(|value| {
        let text = value.as_str().ok_or(ConvertError::BadShape {
            name: "version",
            expected: "a version string",
        })?;
        let version = ServerVersion::parse(text).ok_or(ConvertError::BadShape {
            name: "version",
            expected: "a MAJOR.MINOR.PATCH version string",
        })?;
        Ok(Value::String(version.to_string()))
    })
}

fn node_converter() -> Converter {
    Converter::decoding(|value| {
        let text = value.as_str().ok_or(ConvertError::BadShape {
            name: "node",
            expected: "a node name string",
        })?;
        let (name, host) = text.split_once('@').ok_or(ConvertError::BadShape {
            name: "node",
            expected: "a 'name@host' node name",
        })?;
        Ok(serde_json::json!({ "name": name, "host": host }))
    })
    .with_encode(|value| {
        let name = value.get("name").and_then(Value::as_str);
        let host = value.get("host").and_then(Value::as_str);
        match (name, host) {
            (Some(name), Some(host)) => Ok(Value::String(format!("{name}@{host}"))),
            _ => Err(ConvertError::BadShape {
                name: "node",
                expected: "an object with 'name' and 'host'",
            }),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn epoch_round_trips_through_rfc3339() {
        let table = ConverterTable::builtin();

        let decoded = table.decode("epoch", &json!(1_700_000_000)).expect("decode");
        assert_eq!(decoded, json!("2023-11-14T22:13:20Z"));

        let encoded = table.encode("epoch", &decoded).expect("encode");
        assert_eq!(encoded, json!(1_700_000_000));
    }

    #[test]
    fn bool_query_form_is_lowercase_text() {
        let table = ConverterTable::builtin();
        assert_eq!(table.query_encode("bool", &json!(true)).expect("query"), "true");
        assert_eq!(table.query_encode("bool", &json!(false)).expect("query"), "false");
    }

    #[test]
    fn node_decode_splits_name_and_host() {
        let table = ConverterTable::builtin();
        let decoded = table
            .decode("node", &json!("couchdb@127.0.0.1"))
            .expect("decode");
        assert_eq!(decoded, json!({"name": "couchdb", "host": "127.0.0.1"}));
    }

    #[test]
    fn unknown_names_are_reported() {
        let table = ConverterTable::builtin();
        let err = table.decode("flux", &json!(1)).expect_err("unknown");
        assert!(matches!(err, ConvertError::UnknownConverter { .. }));
    }

    #[test]
    fn query_encoding_prefers_override_then_encode_then_default() {
        let mut table = ConverterTable::builtin();

        // "version" has no query encoder and no wire encoder: default form.
        assert_eq!(
            table.query_encode("version", &json!("3.3.3")).expect("query"),
            "3.3.3"
        );

        // Registering a query override wins without touching decode.
        table.insert(
            "version",
            Converter::default().with_query(|value| Ok(format!("v{}", plain_query_form(value)))),
        );
        assert_eq!(
            table.query_encode("version", &json!("3.3.3")).expect("query"),
            "v3.3.3"
        );
        assert!(table.decode("version", &json!("3.3.3")).is_ok());
    }
}
