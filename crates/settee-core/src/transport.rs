//! Transport boundary: the dispatcher never performs I/O itself.
//!
//! A [`Transport`] takes one fully built [`WireRequest`] and yields a
//! [`WireResponse`]. Bindings live outside this crate (the `settee`
//! crate ships a reqwest one); the core only relies on this contract.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::error::TransportError;

/// HTTP method set used by the document-database API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
    Head,
}

impl Method {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
        }
    }

    /// Mutating methods must carry a body, even a logically empty one.
    pub const fn requires_body(self) -> bool {
        matches!(self, Self::Put | Self::Post)
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outgoing call, fully resolved against a concrete connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRequest {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl WireRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

/// One decoded segment of a response body.
///
/// Plain responses have exactly one part; multipart responses carry the
/// JSON document first and attachment bytes as named followers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirePart {
    pub name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl WirePart {
    pub fn json_bytes(bytes: Vec<u8>) -> Self {
        Self {
            name: None,
            content_type: Some(String::from("application/json")),
            bytes,
        }
    }

    pub fn named(name: impl Into<String>, content_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: Some(name.into()),
            content_type,
            bytes,
        }
    }

    fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.split(';').next().is_some_and(|m| m.trim() == "application/json"))
    }
}

/// Response descriptor handed back by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    parts: Vec<WirePart>,
}

impl WireResponse {
    pub fn new(status: u16, headers: BTreeMap<String, String>, parts: Vec<WirePart>) -> Self {
        Self {
            status,
            headers,
            parts,
        }
    }

    /// Convenience constructor for a single-part JSON response.
    pub fn json(status: u16, value: &Value) -> Self {
        Self::new(
            status,
            BTreeMap::new(),
            vec![WirePart::json_bytes(value.to_string().into_bytes())],
        )
    }

    pub const fn is_success(&self) -> bool {
        self.status < 400
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Decode the primary JSON payload: the first JSON part of a
    /// multipart body, or the single part of a plain one.
    pub fn primary_json(&self) -> Result<Value, TransportError> {
        let part = self
            .parts
            .iter()
            .find(|part| part.is_json())
            .or_else(|| self.parts.first())
            .ok_or_else(|| TransportError::new("response carries no body"))?;

        serde_json::from_slice(&part.bytes)
            .map_err(|err| TransportError::new(format!("response is not JSON: {err}")))
    }

    /// Raw bytes of a named secondary part. Absence is an expected
    /// outcome (the attachment simply is not there), not an error.
    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.parts
            .iter()
            .find(|part| part.name.as_deref() == Some(name))
            .map(|part| part.bytes.as_slice())
    }

    pub fn parts(&self) -> &[WirePart] {
        &self.parts
    }
}

/// Transport contract consumed by the dispatcher.
pub trait Transport: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: WireRequest,
    ) -> Pin<Box<dyn Future<Output = Result<WireResponse, TransportError>> + Send + 'a>>;
}
