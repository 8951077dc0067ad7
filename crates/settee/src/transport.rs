//! reqwest binding for the core transport contract.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use settee_core::{Method, Transport, TransportError, WirePart, WireRequest, WireResponse};

/// Production transport backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Arc<reqwest::Client>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent("settee/0.1.0")
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for ReqwestTransport {
    fn execute<'a>(
        &'a self,
        request: WireRequest,
    ) -> Pin<Box<dyn Future<Output = Result<WireResponse, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let mut builder = match request.method {
                Method::Get => self.client.get(&request.url),
                Method::Put => self.client.put(&request.url),
                Method::Post => self.client.post(&request.url),
                Method::Delete => self.client.delete(&request.url),
                Method::Head => self.client.head(&request.url),
            };

            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(|err| {
                if err.is_timeout() {
                    TransportError::new(format!("request timeout: {err}"))
                } else if err.is_connect() {
                    TransportError::new(format!("connection failed: {err}"))
                } else {
                    TransportError::new(format!("request failed: {err}"))
                }
            })?;

            let status = response.status().as_u16();
            let mut headers = BTreeMap::new();
            for (name, value) in response.headers() {
                if let Ok(value) = value.to_str() {
                    headers
                        .entry(name.as_str().to_ascii_lowercase())
                        .or_insert_with(|| value.to_owned());
                }
            }

            let content_type = headers.get("content-type").cloned();
            let body = response
                .bytes()
                .await
                .map_err(|err| TransportError::new(format!("failed to read response body: {err}")))?
                .to_vec();

            let parts = split_parts(content_type.as_deref(), body);
            Ok(WireResponse::new(status, headers, parts))
        })
    }
}

/// Break a response body into parts: multipart bodies by boundary,
/// anything else as a single part.
fn split_parts(content_type: Option<&str>, body: Vec<u8>) -> Vec<WirePart> {
    if let Some(content_type) = content_type {
        if content_type.starts_with("multipart/") {
            if let Some(boundary) = boundary_of(content_type) {
                let parts = split_multipart(&body, &boundary);
                if !parts.is_empty() {
                    return parts;
                }
            }
        }
    }

    vec![WirePart {
        name: None,
        content_type: content_type.map(ToOwned::to_owned),
        bytes: body,
    }]
}

fn boundary_of(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        if !key.eq_ignore_ascii_case("boundary") {
            return None;
        }
        Some(value.trim_matches('"').to_owned())
    })
}

fn split_multipart(body: &[u8], boundary: &str) -> Vec<WirePart> {
    let delimiter = format!("--{boundary}");

    let mut parts = Vec::new();
    let mut cursor = 0;
    while let Some(found) = find(body, delimiter.as_bytes(), cursor) {
        let segment_start = found + delimiter.len();
        // Closing delimiter carries a trailing "--".
        if body[segment_start..].starts_with(b"--") {
            break;
        }
        let Some(next) = find(body, delimiter.as_bytes(), segment_start) else {
            break;
        };
        if let Some(part) = parse_part(&body[segment_start..next]) {
            parts.push(part);
        }
        cursor = next;
    }
    parts
}

fn parse_part(segment: &[u8]) -> Option<WirePart> {
    let segment = strip_prefix_crlf(segment);
    let header_end = find(segment, b"\r\n\r\n", 0)?;
    let headers = std::str::from_utf8(&segment[..header_end]).ok()?;

    let mut content_type = None;
    let mut name = None;
    for line in headers.lines() {
        let (key, value) = match line.split_once(':') {
            Some(pair) => pair,
            None => continue,
        };
        let value = value.trim();
        if key.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.to_owned());
        } else if key.eq_ignore_ascii_case("content-disposition") {
            name = value.split(';').find_map(|param| {
                let (k, v) = param.trim().split_once('=')?;
                if k.eq_ignore_ascii_case("filename") {
                    Some(v.trim_matches('"').to_owned())
                } else {
                    None
                }
            });
        }
    }

    let mut bytes = segment[header_end + 4..].to_vec();
    // Drop the CRLF that precedes the next delimiter.
    if bytes.ends_with(b"\r\n") {
        bytes.truncate(bytes.len() - 2);
    }

    Some(WirePart {
        name,
        content_type,
        bytes,
    })
}

fn strip_prefix_crlf(segment: &[u8]) -> &[u8] {
    segment.strip_prefix(b"\r\n").unwrap_or(segment)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|position| from + position)
}
