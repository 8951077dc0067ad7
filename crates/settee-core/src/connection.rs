//! Named backend connections and their registry.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{TransportError, UsageError};
use crate::transport::{Method, Transport, WireRequest};
use crate::version::ServerVersion;

/// Credential material attached to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    None,
    Basic { username: String, password: String },
    /// Pre-established session token, sent as the session cookie.
    Session(String),
}

impl Credentials {
    /// Write auth headers, leaving anything the caller already set alone.
    pub fn apply(&self, headers: &mut BTreeMap<String, String>) {
        match self {
            Self::None => {}
            Self::Basic { username, password } => {
                let token = BASE64.encode(format!("{username}:{password}"));
                headers
                    .entry(String::from("authorization"))
                    .or_insert_with(|| format!("Basic {token}"));
            }
            Self::Session(token) => {
                headers
                    .entry(String::from("cookie"))
                    .or_insert_with(|| format!("AuthSession={token}"));
            }
        }
    }
}

/// One reachable backend server.
///
/// Created at configuration time and owned by the registry; the
/// dispatcher only holds a handle while a call is in flight. The server
/// version is fetched on first use and cached; redundant re-fetches are
/// harmless (the welcome endpoint is an idempotent GET), so no locking
/// discipline beyond the cache slot itself is imposed.
pub struct Connection {
    name: String,
    base_url: String,
    credentials: Mutex<Credentials>,
    roles: BTreeSet<String>,
    version: Mutex<Option<ServerVersion>>,
}

impl Connection {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            credentials: Mutex::new(Credentials::None),
            roles: BTreeSet::new(),
            version: Mutex::new(None),
        }
    }

    pub fn with_credentials(self, credentials: Credentials) -> Self {
        *self.credentials.lock().expect("credentials lock") = credentials;
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn credentials(&self) -> Credentials {
        self.credentials.lock().expect("credentials lock").clone()
    }

    /// Replace the credential material, e.g. after a session login.
    pub fn set_credentials(&self, credentials: Credentials) {
        *self.credentials.lock().expect("credentials lock") = credentials;
    }

    /// Absolute target for `path` plus percent-encoded query pairs.
    pub fn url_for(&self, path: &str, query: &[(String, String)]) -> String {
        let mut url = format!("{}{}", self.base_url, path);
        for (index, (name, value)) in query.iter().enumerate() {
            let sep = if index == 0 { '?' } else { '&' };
            url.push(sep);
            url.push_str(&urlencoding::encode(name));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    /// Cached server version, fetching the welcome document on first use.
    pub async fn server_version(
        &self,
        transport: &dyn Transport,
    ) -> Result<ServerVersion, TransportError> {
        if let Some(version) = *self.version.lock().expect("version lock") {
            return Ok(version);
        }

        let mut request = WireRequest::new(Method::Get, self.url_for("/", &[]));
        self.credentials().apply(&mut request.headers);

        let response = transport.execute(request).await?;
        let answer = response.primary_json()?;
        let version = answer
            .get("version")
            .and_then(|v| v.as_str())
            .and_then(ServerVersion::parse)
            .ok_or_else(|| {
                TransportError::new(format!(
                    "server '{}' reported no parseable version",
                    self.name
                ))
            })?;

        *self.version.lock().expect("version lock") = Some(version);
        Ok(version)
    }

    /// Forget the cached version so the next use re-fetches it.
    pub fn invalidate_version(&self) {
        *self.version.lock().expect("version lock") = None;
    }

    /// Seed the version cache without a network round trip.
    pub fn prime_version(&self, version: ServerVersion) {
        *self.version.lock().expect("version lock") = Some(version);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("roles", &self.roles)
            .finish_non_exhaustive()
    }
}

/// How a logical request picks its candidate connections.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionSelector {
    /// All registered connections, in registration order.
    #[default]
    All,
    Named(String),
    Set(Vec<String>),
    Role(String),
}

/// Ordered, name-keyed collection of connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Vec<Arc<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connection: Connection) -> Result<Arc<Connection>, UsageError> {
        if self.by_name(connection.name()).is_some() {
            return Err(UsageError::DuplicateConnection {
                name: connection.name().to_owned(),
            });
        }
        let connection = Arc::new(connection);
        self.connections.push(Arc::clone(&connection));
        Ok(connection)
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<Connection>> {
        self.connections
            .iter()
            .find(|connection| connection.name() == name)
            .cloned()
    }

    pub fn with_role(&self, role: &str) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter(|connection| connection.has_role(role))
            .cloned()
            .collect()
    }

    /// All connections in registration order.
    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.connections.clone()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Resolve a selector to candidates, preserving precedence order.
    /// Unknown names are a usage error; an empty result is left to the
    /// dispatcher, which reports it as a no-connections condition.
    pub fn resolve(&self, selector: &ConnectionSelector) -> Result<Vec<Arc<Connection>>, UsageError> {
        match selector {
            ConnectionSelector::All => Ok(self.all()),
            ConnectionSelector::Named(name) => {
                let connection = self.by_name(name).ok_or_else(|| UsageError::UnknownConnection {
                    name: name.clone(),
                })?;
                Ok(vec![connection])
            }
            ConnectionSelector::Set(names) => names
                .iter()
                .map(|name| {
                    self.by_name(name).ok_or_else(|| UsageError::UnknownConnection {
                        name: name.clone(),
                    })
                })
                .collect(),
            ConnectionSelector::Role(role) => Ok(self.with_role(role)),
        }
    }
}
