//! The client object: owns the registry, the dispatcher and the
//! converter table, and exposes the server-level endpoints.

use std::env;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use settee_core::{
    CallError, CallOptions, CallResult, Connection, ConnectionRegistry, ConverterTable,
    Credentials, Dispatcher, LogicalRequest, PageSpec, Paginator, ServerVersion, Transport,
    UsageError,
};

use crate::database::Database;
use crate::transport::ReqwestTransport;

/// Builder for a [`Client`].
///
/// # Environment Variables
///
/// | Variable | Meaning |
/// |----------|---------|
/// | `SETTEE_URL` | Base URL of the default server |
/// | `SETTEE_USER` | Basic-auth username |
/// | `SETTEE_PASSWORD` | Basic-auth password |
#[derive(Default)]
pub struct ClientBuilder {
    connections: Vec<Connection>,
    transport: Option<Arc<dyn Transport>>,
    expectation: Option<ServerVersion>,
    converters: Option<ConverterTable>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection from the `SETTEE_*` environment variables.
    pub fn from_env(mut self) -> Self {
        let Ok(url) = env::var("SETTEE_URL") else {
            return self;
        };
        let mut connection = Connection::new("default", url);
        if let (Ok(username), Ok(password)) = (env::var("SETTEE_USER"), env::var("SETTEE_PASSWORD"))
        {
            connection = connection.with_credentials(Credentials::Basic { username, password });
        }
        self.connections.push(connection);
        self
    }

    pub fn connection(mut self, connection: Connection) -> Self {
        self.connections.push(connection);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// The API version this client's code was written against.
    pub fn expect_version(mut self, expectation: ServerVersion) -> Self {
        self.expectation = Some(expectation);
        self
    }

    pub fn converters(mut self, converters: ConverterTable) -> Self {
        self.converters = Some(converters);
        self
    }

    pub fn build(self) -> Result<Client, UsageError> {
        let mut registry = ConnectionRegistry::new();
        for connection in self.connections {
            registry.register(connection)?;
        }

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::new()));
        let mut dispatcher = Dispatcher::new(registry, transport);
        if let Some(expectation) = self.expectation {
            dispatcher = dispatcher.with_expectation(expectation);
        }

        Ok(Client {
            dispatcher,
            converters: self.converters.unwrap_or_else(ConverterTable::builtin),
            last_info: Mutex::new(None),
        })
    }
}

/// Entry point to a cluster of document-database servers.
pub struct Client {
    dispatcher: Dispatcher,
    converters: ConverterTable,
    last_info: Mutex<Option<Value>>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn converters(&self) -> &ConverterTable {
        &self.converters
    }

    /// Handle on one database; no I/O happens until an operation runs.
    pub fn db(&self, name: impl Into<String>) -> Database<'_> {
        Database::new(self, name)
    }

    /// `GET /` — the server welcome document. The decoded values are
    /// kept in a single-slot cache readable via
    /// [`cached_info`](Self::cached_info).
    pub async fn info(&self, options: &CallOptions) -> Result<CallResult, CallError> {
        let request = LogicalRequest::get("/").with_options(options);
        let result = self.dispatcher.dispatch(request).await?;
        if result.is_ok() {
            if let Ok(values) = result.values() {
                *self.last_info.lock().expect("info lock") = Some(values);
            }
        }
        Ok(result)
    }

    /// Last known server welcome document, if any call fetched one.
    pub fn cached_info(&self) -> Option<Value> {
        self.last_info.lock().expect("info lock").clone()
    }

    /// `GET /_uuids` — server-allocated identifiers.
    pub async fn uuids(&self, count: usize, options: &CallOptions) -> Result<CallResult, CallError> {
        let request = LogicalRequest::get("/_uuids")
            .with_query("count", count.to_string())
            .with_options(options);
        self.dispatcher.dispatch(request).await
    }

    /// `GET /_all_dbs`.
    pub async fn all_dbs(&self, options: &CallOptions) -> Result<CallResult, CallError> {
        let request = LogicalRequest::get("/_all_dbs").with_options(options);
        self.dispatcher.dispatch(request).await
    }

    /// `GET /_up` — liveness probe.
    pub async fn up(&self, options: &CallOptions) -> Result<CallResult, CallError> {
        let request = LogicalRequest::get("/_up")
            .introduced(ServerVersion::new(2, 0, 0))
            .with_options(options);
        self.dispatcher.dispatch(request).await
    }

    /// `GET /_membership` — cluster node listing, with node names
    /// decoded through the "node" converter.
    pub async fn membership(&self, options: &CallOptions) -> Result<CallResult, CallError> {
        let converters = self.converters.clone();
        let request = LogicalRequest::get("/_membership")
            .introduced(ServerVersion::new(2, 0, 0))
            .with_options(
                &CallOptions::new().on_values(move |mut values| {
                    for key in ["all_nodes", "cluster_nodes"] {
                        let decoded = values.get(key).and_then(Value::as_array).map(|nodes| {
                            nodes
                                .iter()
                                .map(|node| {
                                    converters.decode("node", node).unwrap_or_else(|_| node.clone())
                                })
                                .collect::<Vec<_>>()
                        });
                        if let (Some(decoded), Some(slot)) = (decoded, values.get_mut(key)) {
                            *slot = Value::Array(decoded);
                        }
                    }
                    values
                }),
            )
            .with_options(options);
        self.dispatcher.dispatch(request).await
    }

    /// `POST /_session` — cookie login against one named connection.
    /// On success the session token replaces that connection's
    /// credentials, so subsequent calls ride the session.
    pub async fn session_login(
        &self,
        connection: &str,
        username: &str,
        password: &str,
    ) -> Result<CallResult, CallError> {
        let request = LogicalRequest::post("/_session")
            .with_body(json!({ "name": username, "password": password }))
            .on_connection(connection);
        let result = self.dispatcher.dispatch(request).await?;

        if result.is_ok() {
            let token = result
                .response()
                .and_then(|response| response.header("set-cookie"))
                .and_then(session_token);
            match (token, self.dispatcher.registry().by_name(connection)) {
                (Some(token), Some(connection)) => {
                    connection.set_credentials(Credentials::Session(token));
                }
                _ => {
                    tracing::warn!(
                        target: "settee::session",
                        connection,
                        "login succeeded but no session cookie was issued"
                    );
                }
            }
        }
        Ok(result)
    }

    /// Fetch the first logical page for a prepared request.
    pub async fn first_page(
        &self,
        request: LogicalRequest,
        spec: PageSpec,
    ) -> Result<CallResult, CallError> {
        Paginator::new(&self.dispatcher).first_page(request, spec).await
    }

    /// Continue a paged sequence from its previous result.
    pub async fn next_page(&self, prior: &CallResult) -> Result<CallResult, CallError> {
        Paginator::new(&self.dispatcher).next_page(prior).await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

fn session_token(set_cookie: &str) -> Option<String> {
    set_cookie.split(';').find_map(|cookie| {
        let (name, value) = cookie.trim().split_once('=')?;
        if name == "AuthSession" {
            Some(value.to_owned())
        } else {
            None
        }
    })
}
