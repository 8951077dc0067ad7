//! Request routing: one logical request, candidates tried in order
//! until one yields a usable response.

use std::sync::Arc;

use crate::connection::{Connection, ConnectionRegistry};
use crate::error::{CallError, UsageError};
use crate::request::LogicalRequest;
use crate::result::{CallResult, DelayedPlan, Outcome};
use crate::transport::{Transport, WireRequest};
use crate::version::{ServerVersion, WarningLedger};

/// The request-routing core.
///
/// Holds the connection registry (read-only during a dispatch), the
/// transport, the client's configured expectation version, and its own
/// deduplicating warning ledger. A dispatcher never retries a given
/// connection, never sleeps, and never evicts a connection after a
/// failure.
pub struct Dispatcher {
    registry: ConnectionRegistry,
    transport: Arc<dyn Transport>,
    expectation: Option<ServerVersion>,
    warnings: WarningLedger,
}

impl Dispatcher {
    pub fn new(registry: ConnectionRegistry, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
            expectation: None,
            warnings: WarningLedger::new(),
        }
    }

    /// The API version this client was written against, used for
    /// removed/deprecated checks.
    pub fn with_expectation(mut self, expectation: ServerVersion) -> Self {
        self.expectation = Some(expectation);
        self
    }

    /// Swap in an externally owned warning ledger (tests, shared state).
    pub fn with_warnings(mut self, warnings: WarningLedger) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn expectation(&self) -> Option<ServerVersion> {
        self.expectation
    }

    pub fn warnings(&self) -> &WarningLedger {
        &self.warnings
    }

    /// Execute one logical request.
    ///
    /// Contract violations (missing body on a mutating method, no
    /// usable connections, a removed API) fail synchronously before any
    /// I/O. Transport and HTTP failures never fail the call: candidates
    /// are tried in selection order, the first success wins, and if all
    /// fail the returned result captures the last failure's details —
    /// the most recently exercised target is the one expected to work.
    pub async fn dispatch(&self, request: LogicalRequest) -> Result<CallResult, CallError> {
        if request.method.requires_body() && request.body.is_none() {
            return Err(UsageError::MissingBody {
                method: request.method.as_str(),
            }
            .into());
        }

        request.span.check(self.expectation, &self.warnings)?;

        let candidates = self.registry.resolve(&request.selector)?;
        if candidates.is_empty() {
            return Err(UsageError::NoConnections.into());
        }

        let result = CallResult::new(request.hooks.clone());
        let mut last_failure: Option<Outcome> = None;

        for connection in candidates {
            if let Some(introduced) = request.span.introduced {
                match connection.server_version(self.transport.as_ref()).await {
                    Ok(version) if version < introduced => {
                        tracing::debug!(
                            target: "settee::dispatch",
                            connection = connection.name(),
                            %version,
                            %introduced,
                            "skipping connection older than the api"
                        );
                        continue;
                    }
                    Ok(_) => {}
                    Err(error) => {
                        last_failure =
                            Some(Outcome::transport_failure(connection.name(), &error));
                        continue;
                    }
                }
            }

            let wire = build_wire(&request, &connection);

            if request.deferred {
                return Ok(result.mark_delayed(DelayedPlan {
                    connection,
                    request: wire,
                }));
            }

            match self.transport.execute(wire).await {
                Ok(response) if response.is_success() => {
                    return Ok(result.finalize(Outcome::from_response(connection.name(), response)));
                }
                Ok(response) => {
                    tracing::debug!(
                        target: "settee::dispatch",
                        connection = connection.name(),
                        status = response.status,
                        "candidate failed, advancing"
                    );
                    last_failure = Some(Outcome::from_response(connection.name(), response));
                }
                Err(error) => {
                    tracing::debug!(
                        target: "settee::dispatch",
                        connection = connection.name(),
                        error = error.message(),
                        "transport failure, advancing"
                    );
                    last_failure = Some(Outcome::transport_failure(connection.name(), &error));
                }
            }
        }

        match last_failure {
            Some(outcome) => Ok(result.finalize(outcome)),
            // Every candidate was gated out by its version: same shape
            // as an empty selection, and no transport was invoked.
            None => Err(UsageError::NoConnections.into()),
        }
    }

    /// Drive a delayed result to completion over its chosen connection.
    /// Finalization runs through the same path as a synchronous call,
    /// so hook semantics are identical regardless of timing.
    pub async fn complete(&self, mut result: CallResult) -> Result<CallResult, CallError> {
        let plan = result.take_plan()?;
        let connection = plan.connection.name().to_owned();

        let outcome = match self.transport.execute(plan.request).await {
            Ok(response) => Outcome::from_response(&connection, response),
            Err(error) => Outcome::transport_failure(&connection, &error),
        };
        Ok(result.finalize(outcome))
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("connections", &self.registry.len())
            .field("expectation", &self.expectation)
            .finish_non_exhaustive()
    }
}

fn build_wire(request: &LogicalRequest, connection: &Connection) -> WireRequest {
    let mut wire = WireRequest::new(
        request.method,
        connection.url_for(&request.path, &request.query),
    );
    wire.headers = request.headers.clone();
    wire.headers
        .entry(String::from("accept"))
        .or_insert_with(|| String::from("application/json"));

    if let Some(body) = &request.body {
        wire.headers
            .entry(String::from("content-type"))
            .or_insert_with(|| String::from("application/json"));
        wire.body = Some(serde_json::to_vec(body).expect("JSON value always serializes"));
    }

    connection.credentials().apply(&mut wire.headers);
    wire
}
