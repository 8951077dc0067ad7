//! Uniform outcome envelope for one logical request.
//!
//! A [`CallResult`] is created empty by the dispatcher, then either
//! finalized directly or parked in the delayed state until the caller
//! drives completion. Its payload is exposed in three idempotent forms:
//! the raw transport response, the decoded JSON answer, and the
//! interpreted values; multi-item payloads additionally materialize as
//! cached [`Row`]s.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::connection::Connection;
use crate::error::{NotReadyError, TransportError, UsageError};
use crate::paginate::PageState;
use crate::request::HookSet;
use crate::row::{Row, RowSeed};
use crate::transport::{WireRequest, WireResponse};

/// Distinguished status for a delayed result: request accepted, no
/// response yet.
pub const STATUS_PROCESSING: u16 = 102;

/// Status recorded when the transport itself failed (connect, timeout,
/// unparseable payload) and no HTTP status exists.
pub const STATUS_TRANSPORT_FAILURE: u16 = 599;

/// Lifecycle of a result. No transition ever leaves `Final`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unstarted,
    Delayed,
    Final,
}

impl Phase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unstarted => "unstarted",
            Self::Delayed => "delayed",
            Self::Final => "final",
        }
    }
}

/// Continuation descriptor stashed on a delayed result: the connection
/// the dispatcher chose and the wire request it prepared.
#[derive(Clone)]
pub struct DelayedPlan {
    pub(crate) connection: Arc<Connection>,
    pub(crate) request: WireRequest,
}

impl std::fmt::Debug for DelayedPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedPlan")
            .field("connection", &self.connection.name())
            .field("url", &self.request.url)
            .finish()
    }
}

/// Everything `finalize` needs: who answered, with what.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub connection: Option<String>,
    pub status: u16,
    pub message: String,
    pub response: Option<WireResponse>,
}

impl Outcome {
    /// Outcome for a response the transport actually produced. The
    /// message is taken from the body's error/reason fields when the
    /// server supplies them.
    pub fn from_response(connection: &str, response: WireResponse) -> Self {
        let message = if response.is_success() {
            String::from("OK")
        } else {
            describe_failure(&response)
        };
        Self {
            connection: Some(connection.to_owned()),
            status: response.status,
            message,
            response: Some(response),
        }
    }

    /// Outcome for a transport-level failure with no HTTP response.
    pub fn transport_failure(connection: &str, error: &TransportError) -> Self {
        Self {
            connection: Some(connection.to_owned()),
            status: STATUS_TRANSPORT_FAILURE,
            message: error.message().to_owned(),
            response: None,
        }
    }
}

fn describe_failure(response: &WireResponse) -> String {
    let detail = response.primary_json().ok().and_then(|answer| {
        let error = answer.get("error")?.as_str()?.to_owned();
        match answer.get("reason").and_then(Value::as_str) {
            Some(reason) => Some(format!("{error}: {reason}")),
            None => Some(error),
        }
    });
    match detail {
        Some(detail) => format!("HTTP {}: {detail}", response.status),
        None => format!("HTTP {}", response.status),
    }
}

#[derive(Default)]
struct ColumnRows {
    cells: BTreeMap<usize, Row>,
    complete: bool,
}

/// Outcome of one logical request, or of one physical round of a paged
/// sequence.
///
/// The status code alone determines success: `is_ok()` is the truth
/// value of the whole object. Raw answer, interpreted values and rows
/// are computed at most once and cached.
pub struct CallResult {
    phase: Phase,
    status: u16,
    message: String,
    connection: Option<String>,
    response: Option<WireResponse>,
    answer: Mutex<Option<Value>>,
    values: Mutex<Option<Value>>,
    rows: Mutex<HashMap<usize, ColumnRows>>,
    page: Option<PageState>,
    plan: Option<DelayedPlan>,
    hooks: HookSet,
}

impl CallResult {
    /// Fresh, unstarted result carrying the request's hooks.
    pub fn new(hooks: HookSet) -> Self {
        Self {
            phase: Phase::Unstarted,
            status: 0,
            message: String::new(),
            connection: None,
            response: None,
            answer: Mutex::new(None),
            values: Mutex::new(None),
            rows: Mutex::new(HashMap::new()),
            page: None,
            plan: None,
            hooks,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Final
    }

    /// The object's truth value: ready and below the error threshold.
    pub fn is_ok(&self) -> bool {
        self.is_ready() && self.status < 400
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Name of the connection that actually answered (or was chosen,
    /// for a delayed result).
    pub fn connection(&self) -> Option<&str> {
        self.connection.as_deref()
    }

    /// The raw transport response, for byte-level access to secondary
    /// parts (attachments).
    pub fn response(&self) -> Option<&WireResponse> {
        self.response.as_ref()
    }

    /// Park this result until the caller drives completion. No hooks
    /// fire here.
    pub(crate) fn mark_delayed(mut self, plan: DelayedPlan) -> Self {
        self.phase = Phase::Delayed;
        self.status = STATUS_PROCESSING;
        self.message = String::from("request deferred");
        self.connection = Some(plan.connection.name().to_owned());
        self.plan = Some(plan);
        self
    }

    pub(crate) fn take_plan(&mut self) -> Result<DelayedPlan, UsageError> {
        if self.phase != Phase::Delayed {
            return Err(UsageError::NotDelayed {
                phase: self.phase.as_str(),
            });
        }
        self.plan.take().ok_or(UsageError::NotDelayed {
            phase: self.phase.as_str(),
        })
    }

    /// Attach a response and fire the hook chain.
    ///
    /// Any previously memoized answer/values/rows are dropped first, so
    /// a result reused across pagination rounds always reflects its
    /// latest round. `on_error` hooks run in registration order for
    /// failures, `on_final` in registration order always, and `on_chain`
    /// in reverse registration order, each hook's return value threaded
    /// into the next; the last return value becomes this call's result.
    pub fn finalize(mut self, outcome: Outcome) -> CallResult {
        self.phase = Phase::Final;
        self.status = outcome.status;
        self.message = outcome.message;
        self.connection = outcome.connection;
        self.response = outcome.response;
        self.plan = None;
        *self.answer.lock().expect("answer lock") = None;
        *self.values.lock().expect("values lock") = None;
        self.rows.lock().expect("rows lock").clear();

        let hooks = self.hooks.clone();
        if !self.is_ok() {
            for hook in &hooks.on_error {
                hook(&self);
            }
        }
        for hook in &hooks.on_final {
            hook(&self);
        }

        let mut current = self;
        for hook in hooks.on_chain.iter().rev() {
            current = hook(current);
        }
        current
    }

    /// The decoded primary JSON payload, memoized. For multipart
    /// responses this is the first JSON part; a bodyless outcome
    /// decodes to `null`.
    pub fn raw_answer(&self) -> Result<Value, NotReadyError> {
        if !self.is_ready() {
            return Err(NotReadyError);
        }
        let mut slot = self.answer.lock().expect("answer lock");
        if slot.is_none() {
            let decoded = self
                .response
                .as_ref()
                .and_then(|response| response.primary_json().ok())
                .unwrap_or(Value::Null);
            *slot = Some(decoded);
        }
        Ok(slot.clone().expect("memoized above"))
    }

    /// The raw answer threaded through the `on_values` hooks, reverse
    /// registration order, fired exactly once regardless of how often
    /// this is called.
    pub fn values(&self) -> Result<Value, NotReadyError> {
        if !self.is_ready() {
            return Err(NotReadyError);
        }
        if let Some(memoized) = self.values.lock().expect("values lock").as_ref() {
            return Ok(memoized.clone());
        }

        let mut current = self.raw_answer()?;
        for hook in self.hooks.on_values.iter().rev() {
            current = hook(current);
        }
        *self.values.lock().expect("values lock") = Some(current.clone());
        Ok(current)
    }

    /// 1-based row access for column 0.
    pub fn row(&self, number: usize) -> Result<Option<Row>, NotReadyError> {
        self.row_in(number, 0)
    }

    /// 1-based row access within one query column. `None` means "no
    /// such row"; it is not an error.
    pub fn row_in(&self, number: usize, column: usize) -> Result<Option<Row>, NotReadyError> {
        if !self.is_ready() {
            return Err(NotReadyError);
        }
        if number == 0 {
            return Ok(None);
        }

        {
            let cache = self.rows.lock().expect("rows lock");
            if let Some(rows) = cache.get(&column) {
                if let Some(row) = rows.cells.get(&number) {
                    return Ok(Some(row.clone()));
                }
                if rows.complete {
                    return Ok(None);
                }
            }
        }

        let seed = self.materialize(number, column);
        let Some(seed) = seed else {
            return Ok(None);
        };

        let mut cache = self.rows.lock().expect("rows lock");
        let rows = cache.entry(column).or_default();
        let row = rows
            .cells
            .entry(number)
            .or_insert_with(|| Row::from_seed(number, column, seed));
        Ok(Some(row.clone()))
    }

    fn materialize(&self, number: usize, column: usize) -> Option<RowSeed> {
        for hook in self.hooks.on_row.iter().rev() {
            if let Some(seed) = hook(self, number, column) {
                return Some(seed);
            }
        }
        None
    }

    /// All rows of column 0, forcing materialization.
    pub fn rows(&self) -> Result<Vec<Row>, NotReadyError> {
        self.rows_in(0)
    }

    /// Force-materialize a column by probing row 1, 2, ... until the
    /// hooks report no data, then remember completeness so later calls
    /// probe nothing.
    pub fn rows_in(&self, column: usize) -> Result<Vec<Row>, NotReadyError> {
        if !self.is_ready() {
            return Err(NotReadyError);
        }

        let already_complete = self
            .rows
            .lock()
            .expect("rows lock")
            .get(&column)
            .is_some_and(|rows| rows.complete);

        if !already_complete {
            let mut number = 1;
            while self.row_in(number, column)?.is_some() {
                number += 1;
            }
            let mut cache = self.rows.lock().expect("rows lock");
            cache.entry(column).or_default().complete = true;
        }

        let cache = self.rows.lock().expect("rows lock");
        let rows = cache.get(&column).expect("column marked complete");
        Ok(rows.cells.values().cloned().collect())
    }

    pub(crate) fn set_page(&mut self, state: PageState) {
        self.page = Some(state);
    }

    /// Pagination state attached by the paginator, when this result
    /// belongs to a paged sequence.
    pub fn page_state(&self) -> Option<&PageState> {
        self.page.as_ref()
    }

    /// Items of the accumulated logical page (empty for unpaged results).
    pub fn page(&self) -> &[Value] {
        self.page.as_ref().map_or(&[], PageState::items)
    }

    /// Whether the paged sequence is exhausted. An unpaged result is
    /// its own last page.
    pub fn is_last_page(&self) -> bool {
        self.page.as_ref().map_or(true, PageState::is_last_page)
    }

    /// Whether further rounds would be attempted for the current
    /// logical page.
    pub fn page_is_partial(&self) -> bool {
        self.page.as_ref().is_some_and(PageState::is_partial)
    }
}

impl std::fmt::Debug for CallResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallResult")
            .field("phase", &self.phase)
            .field("status", &self.status)
            .field("message", &self.message)
            .field("connection", &self.connection)
            .field("paged", &self.page.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::CallOptions;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn final_result(hooks: HookSet, status: u16, body: &Value) -> CallResult {
        CallResult::new(hooks).finalize(Outcome::from_response(
            "local",
            WireResponse::json(status, body),
        ))
    }

    #[test]
    fn not_ready_until_finalized() {
        let result = CallResult::new(HookSet::default());
        assert!(!result.is_ok());
        assert_eq!(result.raw_answer(), Err(NotReadyError));
        assert_eq!(result.values(), Err(NotReadyError));
    }

    #[test]
    fn values_hooks_fire_exactly_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let options = CallOptions::new().on_values(move |value| {
            counter.fetch_add(1, Ordering::SeqCst);
            value
        });

        let result = final_result(options.hooks, 200, &json!({"ok": true}));
        let first = result.values().expect("ready");
        let second = result.values().expect("ready");

        assert_eq!(first, second);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn values_hooks_fold_in_reverse_registration_order() {
        let options = CallOptions::new()
            .on_values(|value| json!(format!("{}+outer", value.as_str().unwrap())))
            .on_values(|value| json!(format!("{}+inner", value.as_str().unwrap())));

        let result = final_result(options.hooks, 200, &json!("seed"));

        // Registered last runs first; registered first wraps the rest.
        assert_eq!(result.values().expect("ready"), json!("seed+inner+outer"));
    }

    #[test]
    fn error_hooks_fire_only_on_failure() {
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        let ok = final_result(
            CallOptions::new()
                .on_error(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .hooks,
            200,
            &json!({}),
        );
        assert!(ok.is_ok());
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        let counter = Arc::clone(&fired);
        let failed = final_result(
            CallOptions::new()
                .on_error(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .hooks,
            404,
            &json!({"error": "not_found", "reason": "missing"}),
        );
        assert!(!failed.is_ok());
        assert_eq!(failed.message(), "HTTP 404: not_found: missing");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn chain_hooks_unwind_in_reverse_order_threading_results() {
        let trace = Arc::new(Mutex::new(Vec::new()));

        let t1 = Arc::clone(&trace);
        let t2 = Arc::clone(&trace);
        let t3 = Arc::clone(&trace);
        let options = CallOptions::new()
            .on_chain(move |result| {
                t1.lock().expect("trace").push("h1");
                result
            })
            .on_chain(move |result| {
                t2.lock().expect("trace").push("h2");
                result
            })
            .on_chain(move |result| {
                t3.lock().expect("trace").push("h3");
                result
            });

        let _ = final_result(options.hooks, 200, &json!({}));
        assert_eq!(*trace.lock().expect("trace"), vec!["h3", "h2", "h1"]);
    }

    #[test]
    fn rows_probe_once_and_cache_completeness() {
        let materialized = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&materialized);
        let options = CallOptions::new().on_row(move |result, number, _column| {
            let answer = result.raw_answer().ok()?;
            let item = answer.get("rows")?.get(number - 1)?.clone();
            counter.fetch_add(1, Ordering::SeqCst);
            Some(RowSeed::new(item.clone(), item))
        });

        let result = final_result(
            options.hooks,
            200,
            &json!({"rows": [{"id": "a"}, {"id": "b"}, {"id": "c"}]}),
        );

        let third = result.row(3).expect("ready").expect("row 3 exists");
        assert_eq!(third.value, json!({"id": "c"}));
        assert_eq!(materialized.load(Ordering::SeqCst), 1);

        let all = result.rows().expect("ready");
        assert_eq!(all.len(), 3);
        // Rows 1 and 2 materialize now; row 3 comes from the cache. The
        // probe past the end does not count.
        assert_eq!(materialized.load(Ordering::SeqCst), 3);

        let again = result.rows().expect("ready");
        assert_eq!(again.len(), 3);
        assert_eq!(materialized.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn no_row_hooks_means_no_rows() {
        let result = final_result(HookSet::default(), 200, &json!({"rows": [1, 2]}));
        assert!(result.row(1).expect("ready").is_none());
        assert!(result.rows().expect("ready").is_empty());
    }
}
