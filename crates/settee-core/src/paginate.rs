//! Multi-round pagination: one logical page drawn from as many
//! physical requests as it takes.
//!
//! The paginator re-issues a request template with updated
//! skip/limit/bookmark parameters until the requested page is full or a
//! stop rule triggers. Bookmarks are preferred over numeric skips
//! because they stay stable under concurrent writes; once one is
//! recorded for a cumulative offset, that offset is always reached
//! through it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connection::ConnectionSelector;
use crate::dispatch::Dispatcher;
use crate::error::{CallError, UsageError};
use crate::request::{HookSet, LogicalRequest};
use crate::result::{CallResult, Outcome};

pub type HarvestFn = Arc<dyn Fn(&CallResult) -> Vec<Value> + Send + Sync>;
/// Per-item transform; returning `None` drops the item from the page
/// buffer (the raw harvest count is unaffected).
pub type MapFn = Arc<dyn Fn(Value) -> Option<Value> + Send + Sync>;
pub type StopFn = Arc<dyn Fn(&CallResult, usize) -> bool + Send + Sync>;

/// When to stop asking for further physical rounds, judged on each
/// round's raw item count.
#[derive(Clone, Default)]
pub enum StopRule {
    /// Stop once a round returns zero items.
    #[default]
    Empty,
    /// Stop once a round returns fewer items than the first round did.
    Smaller,
    /// Stop once a round returns at most this many items.
    UpTo(usize),
    Custom(StopFn),
}

impl std::fmt::Debug for StopRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Smaller => f.write_str("Smaller"),
            Self::UpTo(n) => write!(f, "UpTo({n})"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Caller-facing paging configuration for the first page of a sequence.
#[derive(Clone)]
pub struct PageSpec {
    page_size: Option<usize>,
    request_max: usize,
    skip: u64,
    page: Option<u64>,
    start: u64,
    harvest: Option<HarvestFn>,
    map: Option<MapFn>,
    stop: StopRule,
}

impl Default for PageSpec {
    fn default() -> Self {
        Self {
            page_size: None,
            request_max: 100,
            skip: 0,
            page: None,
            start: 0,
            harvest: None,
            map: None,
            stop: StopRule::Empty,
        }
    }
}

impl PageSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target size of the logical page. Unbounded when unset: rounds
    /// continue until the stop rule triggers.
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Upper bound on items requested per physical round.
    pub fn request_max(mut self, max: usize) -> Self {
        self.request_max = max;
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    /// 1-based page number; an alternative spelling of the starting
    /// offset, incompatible with `skip`.
    pub fn page_number(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    pub fn start_at(mut self, offset: u64) -> Self {
        self.start = offset;
        self
    }

    pub fn harvest(
        mut self,
        harvest: impl Fn(&CallResult) -> Vec<Value> + Send + Sync + 'static,
    ) -> Self {
        self.harvest = Some(Arc::new(harvest));
        self
    }

    pub fn map(mut self, map: impl Fn(Value) -> Option<Value> + Send + Sync + 'static) -> Self {
        self.map = Some(Arc::new(map));
        self
    }

    pub fn stop(mut self, stop: StopRule) -> Self {
        self.stop = stop;
        self
    }
}

/// Sentinel standing in for a function value in an exported snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FnMarker {
    Default,
    Custom,
}

/// Serializable snapshot of an in-flight paged sequence, for
/// continuation across processes or sessions. Function values are
/// replaced by markers; a custom one must be resupplied on import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagingSnapshot {
    pub start: u64,
    pub skip: u64,
    pub page_size: Option<usize>,
    pub request_max: usize,
    pub bookmarks: BTreeMap<u64, String>,
    pub end_reached: bool,
    pub connection: Option<String>,
    pub harvest: FnMarker,
    pub map: FnMarker,
    pub stop: SnapshotStop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStop {
    Empty,
    Smaller,
    UpTo(usize),
    Custom,
}

/// Functions a snapshot cannot carry, resupplied at import time.
#[derive(Clone, Default)]
pub struct PageFns {
    pub harvest: Option<HarvestFn>,
    pub map: Option<MapFn>,
    pub stop: Option<StopRule>,
}

/// Live state of a paged sequence, attached to each round's result.
#[derive(Clone)]
pub struct PageState {
    template: LogicalRequest,
    connection: Option<String>,
    start: u64,
    skip: u64,
    page_size: Option<usize>,
    request_max: usize,
    bookmarks: BTreeMap<u64, String>,
    raw_progress: u64,
    buffer: Vec<Value>,
    first_round: Option<usize>,
    end_reached: bool,
    harvest: HarvestFn,
    map: Option<MapFn>,
    stop: StopRule,
    custom_harvest: bool,
}

impl PageState {
    fn from_spec(mut template: LogicalRequest, spec: PageSpec) -> Result<Self, UsageError> {
        if spec.page.is_some() && spec.skip != 0 {
            return Err(UsageError::ConflictingPageOptions);
        }
        // Rounds are strictly sequential: round N+1's parameters depend
        // on round N's outcome, so deferred execution cannot apply.
        template.deferred = false;
        let start = match spec.page {
            Some(page) => {
                let size = spec.page_size.ok_or(UsageError::PageWithoutSize)?;
                spec.start + page.saturating_sub(1) * size as u64
            }
            None => spec.start,
        };
        let custom_harvest = spec.harvest.is_some();
        Ok(Self {
            template,
            connection: None,
            start,
            skip: spec.skip,
            page_size: spec.page_size,
            request_max: spec.request_max,
            bookmarks: BTreeMap::new(),
            raw_progress: 0,
            buffer: Vec::new(),
            first_round: None,
            end_reached: false,
            harvest: spec.harvest.unwrap_or_else(default_harvest),
            map: spec.map,
            stop: spec.stop,
            custom_harvest,
        })
    }

    /// Settings for the page after this one: the consumed page's length
    /// folds into the starting offset and the skip resets to zero.
    fn next_page(&self) -> Self {
        Self {
            template: self.template.clone(),
            connection: self.connection.clone(),
            start: self.start + self.skip + self.raw_progress,
            skip: 0,
            page_size: self.page_size,
            request_max: self.request_max,
            bookmarks: self.bookmarks.clone(),
            raw_progress: 0,
            buffer: Vec::new(),
            first_round: None,
            end_reached: self.end_reached,
            harvest: Arc::clone(&self.harvest),
            map: self.map.clone(),
            stop: self.stop.clone(),
            custom_harvest: self.custom_harvest,
        }
    }

    /// Exportable snapshot, folded like [`next_page`](Self::next_page)
    /// and with the bookmark table trimmed to the next page's offset.
    pub fn snapshot(&self) -> PagingSnapshot {
        let start = self.start + self.skip + self.raw_progress;
        let mut bookmarks = BTreeMap::new();
        if let Some(bookmark) = self.bookmarks.get(&start) {
            bookmarks.insert(start, bookmark.clone());
        }
        PagingSnapshot {
            start,
            skip: 0,
            page_size: self.page_size,
            request_max: self.request_max,
            bookmarks,
            end_reached: self.end_reached,
            connection: self.connection.clone(),
            harvest: if self.custom_harvest {
                FnMarker::Custom
            } else {
                FnMarker::Default
            },
            map: if self.map.is_some() {
                FnMarker::Custom
            } else {
                FnMarker::Default
            },
            stop: match &self.stop {
                StopRule::Empty => SnapshotStop::Empty,
                StopRule::Smaller => SnapshotStop::Smaller,
                StopRule::UpTo(n) => SnapshotStop::UpTo(*n),
                StopRule::Custom(_) => SnapshotStop::Custom,
            },
        }
    }

    fn from_snapshot(
        mut template: LogicalRequest,
        snapshot: PagingSnapshot,
        fns: PageFns,
    ) -> Result<Self, UsageError> {
        template.deferred = false;
        let harvest = match (snapshot.harvest, fns.harvest) {
            (FnMarker::Custom, None) => {
                return Err(UsageError::MissingPageFunction { role: "harvester" })
            }
            (_, Some(harvest)) => harvest,
            (FnMarker::Default, None) => default_harvest(),
        };
        let map = match (snapshot.map, fns.map) {
            (FnMarker::Custom, None) => {
                return Err(UsageError::MissingPageFunction { role: "map" })
            }
            (_, supplied) => supplied,
        };
        let stop = match (&snapshot.stop, fns.stop) {
            (SnapshotStop::Custom, None) => {
                return Err(UsageError::MissingPageFunction { role: "stop rule" })
            }
            (_, Some(stop)) => stop,
            (SnapshotStop::Empty, None) => StopRule::Empty,
            (SnapshotStop::Smaller, None) => StopRule::Smaller,
            (SnapshotStop::UpTo(n), None) => StopRule::UpTo(*n),
        };
        let custom_harvest = snapshot.harvest == FnMarker::Custom;
        Ok(Self {
            template,
            connection: snapshot.connection,
            start: snapshot.start,
            skip: snapshot.skip,
            page_size: snapshot.page_size,
            request_max: snapshot.request_max,
            bookmarks: snapshot.bookmarks,
            raw_progress: 0,
            buffer: Vec::new(),
            first_round: None,
            end_reached: snapshot.end_reached,
            harvest,
            map,
            stop,
            custom_harvest,
        })
    }

    /// Items accumulated into the current logical page (after `map`).
    pub fn items(&self) -> &[Value] {
        &self.buffer
    }

    /// Raw items harvested this page, before any `map` filtering.
    pub fn harvested(&self) -> u64 {
        self.raw_progress
    }

    pub fn bookmarks(&self) -> &BTreeMap<u64, String> {
        &self.bookmarks
    }

    pub fn connection(&self) -> Option<&str> {
        self.connection.as_deref()
    }

    pub fn is_last_page(&self) -> bool {
        self.end_reached
    }

    /// True while further rounds would be attempted: the end was not
    /// reached and either the page size is unbounded or the page is not
    /// yet full.
    pub fn is_partial(&self) -> bool {
        !self.end_reached
            && self
                .page_size
                .map_or(true, |size| self.raw_progress < size as u64)
    }

    fn page_full(&self) -> bool {
        self.page_size
            .is_some_and(|size| self.raw_progress >= size as u64)
    }

    fn round_limit(&self) -> usize {
        match self.page_size {
            Some(size) => {
                let remaining = size.saturating_sub(self.raw_progress as usize);
                remaining.min(self.request_max)
            }
            None => self.request_max,
        }
    }

    fn should_stop(&self, result: &CallResult, count: usize) -> bool {
        match &self.stop {
            StopRule::Empty => count == 0,
            StopRule::Smaller => self.first_round.is_some_and(|first| count < first),
            StopRule::UpTo(n) => count <= *n,
            StopRule::Custom(stop) => stop(result, count),
        }
    }
}

impl std::fmt::Debug for PageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageState")
            .field("start", &self.start)
            .field("skip", &self.skip)
            .field("page_size", &self.page_size)
            .field("harvested", &self.raw_progress)
            .field("buffered", &self.buffer.len())
            .field("bookmarks", &self.bookmarks.len())
            .field("end_reached", &self.end_reached)
            .finish_non_exhaustive()
    }
}

/// Drives repeated dispatches to deliver stable logical pages.
pub struct Paginator<'a> {
    dispatcher: &'a Dispatcher,
}

impl<'a> Paginator<'a> {
    pub fn new(dispatcher: &'a Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Fetch the first logical page of a fresh sequence.
    pub async fn first_page(
        &self,
        template: LogicalRequest,
        spec: PageSpec,
    ) -> Result<CallResult, CallError> {
        let state = PageState::from_spec(template, spec)?;
        self.run(state).await
    }

    /// Continue a sequence from a live prior result (`succeed`): the
    /// next round reuses its connection, since bookmarks are specific
    /// to the backend that issued them.
    pub async fn next_page(&self, prior: &CallResult) -> Result<CallResult, CallError> {
        let state = prior.page_state().ok_or(UsageError::NotPaged)?;
        if state.end_reached {
            return Ok(exhausted_result(state));
        }
        self.run(state.next_page()).await
    }

    /// Continue a sequence from an exported snapshot. Custom functions
    /// the snapshot could not carry must be resupplied via `fns`.
    pub async fn resume(
        &self,
        template: LogicalRequest,
        snapshot: PagingSnapshot,
        fns: PageFns,
    ) -> Result<CallResult, CallError> {
        let state = PageState::from_snapshot(template, snapshot, fns)?;
        if state.end_reached {
            return Ok(exhausted_result(&state));
        }
        self.run(state).await
    }

    async fn run(&self, mut state: PageState) -> Result<CallResult, CallError> {
        let mut last: Option<CallResult> = None;

        while !state.page_full() {
            let offset = state.start + state.skip + state.raw_progress;
            let mut request = state.template.clone();
            if let Some(connection) = &state.connection {
                request.selector = ConnectionSelector::Named(connection.clone());
            }
            apply_round_params(
                &mut request,
                offset,
                state.bookmarks.get(&offset).cloned(),
                state.round_limit(),
            );

            let result = self.dispatcher.dispatch(request).await?;
            if !result.is_ok() {
                // Surface the failed round with the state attached so the
                // caller can inspect and retry the whole page.
                let mut failed = result;
                failed.set_page(state);
                return Ok(failed);
            }
            if state.connection.is_none() {
                state.connection = result.connection().map(ToOwned::to_owned);
            }

            let round: Vec<Value> = (state.harvest)(&result);
            let count = round.len();
            if state.first_round.is_none() {
                state.first_round = Some(count);
            }

            if let Ok(answer) = result.raw_answer() {
                if let Some(bookmark) = answer.get("bookmark").and_then(Value::as_str) {
                    state
                        .bookmarks
                        .insert(offset + count as u64, bookmark.to_owned());
                }
            }

            state.raw_progress += count as u64;
            match &state.map {
                Some(map) => {
                    for item in round {
                        if let Some(mapped) = map(item) {
                            state.buffer.push(mapped);
                        }
                    }
                }
                None => state.buffer.extend(round),
            }

            if count == 0 {
                state.end_reached = true;
            }

            let stop = state.should_stop(&result, count);
            last = Some(result);
            if stop {
                break;
            }
        }

        let mut result = match last {
            Some(result) => result,
            // A zero-size page asks for nothing; answer without I/O.
            None => exhausted_result(&state),
        };
        result.set_page(state);
        Ok(result)
    }
}

/// Cheap no-op result for calls past the end of a sequence.
fn exhausted_result(state: &PageState) -> CallResult {
    let mut result = CallResult::new(HookSet::default()).finalize(Outcome {
        connection: state.connection.clone(),
        status: 200,
        message: String::from("page sequence exhausted"),
        response: None,
    });
    let mut emptied = state.clone();
    emptied.raw_progress = 0;
    emptied.buffer = Vec::new();
    result.set_page(emptied);
    result
}

/// Built-in harvester: the multi-item arrays the document API answers
/// with ("rows" for views, "docs" for finds, "results" for changes).
fn default_harvest() -> HarvestFn {
    Arc::new(|result| {
        result
            .raw_answer()
            .ok()
            .and_then(|answer| {
                ["rows", "docs", "results"]
                    .iter()
                    .find_map(|key| answer.get(*key).and_then(Value::as_array).cloned())
            })
            .unwrap_or_default()
    })
}

/// Lay the round's paging parameters onto the request: body fields for
/// mutating methods (the find API), query parameters otherwise. A
/// bookmark positions absolutely, so it always travels with a zero
/// skip; the numeric skip must never be double-applied.
fn apply_round_params(
    request: &mut LogicalRequest,
    offset: u64,
    bookmark: Option<String>,
    limit: usize,
) {
    let in_body = request.method().requires_body();
    let set = |request: &mut LogicalRequest, name: &str, value: Value| {
        if in_body {
            request.set_body_field(name, value);
        } else {
            request.set_query(name, crate::convert::plain_query_form(&value));
        }
    };

    set(request, "limit", Value::from(limit));
    match bookmark {
        Some(bookmark) => {
            set(request, "skip", Value::from(0));
            set(request, "bookmark", Value::String(bookmark));
        }
        None => {
            set(request, "skip", Value::from(offset));
            if in_body {
                request.remove_body_field("bookmark");
            } else {
                request.remove_query("bookmark");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicting_skip_and_page_are_rejected() {
        let spec = PageSpec::new().page_size(10).skip(5).page_number(2);
        let err = PageState::from_spec(LogicalRequest::get("/db/_all_docs"), spec)
            .expect_err("conflict");
        assert!(matches!(err, UsageError::ConflictingPageOptions));
    }

    #[test]
    fn page_number_translates_to_a_starting_offset() {
        let spec = PageSpec::new().page_size(25).page_number(3);
        let state =
            PageState::from_spec(LogicalRequest::get("/db/_all_docs"), spec).expect("valid");
        assert_eq!(state.start, 50);
    }

    #[test]
    fn page_number_requires_a_page_size() {
        let spec = PageSpec::new().page_number(2);
        let err = PageState::from_spec(LogicalRequest::get("/db/_all_docs"), spec)
            .expect_err("needs size");
        assert!(matches!(err, UsageError::PageWithoutSize));
    }

    #[test]
    fn round_params_go_to_the_body_for_mutating_methods() {
        let mut request =
            LogicalRequest::post("/db/_find").with_body(serde_json::json!({"selector": {}}));
        apply_round_params(&mut request, 30, Some(String::from("b3")), 10);

        assert_eq!(
            request.body(),
            Some(&serde_json::json!({
                "selector": {},
                "limit": 10,
                "skip": 0,
                "bookmark": "b3",
            }))
        );
    }

    #[test]
    fn round_params_without_bookmark_use_the_numeric_skip() {
        let mut request = LogicalRequest::get("/db/_all_docs");
        apply_round_params(&mut request, 30, None, 10);

        assert!(request
            .query
            .contains(&(String::from("skip"), String::from("30"))));
        assert!(request
            .query
            .contains(&(String::from("limit"), String::from("10"))));
        assert!(!request.query.iter().any(|(name, _)| name == "bookmark"));
    }

    #[test]
    fn snapshot_refuses_silent_loss_of_custom_functions() {
        let spec = PageSpec::new().page_size(10).harvest(|_| Vec::new());
        let state =
            PageState::from_spec(LogicalRequest::get("/db/_all_docs"), spec).expect("valid");
        let snapshot = state.snapshot();
        assert_eq!(snapshot.harvest, FnMarker::Custom);

        let err = PageState::from_snapshot(
            LogicalRequest::get("/db/_all_docs"),
            snapshot.clone(),
            PageFns::default(),
        )
        .expect_err("must resupply harvester");
        assert!(matches!(
            err,
            UsageError::MissingPageFunction { role: "harvester" }
        ));

        let restored = PageState::from_snapshot(
            LogicalRequest::get("/db/_all_docs"),
            snapshot,
            PageFns {
                harvest: Some(Arc::new(|_| Vec::new())),
                ..PageFns::default()
            },
        );
        assert!(restored.is_ok());
    }

    #[test]
    fn snapshot_folds_progress_and_trims_bookmarks() {
        let spec = PageSpec::new().page_size(10);
        let mut state =
            PageState::from_spec(LogicalRequest::get("/db/_all_docs"), spec).expect("valid");
        state.raw_progress = 10;
        state.bookmarks.insert(10, String::from("keep"));
        state.bookmarks.insert(5, String::from("drop"));

        let snapshot = state.snapshot();
        assert_eq!(snapshot.start, 10);
        assert_eq!(snapshot.skip, 0);
        assert_eq!(
            snapshot.bookmarks,
            BTreeMap::from([(10, String::from("keep"))])
        );

        let as_json = serde_json::to_string(&snapshot).expect("serializes");
        let back: PagingSnapshot = serde_json::from_str(&as_json).expect("round trips");
        assert_eq!(back, snapshot);
    }
}
