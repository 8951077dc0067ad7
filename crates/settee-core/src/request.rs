//! Logical requests, per-call options, and event hooks.
//!
//! An endpoint method builds a [`LogicalRequest`]: method, path, query,
//! body, version span, and connection policy. Generic per-call options
//! ([`CallOptions`]) merge in with a fixed policy: headers and hooks are
//! additive, everything else applies only where the request has not set
//! it already.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::connection::ConnectionSelector;
use crate::result::CallResult;
use crate::row::RowSeed;
use crate::transport::Method;
use crate::version::{ServerVersion, VersionSpan};

pub type ErrorHook = Arc<dyn Fn(&CallResult) + Send + Sync>;
pub type FinalHook = Arc<dyn Fn(&CallResult) + Send + Sync>;
/// Chain hooks thread one result into the next; each may return a
/// different, newer result representing a follow-up call.
pub type ChainHook = Arc<dyn Fn(CallResult) -> CallResult + Send + Sync>;
pub type ValuesHook = Arc<dyn Fn(Value) -> Value + Send + Sync>;
/// Row hooks receive (result, row number, column) and extract the nth
/// fragment, or report `None` once there is no such row.
pub type RowHook = Arc<dyn Fn(&CallResult, usize, usize) -> Option<RowSeed> + Send + Sync>;

/// Ordered hook lists carried by a request into its result.
///
/// `on_error`/`on_final` fire in registration order; `on_chain` and
/// `on_values` fold in reverse registration order, so the
/// outermost-registered hook wraps the inner ones like a call-stack
/// unwind.
#[derive(Clone, Default)]
pub struct HookSet {
    pub(crate) on_error: Vec<ErrorHook>,
    pub(crate) on_final: Vec<FinalHook>,
    pub(crate) on_chain: Vec<ChainHook>,
    pub(crate) on_values: Vec<ValuesHook>,
    pub(crate) on_row: Vec<RowHook>,
}

impl HookSet {
    pub fn is_empty(&self) -> bool {
        self.on_error.is_empty()
            && self.on_final.is_empty()
            && self.on_chain.is_empty()
            && self.on_values.is_empty()
            && self.on_row.is_empty()
    }

    /// Append `other`'s hooks after this set's own (additive merge).
    pub fn merge(&mut self, other: &HookSet) {
        self.on_error.extend(other.on_error.iter().cloned());
        self.on_final.extend(other.on_final.iter().cloned());
        self.on_chain.extend(other.on_chain.iter().cloned());
        self.on_values.extend(other.on_values.iter().cloned());
        self.on_row.extend(other.on_row.iter().cloned());
    }
}

impl std::fmt::Debug for HookSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookSet")
            .field("on_error", &self.on_error.len())
            .field("on_final", &self.on_final.len())
            .field("on_chain", &self.on_chain.len())
            .field("on_values", &self.on_values.len())
            .field("on_row", &self.on_row.len())
            .finish()
    }
}

/// Generic options every endpoint method accepts and forwards.
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    pub selector: Option<ConnectionSelector>,
    pub deferred: bool,
    pub headers: BTreeMap<String, String>,
    pub hooks: HookSet,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connection(mut self, name: impl Into<String>) -> Self {
        self.selector = Some(ConnectionSelector::Named(name.into()));
        self
    }

    pub fn on_role(mut self, role: impl Into<String>) -> Self {
        self.selector = Some(ConnectionSelector::Role(role.into()));
        self
    }

    pub fn on_set(mut self, names: Vec<String>) -> Self {
        self.selector = Some(ConnectionSelector::Set(names));
        self
    }

    /// Defer execution: dispatch selects and gates eagerly but the
    /// transport call runs later, via the dispatcher's `complete`.
    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn on_error(mut self, hook: impl Fn(&CallResult) + Send + Sync + 'static) -> Self {
        self.hooks.on_error.push(Arc::new(hook));
        self
    }

    pub fn on_final(mut self, hook: impl Fn(&CallResult) + Send + Sync + 'static) -> Self {
        self.hooks.on_final.push(Arc::new(hook));
        self
    }

    pub fn on_chain(
        mut self,
        hook: impl Fn(CallResult) -> CallResult + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_chain.push(Arc::new(hook));
        self
    }

    pub fn on_values(mut self, hook: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.hooks.on_values.push(Arc::new(hook));
        self
    }

    pub fn on_row(
        mut self,
        hook: impl Fn(&CallResult, usize, usize) -> Option<RowSeed> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_row.push(Arc::new(hook));
        self
    }
}

/// One logical operation, consumed exactly once by the dispatcher.
#[derive(Clone, Debug)]
pub struct LogicalRequest {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) body: Option<Value>,
    pub(crate) headers: BTreeMap<String, String>,
    pub(crate) span: VersionSpan,
    pub(crate) selector: ConnectionSelector,
    pub(crate) deferred: bool,
    pub(crate) hooks: HookSet,
}

impl LogicalRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: BTreeMap::new(),
            span: VersionSpan::default(),
            selector: ConnectionSelector::All,
            deferred: false,
            hooks: HookSet::default(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn head(path: impl Into<String>) -> Self {
        Self::new(Method::Head, path)
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Query parameter carrying a JSON value (keys, ranges); bare
    /// strings keep their JSON quoting, as the server expects.
    pub fn with_query_json(self, name: impl Into<String>, value: &Value) -> Self {
        self.with_query(name, value.to_string())
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_span(mut self, span: VersionSpan) -> Self {
        self.span = span;
        self
    }

    pub fn introduced(mut self, version: ServerVersion) -> Self {
        self.span.introduced = Some(version);
        self
    }

    pub fn removed(mut self, version: ServerVersion) -> Self {
        self.span.removed = Some(version);
        self
    }

    pub fn deprecated(mut self, version: ServerVersion) -> Self {
        self.span.deprecated = Some(version);
        self
    }

    pub fn on_connection(mut self, name: impl Into<String>) -> Self {
        self.selector = ConnectionSelector::Named(name.into());
        self
    }

    pub fn with_selector(mut self, selector: ConnectionSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_hooks(mut self, hooks: HookSet) -> Self {
        self.hooks.merge(&hooks);
        self
    }

    /// Merge per-call options: headers and hooks add, the selector and
    /// deferred flag apply only where the request left them unset.
    pub fn with_options(mut self, options: &CallOptions) -> Self {
        if let Some(selector) = &options.selector {
            if self.selector == ConnectionSelector::All {
                self.selector = selector.clone();
            }
        }
        if options.deferred {
            self.deferred = true;
        }
        for (name, value) in &options.headers {
            self.headers
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        self.hooks.merge(&options.hooks);
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Replace a query parameter, dropping earlier pairs of the same name.
    pub(crate) fn set_query(&mut self, name: &str, value: String) {
        self.query.retain(|(existing, _)| existing != name);
        self.query.push((name.to_owned(), value));
    }

    pub(crate) fn remove_query(&mut self, name: &str) {
        self.query.retain(|(existing, _)| existing != name);
    }

    /// Set a field on the JSON body, creating an object body if absent.
    pub(crate) fn set_body_field(&mut self, name: &str, value: Value) {
        let body = self.body.get_or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(fields) = body {
            fields.insert(name.to_owned(), value);
        }
    }

    pub(crate) fn remove_body_field(&mut self, name: &str) {
        if let Some(Value::Object(fields)) = self.body.as_mut() {
            fields.remove(name);
        }
    }
}
