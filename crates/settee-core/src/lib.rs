//! Core engine for settee.
//!
//! This crate contains:
//! - Named backend connections and their registry
//! - The transport contract the dispatcher routes through
//! - Request dispatch with fail-over and version gating
//! - The uniform result envelope with hooks, values and rows
//! - Bookmark-aware pagination
//! - Named wire/native type converters

pub mod connection;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod paginate;
pub mod request;
pub mod result;
pub mod row;
pub mod transport;
pub mod version;

pub use connection::{Connection, ConnectionRegistry, ConnectionSelector, Credentials};
pub use convert::{Converter, ConverterTable};
pub use dispatch::Dispatcher;
pub use error::{CallError, ConvertError, NotReadyError, TransportError, UsageError};
pub use paginate::{
    FnMarker, PageFns, PageSpec, PageState, Paginator, PagingSnapshot, StopRule,
};
pub use request::{CallOptions, HookSet, LogicalRequest};
pub use result::{CallResult, Outcome, Phase, STATUS_PROCESSING, STATUS_TRANSPORT_FAILURE};
pub use row::{Row, RowSeed};
pub use transport::{Method, Transport, WirePart, WireRequest, WireResponse};
pub use version::{ServerVersion, VersionSpan, WarningLedger};
