//! # settee
//!
//! Client for CouchDB-style document databases.
//!
//! The heavy lifting lives in `settee-core`: connection fail-over,
//! version gating, the uniform result envelope and bookmark-aware
//! pagination. This crate adds the client surface — one thin method per
//! REST endpoint — and the reqwest transport binding.
//!
//! ```rust,ignore
//! use settee::{Client, Connection, Credentials};
//! use settee_core::{CallOptions, PageSpec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .connection(Connection::new("local", "http://127.0.0.1:5984"))
//!         .build()?;
//!
//!     let info = client.info(&CallOptions::new()).await?;
//!     if info.is_ok() {
//!         println!("server: {}", info.values()?);
//!     }
//!
//!     let page = client
//!         .db("recipes")
//!         .all_docs(PageSpec::new().page_size(50), &CallOptions::new())
//!         .await?;
//!     for row in page.rows()? {
//!         println!("{}", row.value);
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod database;
pub mod document;
pub mod transport;

pub use client::{Client, ClientBuilder};
pub use database::Database;
pub use document::{Document, DocumentError};
pub use transport::ReqwestTransport;

pub use settee_core::{
    CallError, CallOptions, CallResult, Connection, ConnectionRegistry, ConnectionSelector,
    Converter, ConverterTable, Credentials, Dispatcher, LogicalRequest, Method, NotReadyError,
    PageFns, PageSpec, PageState, Paginator, PagingSnapshot, Phase, Row, RowSeed, ServerVersion,
    StopRule, Transport, TransportError, UsageError, VersionSpan, WarningLedger, WirePart,
    WireRequest, WireResponse,
};
