//! Offline-aware HTTP request pipeline.
//!
//! # Overview
//! Callers hand a URL, `RequestParams` and a `ResponseListener` to a
//! [`Courier`]. The call is answered by the network when there is
//! connectivity, by the record store when there is not and caching is on,
//! or by a synthetic no-network envelope otherwise. Whatever happens, the
//! listener sees exactly one `Envelope`, unless the call was cancelled by
//! tag first.
//!
//! # Design
//! - `coordinator` picks network vs. cache per call, re-checking
//!   connectivity every time.
//! - `transport` runs network calls on the facade's worker runtime through
//!   one of two interchangeable implementations.
//! - `completion` is the single ordered consumer: it persists, traces and
//!   delivers, and is the only place the record store is touched.
//! - Types use owned `String` / `Vec` fields so the FFI crate can map them
//!   without borrowing across the boundary.

pub mod client;
pub mod completion;
pub mod config;
pub mod connectivity;
mod coordinator;
pub mod envelope;
pub mod error;
pub mod http;
pub mod multipart;
pub mod params;
pub mod request;
pub mod store;
pub mod transport;

pub use client::Courier;
pub use config::{ContentKind, RequestConfig, TlsSettings, TransportKind};
pub use connectivity::{AlwaysOnline, Connectivity, NetworkState};
pub use envelope::{listener, Envelope, Origin, ResponseListener, Status};
pub use error::{CourierError, Result};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use params::{Attachment, RequestParams};
pub use request::{ImageCompressor, Passthrough};
pub use store::{CacheRecord, FileStore, MemoryStore, RecordStore};
pub use transport::{DirectTransport, PooledTransport, Transport};
