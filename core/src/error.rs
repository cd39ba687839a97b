//! Error types for the synchronous surface of the request pipeline.
//!
//! # Design
//! Nothing in this enum crosses the asynchronous boundary as an `Err`. Calls
//! that fail after dispatch (no network, socket errors, non-200 statuses) are
//! normalized into an `Envelope` and delivered through the listener. A
//! `CourierError` raised while preparing a call is turned into its display
//! string and carried by a transport-error envelope instead.

use thiserror::Error;

/// Errors returned by configuration, initialization, record stores and
/// request preparation.
#[derive(Debug, Error)]
pub enum CourierError {
    /// `init` was called on a facade that already has a configuration.
    #[error("courier already initialized")]
    AlreadyInitialized,

    /// An operation that needs the pipeline ran before `init`.
    #[error("courier not initialized")]
    NotInitialized,

    /// The configuration could not be parsed or holds an invalid value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// TLS trust material could not be loaded or the client rejected it.
    #[error("tls setup failed: {0}")]
    Tls(String),

    /// The worker pool or the completion thread could not be started.
    #[error("runtime setup failed: {0}")]
    Runtime(String),

    /// The record store failed to read or write a cache row.
    #[error("record store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A non-image attachment exceeds the configured upload limit.
    #[error("attachment `{name}` is {size} bytes, limit is {limit} bytes")]
    AttachmentTooLarge { name: String, size: usize, limit: usize },

    /// An https request targets a host outside the trusted-host allow-list.
    #[error("host `{0}` is not in the trusted host list")]
    UntrustedHost(String),

    #[error("invalid url `{0}`")]
    InvalidUrl(String),
}

impl From<serde_json::Error> for CourierError {
    fn from(e: serde_json::Error) -> Self {
        CourierError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for CourierError {
    fn from(e: toml::de::Error) -> Self {
        CourierError::Config(e.to_string())
    }
}

pub type Result<T, E = CourierError> = std::result::Result<T, E>;
