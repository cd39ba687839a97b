//! Result envelopes and the listener contract.
//!
//! # Design
//! Every call ends in exactly one `Envelope`, whatever happened: an HTTP
//! response, a replayed cache row, a missing network or a transport error.
//! The completion queue consumes it once and routes it to one of the two
//! listener methods by `Status`.

use std::fmt;
use std::sync::Arc;

use serde_json::json;

use crate::http::HttpMethod;
use crate::params::RequestParams;

/// Fixed message carried by no-network envelopes.
pub const NO_NETWORK_MESSAGE: &str = "no network";

/// Outcome code of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// A status line was read from the server.
    Http(u16),
    /// No connectivity and no usable cache row.
    NoNetwork,
    /// I/O error, timeout, TLS failure or a request that could not be built.
    TransportError,
}

impl Status {
    pub const NO_NETWORK_CODE: i32 = -1;
    pub const TRANSPORT_ERROR_CODE: i32 = -2;

    /// Numeric code: the HTTP status, or a negative synthetic code.
    pub fn code(self) -> i32 {
        match self {
            Status::Http(code) => i32::from(code),
            Status::NoNetwork => Self::NO_NETWORK_CODE,
            Status::TransportError => Self::TRANSPORT_ERROR_CODE,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            Self::NO_NETWORK_CODE => Some(Status::NoNetwork),
            Self::TRANSPORT_ERROR_CODE => Some(Status::TransportError),
            c => u16::try_from(c).ok().map(Status::Http),
        }
    }

    /// Only an exact 200 counts as success.
    pub fn is_success(self) -> bool {
        self == Status::Http(200)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Where an envelope's body came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Network,
    Cache,
}

/// Receives the outcome of a call on the completion thread.
pub trait ResponseListener: Send + Sync {
    /// Status was exactly 200.
    fn on_success(&self, envelope: &Envelope);
    /// Anything else, including the synthetic codes.
    fn on_failure(&self, envelope: &Envelope);
}

/// Listener built from two closures.
pub struct FnListener<S, F> {
    success: S,
    failure: F,
}

impl<S, F> ResponseListener for FnListener<S, F>
where
    S: Fn(&Envelope) + Send + Sync,
    F: Fn(&Envelope) + Send + Sync,
{
    fn on_success(&self, envelope: &Envelope) {
        (self.success)(envelope)
    }

    fn on_failure(&self, envelope: &Envelope) {
        (self.failure)(envelope)
    }
}

/// Wrap two closures as a shareable listener.
pub fn listener<S, F>(success: S, failure: F) -> Arc<dyn ResponseListener>
where
    S: Fn(&Envelope) + Send + Sync + 'static,
    F: Fn(&Envelope) + Send + Sync + 'static,
{
    Arc::new(FnListener { success, failure })
}

/// Normalized outcome of one call.
#[derive(Clone)]
pub struct Envelope {
    pub method: HttpMethod,
    pub url: String,
    pub status: Status,
    pub body: String,
    pub origin: Origin,
    pub params: Arc<RequestParams>,
    /// Merged default and per-call headers the call was issued with.
    pub headers: Vec<(String, String)>,
    pub error: Option<String>,
    pub listener: Arc<dyn ResponseListener>,
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("status", &self.status)
            .field("origin", &self.origin)
            .field("tag", &self.params.tag())
            .field("error", &self.error)
            .field("body_len", &self.body.len())
            .finish()
    }
}

impl Envelope {
    pub fn tag(&self) -> &str {
        self.params.tag()
    }

    pub fn code(&self) -> i32 {
        self.status.code()
    }

    pub fn is_from_cache(&self) -> bool {
        self.origin == Origin::Cache
    }

    /// Human readable reason for a failure, empty on success.
    pub fn message(&self) -> String {
        match (&self.error, self.status) {
            (Some(e), _) => e.clone(),
            (None, Status::Http(200)) => String::new(),
            (None, status) => format!("HTTP {status}"),
        }
    }
}

/// Body used for synthetic outcomes so callers always get a parseable
/// payload: `{"code":"<code>","msg":"<message>","data":{}}`.
pub fn synthetic_body(status: Status, message: &str) -> String {
    json!({
        "code": status.code().to_string(),
        "msg": message,
        "data": {},
    })
    .to_string()
}
