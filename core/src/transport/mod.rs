//! Network transports.
//!
//! # Design
//! A `Transport` takes a fully described `Call`, runs it on the worker pool
//! and posts exactly one `Envelope` to the completion queue, unless the call
//! was cancelled first. Two implementations share this contract:
//!
//! - [`PooledTransport`]: one reqwest client with a keep-alive pool; calls
//!   are async tasks that `cancel` aborts.
//! - [`DirectTransport`]: a ureq agent per call with no connection reuse;
//!   calls are blocking tasks that run to completion; a cancelled one finds
//!   its id gone from the registry and drops the envelope.
//!
//! In both, a worker unregisters its call under the registry lock and only
//! then posts the envelope. That unregistration is the point of no return: a
//! `cancel` that runs before it suppresses the call entirely (no delivery, no
//! cache write); one that runs after it has no effect.

mod direct;
mod pooled;

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;

pub use direct::DirectTransport;
pub use pooled::PooledTransport;

use crate::completion::CompletionQueue;
use crate::config::{RequestConfig, TransportKind};
use crate::envelope::{
    synthetic_body, Envelope, Origin, ResponseListener, Status, NO_NETWORK_MESSAGE,
};
use crate::error::Result;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::params::RequestParams;
use crate::request::{self, ImageCompressor};

/// One call as the pipeline sees it after header merging.
#[derive(Clone)]
pub struct Call {
    pub method: HttpMethod,
    pub url: String,
    pub params: Arc<RequestParams>,
    /// Default headers overlaid with the call's own.
    pub headers: Vec<(String, String)>,
    pub listener: Arc<dyn ResponseListener>,
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("tag", &self.params.tag())
            .finish()
    }
}

impl Call {
    pub fn tag(&self) -> &str {
        self.params.tag()
    }

    pub fn envelope(
        &self,
        status: Status,
        body: String,
        origin: Origin,
        error: Option<String>,
    ) -> Envelope {
        Envelope {
            method: self.method,
            url: self.url.clone(),
            status,
            body,
            origin,
            params: Arc::clone(&self.params),
            headers: self.headers.clone(),
            error,
            listener: Arc::clone(&self.listener),
        }
    }

    pub fn no_network(&self, origin: Origin) -> Envelope {
        self.envelope(
            Status::NoNetwork,
            synthetic_body(Status::NoNetwork, NO_NETWORK_MESSAGE),
            origin,
            Some(NO_NETWORK_MESSAGE.to_string()),
        )
    }

    pub fn transport_error(&self, message: impl fmt::Display) -> Envelope {
        let message = message.to_string();
        self.envelope(
            Status::TransportError,
            synthetic_body(Status::TransportError, &message),
            Origin::Network,
            Some(message),
        )
    }

    pub fn response(&self, response: HttpResponse) -> Envelope {
        self.envelope(Status::Http(response.status), response.body, Origin::Network, None)
    }
}

/// Executes calls and supports cancellation by tag.
pub trait Transport: Send + Sync {
    /// Start the call on the worker pool and return immediately.
    fn execute(&self, call: Call);

    /// Suppress delivery for every in-flight call whose tag starts with
    /// `tag`. Best effort: calls past the point of no return still deliver.
    fn cancel(&self, tag: &str);

    /// Calls started and not yet delivered or cancelled.
    fn in_flight(&self) -> usize;

    fn get(&self, url: &str, params: Arc<RequestParams>, listener: Arc<dyn ResponseListener>) {
        self.execute(plain_call(HttpMethod::Get, url, params, listener));
    }

    fn post(&self, url: &str, params: Arc<RequestParams>, listener: Arc<dyn ResponseListener>) {
        self.execute(plain_call(HttpMethod::Post, url, params, listener));
    }

    fn put(&self, url: &str, params: Arc<RequestParams>, listener: Arc<dyn ResponseListener>) {
        self.execute(plain_call(HttpMethod::Put, url, params, listener));
    }

    fn delete(&self, url: &str, params: Arc<RequestParams>, listener: Arc<dyn ResponseListener>) {
        self.execute(plain_call(HttpMethod::Delete, url, params, listener));
    }
}

fn plain_call(
    method: HttpMethod,
    url: &str,
    params: Arc<RequestParams>,
    listener: Arc<dyn ResponseListener>,
) -> Call {
    let headers = params
        .headers()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Call {
        method,
        url: url.to_string(),
        params,
        headers,
        listener,
    }
}

/// What every transport needs from the facade.
#[derive(Clone)]
pub struct TransportContext {
    pub config: Arc<RequestConfig>,
    pub completion: CompletionQueue,
    pub runtime: Handle,
    pub compressor: Arc<dyn ImageCompressor>,
}

impl TransportContext {
    fn prepare(&self, call: &Call) -> Result<HttpRequest> {
        request::prepare(
            call.method,
            &call.url,
            &call.params,
            &call.headers,
            &self.config,
            self.compressor.as_ref(),
        )
    }
}

/// Build the transport the configuration selects.
pub fn build(ctx: TransportContext) -> Result<Arc<dyn Transport>> {
    Ok(match ctx.config.transport {
        TransportKind::Pooled => Arc::new(PooledTransport::new(ctx)?),
        TransportKind::Direct => Arc::new(DirectTransport::new(ctx)?),
    })
}
