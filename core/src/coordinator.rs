//! Decides, per call, whether the network or the cache answers.
//!
//! # Design
//! The coordinator runs on the calling thread and never blocks: it merges
//! headers, asks the connectivity probe, and then either posts a synthetic
//! envelope, queues a cache replay on the completion consumer, or hands the
//! call to the transport. Connectivity is asked again for every call.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::completion::CompletionQueue;
use crate::connectivity::Connectivity;
use crate::envelope::{Origin, ResponseListener};
use crate::http::HttpMethod;
use crate::params::RequestParams;
use crate::request::merge_headers;
use crate::transport::{Call, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    /// Offline without a cache: answer no-network right away.
    NoNetwork,
    /// Offline with a cache: look the call up on the completion consumer.
    Replay,
    Network,
}

pub(crate) fn plan(cache_enabled: bool, connected: bool) -> Route {
    match (connected, cache_enabled) {
        (true, _) => Route::Network,
        (false, false) => Route::NoNetwork,
        (false, true) => Route::Replay,
    }
}

pub(crate) struct Coordinator {
    pub(crate) cache_enabled: bool,
    pub(crate) default_headers: RwLock<IndexMap<String, String>>,
    pub(crate) connectivity: Arc<dyn Connectivity>,
    pub(crate) completion: CompletionQueue,
    pub(crate) transport: Arc<dyn Transport>,
}

impl Coordinator {
    pub(crate) fn submit(
        &self,
        method: HttpMethod,
        url: &str,
        params: RequestParams,
        listener: Arc<dyn ResponseListener>,
    ) {
        let headers = merge_headers(&self.default_headers.read(), params.headers());
        let call = Call {
            method,
            url: url.to_string(),
            params: Arc::new(params),
            headers,
            listener,
        };
        match plan(self.cache_enabled, self.connectivity.is_connected()) {
            Route::NoNetwork => {
                debug!(%method, url, tag = %call.tag(), "offline and cache disabled");
                self.completion.post(call.no_network(Origin::Network));
            }
            Route::Replay => {
                debug!(%method, url, tag = %call.tag(), "offline; answering from cache");
                self.completion.replay(call);
            }
            Route::Network => {
                debug!(%method, url, tag = %call.tag(), "dispatching");
                self.transport.execute(call);
            }
        }
    }

    pub(crate) fn cancel(&self, tag: &str) {
        self.transport.cancel(tag);
    }
}
