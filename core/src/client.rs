//! The process-facing entry point of the pipeline.
//!
//! # Design
//! `Courier` is created empty, given its collaborators through `with_*`
//! hooks, and initialized exactly once. Initialization builds the worker
//! runtime, starts the completion consumer and selects the transport; all of
//! that lives in a `OnceLock` so call methods take `&self` and need no lock
//! on the hot path. A call on a facade that was never initialized is logged
//! and dropped, never delivered.

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tokio::runtime::Runtime;
use tracing::{debug, error, info};

use crate::completion::CompletionQueue;
use crate::config::{is_valid_header, RequestConfig};
use crate::connectivity::{AlwaysOnline, Connectivity};
use crate::coordinator::Coordinator;
use crate::envelope::ResponseListener;
use crate::error::{CourierError, Result};
use crate::http::HttpMethod;
use crate::params::RequestParams;
use crate::request::{ImageCompressor, Passthrough};
use crate::store::{MemoryStore, RecordStore};
use crate::transport::{self, TransportContext};

const NOT_INITIALIZED: &str = "courier not initialized: call init() before issuing requests";

struct Inner {
    config: Arc<RequestConfig>,
    coordinator: Coordinator,
    runtime: Runtime,
}

/// Offline-aware HTTP client.
///
/// ```no_run
/// use courier_core::{listener, Courier, RequestConfig, RequestParams};
///
/// let courier = Courier::with_config(RequestConfig::default()).unwrap();
/// courier.get(
///     "http://localhost:3000/items",
///     RequestParams::new().field("page", 1),
///     listener(|e| println!("{}", e.body), |e| eprintln!("{}", e.message())),
/// );
/// ```
pub struct Courier {
    inner: OnceLock<Inner>,
    store: Option<Arc<dyn RecordStore>>,
    connectivity: Arc<dyn Connectivity>,
    compressor: Arc<dyn ImageCompressor>,
}

impl Default for Courier {
    fn default() -> Self {
        Self::new()
    }
}

impl Courier {
    /// An uninitialized facade.
    pub fn new() -> Self {
        Self {
            inner: OnceLock::new(),
            store: None,
            connectivity: Arc::new(AlwaysOnline),
            compressor: Arc::new(Passthrough),
        }
    }

    /// `new` followed by `init`.
    pub fn with_config(config: RequestConfig) -> Result<Self> {
        let courier = Self::new();
        courier.init(config)?;
        Ok(courier)
    }

    /// Record store used when caching is enabled. Defaults to a `MemoryStore`.
    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn with_image_compressor(mut self, compressor: Arc<dyn ImageCompressor>) -> Self {
        self.compressor = compressor;
        self
    }

    /// Install the configuration. Only the first call succeeds.
    pub fn init(&self, config: RequestConfig) -> Result<()> {
        if self.inner.get().is_some() {
            return Err(CourierError::AlreadyInitialized);
        }
        config.validate()?;
        let inner = self.build(config)?;
        if let Err(lost) = self.inner.set(inner) {
            lost.runtime.shutdown_background();
            return Err(CourierError::AlreadyInitialized);
        }
        info!("courier initialized");
        Ok(())
    }

    fn build(&self, config: RequestConfig) -> Result<Inner> {
        let config = Arc::new(config);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .max_blocking_threads(config.worker_threads)
            .thread_name("courier-worker")
            .enable_all()
            .build()
            .map_err(|e| CourierError::Runtime(e.to_string()))?;

        let store = config.cache_enabled.then(|| {
            self.store
                .clone()
                .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn RecordStore>)
        });
        let completion = CompletionQueue::start(store, config.debug)?;
        let transport = transport::build(TransportContext {
            config: Arc::clone(&config),
            completion: completion.clone(),
            runtime: runtime.handle().clone(),
            compressor: Arc::clone(&self.compressor),
        })?;
        debug!(
            transport = ?config.transport,
            workers = config.worker_threads,
            cache = config.cache_enabled,
            "pipeline built"
        );

        let coordinator = Coordinator {
            cache_enabled: config.cache_enabled,
            default_headers: RwLock::new(config.default_headers.clone()),
            connectivity: Arc::clone(&self.connectivity),
            completion,
            transport,
        };
        Ok(Inner {
            config,
            coordinator,
            runtime,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.get().is_some()
    }

    /// The configuration passed to `init`.
    pub fn config(&self) -> Option<&RequestConfig> {
        self.inner.get().map(|inner| inner.config.as_ref())
    }

    pub fn get(&self, url: &str, params: RequestParams, listener: Arc<dyn ResponseListener>) {
        self.submit(HttpMethod::Get, url, params, listener);
    }

    pub fn post(&self, url: &str, params: RequestParams, listener: Arc<dyn ResponseListener>) {
        self.submit(HttpMethod::Post, url, params, listener);
    }

    pub fn put(&self, url: &str, params: RequestParams, listener: Arc<dyn ResponseListener>) {
        self.submit(HttpMethod::Put, url, params, listener);
    }

    pub fn delete(&self, url: &str, params: RequestParams, listener: Arc<dyn ResponseListener>) {
        self.submit(HttpMethod::Delete, url, params, listener);
    }

    /// Issue a call with an explicit method.
    pub fn submit(
        &self,
        method: HttpMethod,
        url: &str,
        params: RequestParams,
        listener: Arc<dyn ResponseListener>,
    ) {
        match self.inner.get() {
            Some(inner) => inner.coordinator.submit(method, url, params, listener),
            None => error!(%method, url, "{NOT_INITIALIZED}"),
        }
    }

    /// Suppress delivery of in-flight calls whose tag starts with `tag`.
    pub fn cancel(&self, tag: &str) {
        match self.inner.get() {
            Some(inner) => inner.coordinator.cancel(tag),
            None => error!(tag, "{NOT_INITIALIZED}"),
        }
    }

    /// Calls handed to the transport and not yet delivered or cancelled.
    pub fn in_flight(&self) -> usize {
        self.inner
            .get()
            .map_or(0, |inner| inner.coordinator.transport.in_flight())
    }

    /// Add or replace a header sent with every later call.
    pub fn set_default_header(&self, name: &str, value: &str) -> Result<()> {
        let inner = self.inner.get().ok_or(CourierError::NotInitialized)?;
        if !is_valid_header(name, value) {
            return Err(CourierError::Config(format!("invalid header `{name}`")));
        }
        let mut headers = inner.coordinator.default_headers.write();
        headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
        headers.insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn remove_default_header(&self, name: &str) -> Result<()> {
        let inner = self.inner.get().ok_or(CourierError::NotInitialized)?;
        inner
            .coordinator
            .default_headers
            .write()
            .retain(|k, _| !k.eq_ignore_ascii_case(name));
        Ok(())
    }
}

impl Drop for Courier {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    use crate::connectivity::NetworkState;
    use crate::envelope::{listener, Envelope, Origin, Status};
    use crate::store::CacheRecord;

    fn channel_listener() -> (Arc<dyn ResponseListener>, mpsc::Receiver<(bool, i32, Origin)>) {
        let (tx, rx) = mpsc::channel();
        let tx2 = tx.clone();
        let l = listener(
            move |e: &Envelope| tx.send((true, e.code(), e.origin)).unwrap(),
            move |e: &Envelope| tx2.send((false, e.code(), e.origin)).unwrap(),
        );
        (l, rx)
    }

    fn offline() -> Arc<NetworkState> {
        Arc::new(NetworkState::new(false))
    }

    #[test]
    fn uninitialized_calls_are_dropped() {
        let courier = Courier::new();
        let (l, rx) = channel_listener();
        courier.get("http://localhost/items", RequestParams::new(), l.clone());
        courier.post("http://localhost/items", RequestParams::new(), l);
        courier.cancel("x");
        assert!(!courier.is_initialized());
        assert!(courier.config().is_none());
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn second_init_is_rejected() {
        let courier = Courier::new();
        courier.init(RequestConfig::default()).unwrap();
        let err = courier.init(RequestConfig::default()).unwrap_err();
        assert!(matches!(err, CourierError::AlreadyInitialized));
        assert!(courier.is_initialized());
    }

    #[test]
    fn invalid_config_leaves_facade_uninitialized() {
        let courier = Courier::new();
        let mut config = RequestConfig::default();
        config.worker_threads = 0;
        assert!(matches!(courier.init(config), Err(CourierError::Config(_))));
        assert!(!courier.is_initialized());
        courier.init(RequestConfig::default()).unwrap();
    }

    #[test]
    fn offline_without_cache_reports_no_network() {
        let courier = Courier::new().with_connectivity(offline());
        courier.init(RequestConfig::default()).unwrap();
        let (l, rx) = channel_listener();
        courier.delete("http://localhost/items/1", RequestParams::new(), l);
        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got, (false, Status::NO_NETWORK_CODE, Origin::Network));
        assert_eq!(courier.in_flight(), 0);
    }

    #[test]
    fn offline_with_supplied_store_replays() {
        let store = Arc::new(MemoryStore::new());
        let params = RequestParams::new().field("q", "rust");
        store
            .upsert(&CacheRecord {
                url: "http://localhost/search".to_string(),
                params: params.serialized(),
                status: Status::Http(200),
                body: "[]".to_string(),
                exception: None,
            })
            .unwrap();
        let courier = Courier::new()
            .with_store(store)
            .with_connectivity(offline());
        courier
            .init(RequestConfig::builder().cache_enabled(true).build().unwrap())
            .unwrap();
        let (l, rx) = channel_listener();
        courier.get("http://localhost/search", params, l);
        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got, (true, 200, Origin::Cache));
    }

    #[test]
    fn default_headers_require_init_and_valid_values() {
        let courier = Courier::new();
        assert!(matches!(
            courier.set_default_header("X-A", "1"),
            Err(CourierError::NotInitialized)
        ));
        courier.init(RequestConfig::default()).unwrap();
        courier.set_default_header("X-A", "1").unwrap();
        courier.set_default_header("x-a", "2").unwrap();
        assert!(courier.set_default_header("X-B", "bad\r\nvalue").is_err());
        let inner = courier.inner.get().unwrap();
        assert_eq!(
            inner.coordinator.default_headers.read().get("x-a").map(String::as_str),
            Some("2")
        );
        courier.remove_default_header("X-A").unwrap();
        assert!(inner.coordinator.default_headers.read().is_empty());
    }
}
