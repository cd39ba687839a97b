//! Keep-alive transport on a shared reqwest client.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::redirect::Policy;
use tokio::task::AbortHandle;
use tracing::debug;

use super::{Call, Transport, TransportContext};
use crate::config::TlsSettings;
use crate::error::{CourierError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

const MAX_REDIRECTS: usize = 10;

struct InFlight {
    tag: String,
    abort: AbortHandle,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    calls: HashMap<u64, InFlight>,
}

/// Transport that reuses connections through reqwest's pool.
///
/// Each call is a task on the facade runtime. `cancel` walks the in-flight
/// registry, aborts matching tasks and unregisters them, so a cancelled task
/// that still reaches its end finds itself missing and drops the envelope.
pub struct PooledTransport {
    ctx: TransportContext,
    client: reqwest::Client,
    registry: Arc<Mutex<Registry>>,
}

impl PooledTransport {
    pub fn new(ctx: TransportContext) -> Result<Self> {
        let config = &ctx.config;
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .timeout(config.read_timeout() + config.write_timeout())
            .pool_max_idle_per_host(config.pool_max_idle)
            .pool_idle_timeout(config.keep_alive())
            .danger_accept_invalid_certs(config.tls.accept_invalid_certs)
            .redirect(redirect_policy(config.tls.clone()));
        for pem in config.tls.load_certificates()? {
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| CourierError::Tls(e.to_string()))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder
            .build()
            .map_err(|e| CourierError::Tls(e.to_string()))?;
        Ok(Self {
            ctx,
            client,
            registry: Arc::new(Mutex::new(Registry::default())),
        })
    }
}

/// Follow redirects like the default policy, but never onto an https host
/// outside the allow-list.
fn redirect_policy(tls: TlsSettings) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        let untrusted = {
            let url = attempt.url();
            let host = url.host_str().unwrap_or_default();
            (url.scheme() == "https" && !tls.is_trusted(host)).then(|| host.to_string())
        };
        match untrusted {
            Some(host) => attempt.error(CourierError::UntrustedHost(host)),
            None => attempt.follow(),
        }
    })
}

async fn send(client: &reqwest::Client, request: HttpRequest) -> reqwest::Result<HttpResponse> {
    let method = match request.method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Delete => reqwest::Method::DELETE,
    };
    let mut builder = client.request(method, &request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }
    if let Some(body) = request.body {
        builder = builder.body(body);
    }
    let response = builder.send().await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    Ok(HttpResponse { status, body })
}

impl Transport for PooledTransport {
    fn execute(&self, call: Call) {
        let tag = call.tag().to_string();
        let ctx = self.ctx.clone();
        let client = self.client.clone();
        let registry = Arc::clone(&self.registry);

        // Held across spawn so the task cannot unregister before it is
        // registered.
        let mut guard = self.registry.lock();
        let id = guard.next_id;
        guard.next_id += 1;
        let handle = self.ctx.runtime.spawn(async move {
            let envelope = match ctx.prepare(&call) {
                Ok(request) => match send(&client, request).await {
                    Ok(response) => call.response(response),
                    Err(e) => call.transport_error(e),
                },
                Err(e) => call.transport_error(e),
            };
            let still_registered = registry.lock().calls.remove(&id).is_some();
            if still_registered {
                ctx.completion.post(envelope);
            } else {
                debug!(tag = %call.tag(), url = %call.url, "call cancelled before delivery");
            }
        });
        guard.calls.insert(
            id,
            InFlight {
                tag,
                abort: handle.abort_handle(),
            },
        );
    }

    fn cancel(&self, tag: &str) {
        let cancelled: Vec<InFlight> = {
            let mut registry = self.registry.lock();
            let ids: Vec<u64> = registry
                .calls
                .iter()
                .filter(|(_, call)| call.tag.starts_with(tag))
                .map(|(id, _)| *id)
                .collect();
            ids.iter()
                .filter_map(|id| registry.calls.remove(id))
                .collect()
        };
        for call in &cancelled {
            call.abort.abort();
        }
        debug!(tag, count = cancelled.len(), "cancelled pooled calls");
    }

    fn in_flight(&self) -> usize {
        self.registry.lock().calls.len()
    }
}
