//! Per-call connection transport on ureq.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use ureq::tls::{Certificate, RootCerts, TlsConfig};

use super::{Call, Transport, TransportContext};
use crate::error::{CourierError, Result};
use crate::http::{HttpRequest, HttpResponse};

/// Calls handed to a worker and not yet delivered, by call id.
#[derive(Debug, Default)]
struct Registry {
    next_id: u64,
    calls: HashMap<u64, String>,
}

/// Transport that opens a fresh connection for every call.
///
/// Calls run as blocking tasks on the facade runtime and cannot be
/// interrupted mid-socket. `cancel` unregisters the matching calls instead;
/// a worker that finds its call gone drops the envelope. Calls issued after
/// a `cancel` are registered afresh and deliver normally.
pub struct DirectTransport {
    ctx: TransportContext,
    tls: TlsConfig,
    registry: Arc<Mutex<Registry>>,
}

impl DirectTransport {
    pub fn new(ctx: TransportContext) -> Result<Self> {
        let settings = &ctx.config.tls;
        let mut tls = TlsConfig::builder().disable_verification(settings.accept_invalid_certs);
        let pems = settings.load_certificates()?;
        if !pems.is_empty() {
            let certs = pems
                .iter()
                .map(|pem| Certificate::from_pem(pem).map_err(|e| CourierError::Tls(e.to_string())))
                .collect::<Result<Vec<_>>>()?;
            tls = tls.root_certs(RootCerts::new_with_certs(&certs));
        }
        Ok(Self {
            tls: tls.build(),
            ctx,
            registry: Arc::new(Mutex::new(Registry::default())),
        })
    }

    /// A new agent that keeps no idle connections.
    fn agent(&self) -> ureq::Agent {
        let config = &self.ctx.config;
        ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_connect(Some(config.connect_timeout()))
            .timeout_send_request(Some(config.write_timeout()))
            .timeout_send_body(Some(config.write_timeout()))
            .timeout_recv_response(Some(config.read_timeout()))
            .timeout_recv_body(Some(config.read_timeout()))
            .max_idle_connections(0)
            .max_idle_connections_per_host(0)
            .tls_config(self.tls.clone())
            .build()
            .new_agent()
    }
}

fn send(
    agent: &ureq::Agent,
    request: HttpRequest,
) -> std::result::Result<HttpResponse, ureq::Error> {
    let mut builder = ureq::http::Request::builder()
        .method(request.method.as_str())
        .uri(&request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }
    let mut response = match request.body {
        Some(body) => agent.run(builder.body(body)?)?,
        None => agent.run(builder.body(())?)?,
    };
    let status = response.status().as_u16();
    let body = response.body_mut().read_to_string()?;
    Ok(HttpResponse { status, body })
}

impl Registry {
    fn register(&mut self, tag: &str) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.calls.insert(id, tag.to_string());
        id
    }

    /// Unregister a finished call. `false` means it was cancelled.
    fn release(&mut self, id: u64) -> bool {
        self.calls.remove(&id).is_some()
    }

    /// Unregister every call whose tag starts with `prefix`.
    fn cancel(&mut self, prefix: &str) -> usize {
        let before = self.calls.len();
        self.calls.retain(|_, tag| !tag.starts_with(prefix));
        before - self.calls.len()
    }
}

impl Transport for DirectTransport {
    fn execute(&self, call: Call) {
        let id = self.registry.lock().register(call.tag());
        let ctx = self.ctx.clone();
        let agent = self.agent();
        let registry = Arc::clone(&self.registry);
        self.ctx.runtime.spawn_blocking(move || {
            let envelope = match ctx.prepare(&call) {
                Ok(request) => match send(&agent, request) {
                    Ok(response) => call.response(response),
                    Err(e) => call.transport_error(e),
                },
                Err(e) => call.transport_error(e),
            };
            let still_registered = registry.lock().release(id);
            if still_registered {
                ctx.completion.post(envelope);
            } else {
                debug!(tag = %call.tag(), url = %call.url, "call cancelled before delivery");
            }
        });
    }

    fn cancel(&self, tag: &str) {
        let count = self.registry.lock().cancel(tag);
        debug!(tag, count, "cancelled direct calls");
    }

    fn in_flight(&self) -> usize {
        self.registry.lock().calls.len()
    }
}
