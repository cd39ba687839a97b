//! The single ordered delivery point for every call.
//!
//! # Design
//! Workers and the coordinator post jobs into one unbounded channel; one
//! dedicated thread drains it in FIFO order. That thread is the only place
//! that touches the record store and the only place listeners run, so
//! callbacks never interleave and the store needs no coordination beyond its
//! own lock.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, warn};

use crate::envelope::{Envelope, Origin};
use crate::error::{CourierError, Result};
use crate::store::{CacheRecord, RecordStore};
use crate::transport::Call;

pub(crate) enum Job {
    /// A finished call from a transport or the coordinator.
    Deliver(Envelope),
    /// Offline with caching on: answer from the store.
    Replay(Call),
}

/// Cloneable sending half of the completion queue.
#[derive(Clone)]
pub struct CompletionQueue {
    sender: Sender<Job>,
}

impl CompletionQueue {
    /// Spawn the consumer thread. `store` is `Some` exactly when caching is
    /// enabled.
    pub fn start(store: Option<Arc<dyn RecordStore>>, debug: bool) -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let consumer = Consumer { store, debug };
        std::thread::Builder::new()
            .name("courier-completion".to_string())
            .spawn(move || consumer.run(receiver))
            .map_err(|e| CourierError::Runtime(format!("completion thread: {e}")))?;
        Ok(Self { sender })
    }

    /// Hand a finished envelope to the consumer.
    pub fn post(&self, envelope: Envelope) {
        if self.sender.send(Job::Deliver(envelope)).is_err() {
            warn!("completion queue closed; envelope dropped");
        }
    }

    pub(crate) fn replay(&self, call: Call) {
        if self.sender.send(Job::Replay(call)).is_err() {
            warn!("completion queue closed; cache replay dropped");
        }
    }
}

struct Consumer {
    store: Option<Arc<dyn RecordStore>>,
    debug: bool,
}

impl Consumer {
    fn run(self, receiver: Receiver<Job>) {
        for job in receiver {
            self.handle(job);
        }
        debug!("completion queue closed");
    }

    fn handle(&self, job: Job) {
        let envelope = match job {
            Job::Deliver(envelope) => envelope,
            Job::Replay(call) => self.replay(call),
        };
        self.persist(&envelope);
        if self.debug {
            trace(&envelope);
        }
        deliver(&envelope);
    }

    fn replay(&self, call: Call) -> Envelope {
        let key = call.params.serialized();
        let found = match &self.store {
            Some(store) => store.find(&call.url, &key),
            None => Ok(None),
        };
        match found {
            Ok(Some(record)) => {
                debug!(
                    url = %call.url,
                    code = record.status.code(),
                    "offline: replaying cached response"
                );
                call.envelope(record.status, record.body, Origin::Cache, record.exception)
            }
            Ok(None) => {
                debug!(url = %call.url, "offline: no cached response");
                call.no_network(Origin::Cache)
            }
            Err(e) => {
                warn!(url = %call.url, error = %e, "cache lookup failed");
                call.no_network(Origin::Cache)
            }
        }
    }

    fn persist(&self, envelope: &Envelope) {
        let Some(store) = &self.store else {
            return;
        };
        let record = CacheRecord {
            url: envelope.url.clone(),
            params: envelope.params.serialized(),
            status: envelope.status,
            body: envelope.body.clone(),
            exception: if envelope.status.is_success() {
                None
            } else {
                Some(envelope.message())
            },
        };
        if let Err(e) = store.upsert(&record) {
            warn!(url = %envelope.url, error = %e, "cache write failed");
        }
    }
}

fn trace(envelope: &Envelope) {
    debug!(
        target: "courier::trace",
        method = %envelope.method,
        url = %envelope.url,
        tag = %envelope.tag(),
        headers = ?envelope.headers,
        params = %envelope.params.serialized(),
        status = envelope.code(),
        origin = ?envelope.origin,
        body = %envelope.body,
        "call completed"
    );
}

/// Route to the listener: empty body → nothing, 200 → success, else failure.
fn deliver(envelope: &Envelope) {
    if envelope.body.is_empty() {
        debug!(url = %envelope.url, code = envelope.code(), "empty body; nothing to deliver");
        return;
    }
    let listener = &envelope.listener;
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        if envelope.status.is_success() {
            listener.on_success(envelope)
        } else {
            listener.on_failure(envelope)
        }
    }));
    if outcome.is_err() {
        error!(url = %envelope.url, tag = %envelope.tag(), "listener panicked");
    }
}
