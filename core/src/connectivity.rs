//! Connectivity probe consulted before every call.

use std::sync::atomic::{AtomicBool, Ordering};

/// Answers "is there a usable network right now?".
///
/// Asked once per call, never cached by the pipeline.
pub trait Connectivity: Send + Sync {
    fn is_connected(&self) -> bool;
}

/// Assumes the network is always reachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_connected(&self) -> bool {
        true
    }
}

/// A flag the host flips from its own network callbacks.
#[derive(Debug)]
pub struct NetworkState {
    online: AtomicBool,
}

impl Default for NetworkState {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkState {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Connectivity for NetworkState {
    fn is_connected(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
