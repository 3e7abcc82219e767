//! Liveness and readiness flags.
//!
//! # States
//! - healthy: process is up and serving (liveness)
//! - ready: instance should receive traffic (readiness)
//!
//! # State Transitions
//! ```text
//! startup: both set once the listener is bound
//! /readyz/disable, /readyz/enable: toggle readiness only
//! shutdown: both cleared before draining
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct ServiceHealth {
    healthy: AtomicBool,
    ready: AtomicBool,
}

impl ServiceHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Mark the instance live and ready.
    pub fn mark_started(&self) {
        self.healthy.store(true, Ordering::Relaxed);
        self.ready.store(true, Ordering::Relaxed);
    }

    /// Fail all probes from now on.
    pub fn mark_stopping(&self) {
        self.healthy.store(false, Ordering::Relaxed);
        self.ready.store(false, Ordering::Relaxed);
    }
}
