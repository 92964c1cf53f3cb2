//! Per-host admission control.
//!
//! At most one command batch runs against a given host at a time. Batches
//! for different hosts never wait on each other.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Admission slot held for the duration of one batch; released on drop
pub type HostSlot = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct HostThrottle {
    slots: DashMap<String, Arc<Mutex<()>>>,
}

impl HostThrottle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the host's slot
    pub async fn acquire(&self, host: &str) -> HostSlot {
        let slot = self
            .slots
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        slot.lock_owned().await
    }

    /// Take the slot only if it is free right now
    pub fn try_acquire(&self, host: &str) -> Option<HostSlot> {
        let slot = self
            .slots
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        slot.try_lock_owned().ok()
    }
}
