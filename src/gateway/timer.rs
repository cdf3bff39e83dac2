//! Cancellable delayed callbacks, one slot per phone.
//!
//! QR-scan timeouts and recovery delays share the slot, so scheduling a timer
//! for a phone cancels whatever was pending for it. A timer leaves its slot
//! before running its callback, which may then schedule the next one.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::debug;

/// What a pending timer is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    QrScan,
    Retry,
}

struct Slot {
    id: u64,
    kind: TimerKind,
    handle: AbortHandle,
}

#[derive(Default)]
pub struct TimerService {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    next_id: AtomicU64,
}

fn lock(slots: &Mutex<HashMap<String, Slot>>) -> MutexGuard<'_, HashMap<String, Slot>> {
    slots.lock().unwrap_or_else(|e| e.into_inner())
}

impl TimerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` after `delay`, replacing any timer pending for `phone`.
    pub fn schedule<F>(&self, phone: &str, kind: TimerKind, delay: Duration, callback: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slots = Arc::clone(&self.slots);
        let key = phone.to_string();

        // Holding the lock across spawn + insert keeps a zero-delay timer
        // from clearing its slot before the slot exists.
        let mut map = lock(&self.slots);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut map = lock(&slots);
                if map.get(&key).is_some_and(|s| s.id == id) {
                    map.remove(&key);
                }
            }
            callback.await;
        });

        let slot = Slot {
            id,
            kind,
            handle: task.abort_handle(),
        };
        if let Some(previous) = map.insert(phone.to_string(), slot) {
            debug!("{phone}: {:?} timer replaced by {kind:?}", previous.kind);
            previous.handle.abort();
        }
    }

    /// Cancel whatever is pending for `phone`. Idempotent.
    pub fn cancel(&self, phone: &str) {
        if let Some(slot) = lock(&self.slots).remove(phone) {
            debug!("{phone}: {:?} timer cancelled", slot.kind);
            slot.handle.abort();
        }
    }

    /// Cancel the pending timer only if it is of `kind`.
    pub fn cancel_kind(&self, phone: &str, kind: TimerKind) -> bool {
        let mut map = lock(&self.slots);
        match map.get(phone) {
            Some(slot) if slot.kind == kind => {
                if let Some(slot) = map.remove(phone) {
                    slot.handle.abort();
                }
                true
            }
            _ => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, slot) in lock(&self.slots).drain() {
            slot.handle.abort();
        }
    }

    pub fn pending(&self, phone: &str) -> Option<TimerKind> {
        lock(&self.slots).get(phone).map(|s| s.kind)
    }
}
