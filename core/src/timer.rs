//! Cancellable delayed actions
//!
//! Timers run as tokio tasks that sleep and then hand their target back to
//! the owning session over a channel. The session acts on a fired timer on
//! its own turn, so a timer never touches bot state directly. Cancelling a
//! timer before it fires guarantees it is never delivered.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// What a timer does when it fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerTarget {
    /// Stop holding back a room we were kicked from
    Rejoin(String),
    /// Deliver a token to a loaded module
    Module { module: String, token: String },
}

impl TimerTarget {
    /// Name of the module owning this timer, if any
    pub fn module(&self) -> Option<&str> {
        match self {
            TimerTarget::Module { module, .. } => Some(module),
            TimerTarget::Rejoin(_) => None,
        }
    }
}

impl fmt::Display for TimerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerTarget::Rejoin(room) => write!(f, "rejoin {}", room),
            TimerTarget::Module { module, token } => write!(f, "{}:{}", module, token),
        }
    }
}

struct Inner {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, (TimerTarget, AbortHandle)>>,
    fired: mpsc::UnboundedSender<TimerTarget>,
}

/// Timer registry owned by one session
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a scheduler and the receiver fired timers are delivered on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerTarget>) {
        let (fired, receiver) = mpsc::unbounded_channel();
        let scheduler = Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
                fired,
            }),
        };
        (scheduler, receiver)
    }

    /// Fire `target` after `delay`
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, delay: Duration, target: TimerTarget) -> TimerHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Scheduling timer {} ({}) in {:?}", id, target, delay);

        // Hold the lock across the spawn so the task cannot fire before its
        // entry exists.
        let mut pending = self.inner.pending.lock();
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                let fired = inner.pending.lock().remove(&id);
                if let Some((target, _)) = fired {
                    let _ = inner.fired.send(target);
                }
            }
        });
        pending.insert(id, (target, task.abort_handle()));

        TimerHandle {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Cancel every pending timer owned by `module`, returning how many were cancelled
    pub fn cancel_owned_by(&self, module: &str) -> usize {
        let mut pending = self.inner.pending.lock();
        let ids: Vec<u64> = pending
            .iter()
            .filter(|(_, (target, _))| target.module() == Some(module))
            .map(|(id, _)| *id)
            .collect();

        for id in &ids {
            if let Some((_, handle)) = pending.remove(id) {
                handle.abort();
            }
        }
        ids.len()
    }

    /// Cancel every pending timer
    pub fn cancel_all(&self) {
        let mut pending = self.inner.pending.lock();
        for (_, (_, handle)) in pending.drain() {
            handle.abort();
        }
    }

    /// Number of timers that have not fired or been cancelled
    pub fn pending(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

/// Handle to a single scheduled timer
#[derive(Debug, Clone)]
pub struct TimerHandle {
    id: u64,
    inner: Weak<Inner>,
}

impl TimerHandle {
    /// Cancel the timer; returns false if it already fired or was cancelled
    pub fn cancel(&self) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let removed = inner.pending.lock().remove(&self.id);
        match removed {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Whether the timer is still waiting to fire
    pub fn is_pending(&self) -> bool {
        self.inner
            .upgrade()
            .map(|inner| inner.pending.lock().contains_key(&self.id))
            .unwrap_or(false)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_timer(module: &str, token: &str) -> TimerTarget {
        TimerTarget::Module {
            module: module.to_string(),
            token: token.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires() {
        let (scheduler, mut fired) = Scheduler::new();
        let handle = scheduler.schedule(Duration::from_secs(5), module_timer("wordbot", "round"));
        assert!(handle.is_pending());

        let target = fired.recv().await.unwrap();
        assert_eq!(target, module_timer("wordbot", "round"));
        assert!(!handle.is_pending());
        assert!(!handle.cancel());
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (scheduler, mut fired) = Scheduler::new();
        let handle = scheduler.schedule(Duration::from_secs(5), TimerTarget::Rejoin("#room".to_string()));
        assert!(handle.cancel());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(fired.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_by_owner() {
        let (scheduler, mut fired) = Scheduler::new();
        scheduler.schedule(Duration::from_secs(1), module_timer("a", "x"));
        scheduler.schedule(Duration::from_secs(1), module_timer("a", "y"));
        scheduler.schedule(Duration::from_secs(2), module_timer("b", "z"));

        assert_eq!(scheduler.cancel_owned_by("a"), 2);
        assert_eq!(scheduler.pending(), 1);

        assert_eq!(fired.recv().await.unwrap(), module_timer("b", "z"));

        scheduler.schedule(Duration::from_secs(1), module_timer("b", "w"));
        scheduler.cancel_all();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(fired.try_recv().is_err());
    }
}
