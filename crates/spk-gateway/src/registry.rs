//! Active action bookkeeping with debounced auto-release
//!
//! Every registration for a key supersedes the previous one, including its
//! timer. A registration with a non-zero timeout releases itself when the
//! timeout elapses: the action is removed and the release callback is invoked
//! with [`ActionStatus::Off`].

use dashmap::DashMap;
use futures::FutureExt;
use spk_core::{ActionKey, ActionStatus, ZoneId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::scheduler::{Scheduler, TimerHandle};

/// Callback invoked when a timer releases an action
pub type ReleaseCallback = Arc<dyn Fn(ActionKey, ActionStatus) + Send + Sync>;

/// A tracked action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub key: ActionKey,
    pub device_id: ZoneId,
    pub status: ActionStatus,
    /// When the pending timer fires, `None` when latched
    pub expire_at: Option<Instant>,
}

struct Entry {
    action: Action,
    generation: u64,
    timer: Option<TimerHandle>,
}

impl Entry {
    fn cancel_timer(&self) {
        if let Some(timer) = &self.timer {
            timer.cancel();
        }
    }
}

struct Inner {
    entries: DashMap<ActionKey, Entry>,
    scheduler: Arc<dyn Scheduler>,
    on_release: ReleaseCallback,
    generation: AtomicU64,
}

impl Inner {
    fn expire(&self, key: &ActionKey, generation: u64) {
        // a newer registration owns the entry now
        let removed = self
            .entries
            .remove_if(key, |_, entry| entry.generation == generation);

        if removed.is_some() {
            info!("Action {} released", key);
            (self.on_release)(key.clone(), ActionStatus::Off);
        } else {
            debug!("Stale timer for {} ignored", key);
        }
    }
}

/// Registry of active actions, one per key
#[derive(Clone)]
pub struct ActionRegistry {
    inner: Arc<Inner>,
}

impl ActionRegistry {
    pub fn new<F>(scheduler: Arc<dyn Scheduler>, on_release: F) -> Self
    where
        F: Fn(ActionKey, ActionStatus) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                scheduler,
                on_release: Arc::new(on_release),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Insert or replace the action for `key`.
    ///
    /// Any pending timer for the key is cancelled first. A zero `timeout`
    /// latches the action until the next registration or [`cancel`](Self::cancel).
    pub fn register(&self, key: ActionKey, status: ActionStatus, timeout: Duration) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let expire_at = (!timeout.is_zero()).then(|| Instant::now() + timeout);

        let entry = Entry {
            action: Action {
                key: key.clone(),
                device_id: key.zone(),
                status,
                expire_at,
            },
            generation,
            timer: None,
        };

        if let Some(previous) = self.inner.entries.insert(key.clone(), entry) {
            previous.cancel_timer();
        }
        debug!("Action {} registered as {} (timeout {:?})", key, status, timeout);

        if expire_at.is_none() {
            return;
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let timer_key = key.clone();
        let timer = self.inner.scheduler.schedule(
            timeout,
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.expire(&timer_key, generation);
                }
            }
            .boxed(),
        );

        // the timer may already have fired, or been superseded meanwhile
        match self.inner.entries.get_mut(&key) {
            Some(mut entry) if entry.generation == generation => entry.timer = Some(timer),
            _ => timer.cancel(),
        }
    }

    /// Remove the action for `key` without invoking the release callback
    pub fn cancel(&self, key: &ActionKey) {
        if let Some((_, entry)) = self.inner.entries.remove(key) {
            entry.cancel_timer();
            debug!("Action {} cancelled", key);
        }
    }

    /// Whether an action is tracked for `key`
    pub fn contains(&self, key: &ActionKey) -> bool {
        self.inner.entries.contains_key(key)
    }

    pub fn get(&self, key: &ActionKey) -> Option<Action> {
        self.inner.entries.get(key).map(|entry| entry.action.clone())
    }

    /// Snapshot of every tracked action
    pub fn actions(&self) -> Vec<Action> {
        self.inner
            .entries
            .iter()
            .map(|entry| entry.action.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Drop every action and cancel every pending timer
    pub fn clear(&self) {
        self.inner.entries.retain(|_, entry| {
            entry.cancel_timer();
            false
        });
    }
}
