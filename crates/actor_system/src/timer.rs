//! Agent-anchored timers.
//!
//! Every timer belongs to an agent and is addressed through that agent's
//! handle. Ticks never run the callback inline on the timer's own task;
//! they enqueue a chore through the owning agent's mailbox, so timer work
//! obeys the same serialization as every other callback. A timer whose
//! owner has disappeared — expired handle or closed mailbox — stops
//! silently and permanently; that is the normal way player timers die.

use crate::agent::Mailbox;
use crate::event::AgentHandle;
use crate::handle::Handle;
use crate::ident::SyncIdentAllocator;
use crate::types::TimerId;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::trace;

/// Callback invoked on the owning agent with the fire time and the elapsed
/// time since the previous fire (or since arming, for the first).
pub type TimerTask = Arc<dyn Fn(Instant, Duration) + Send + Sync>;

/// Live timer record; reachable only through a [`TimerHandle`].
pub struct Timer {
    id: TimerId,
    cancel: watch::Sender<bool>,
}

impl Timer {
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Idempotent; a second cancel is a no-op.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }
}

/// Weak reference to a live timer.
pub type TimerHandle = Handle<Timer>;

/// The timer set owned by one agent.
pub struct TimerManager {
    timers: Arc<DashMap<TimerId, Arc<Timer>>>,
    alloc: SyncIdentAllocator,
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerManager {
    pub fn new() -> Self {
        Self {
            timers: Arc::new(DashMap::new()),
            alloc: SyncIdentAllocator::new(),
        }
    }

    /// Arm a timer delivering to `owner`'s mailbox.
    ///
    /// `rate` of zero fires once; a positive rate repeats on that cadence
    /// until cancelled or the owner goes away.
    pub fn create_timer(
        &self,
        owner: AgentHandle,
        task: TimerTask,
        delay: Duration,
        rate: Duration,
    ) -> TimerHandle {
        let id = self.alloc.allocate();
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let timer = Arc::new(Timer {
            id,
            cancel: cancel_tx,
        });
        self.timers.insert(id, Arc::clone(&timer));
        let handle = TimerHandle::new(id, Arc::downgrade(&timer));

        let timers = Arc::clone(&self.timers);
        tokio::spawn(async move {
            let mut next = tokio::time::Instant::now() + delay;
            let mut previous = Instant::now();

            loop {
                tokio::select! {
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep_until(next) => {
                        let now = Instant::now();
                        let delta = now.saturating_duration_since(previous);
                        previous = now;

                        // Expired owner: the agent is gone, stop quietly.
                        let Some(mailbox) = owner.get() else { break };

                        let task = Arc::clone(&task);
                        if mailbox
                            .post_chore(Box::new(move || task(now, delta)))
                            .is_err()
                        {
                            break;
                        }

                        if rate.is_zero() {
                            break;
                        }
                        next += rate;
                    }
                }
            }

            timers.remove(&id);
            trace!(timer = id, "timer loop ended");
        });

        handle
    }

    pub fn cancel(&self, id: TimerId) {
        if let Some(timer) = self.timers.get(&id) {
            timer.cancel();
        }
    }

    pub fn cancel_all(&self) {
        for entry in self.timers.iter() {
            entry.value().cancel();
        }
    }

    /// Number of timers still running.
    pub fn active(&self) -> usize {
        self.timers.len()
    }
}
