//! Application event fan-out.
//!
//! Listeners register `(event type, agent handle)` pairs; dispatch delivers
//! the shared event parameter to every listener whose handle is still
//! valid, through the listener's own mailbox rather than inline. Expired
//! handles are pruned opportunistically during dispatch, so the tables need
//! no separate sweep.

use crate::agent::Mailbox;
use crate::handle::Handle;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::trace;

/// Weak address of a listening agent's mailbox.
pub type AgentHandle = Handle<dyn Mailbox>;

/// Typed event payload carried through the bus.
///
/// Implementations downcast on the receiving side via [`EventParam::as_any`].
pub trait EventParam: Send + Sync + 'static {
    /// Discriminant used for listener lookup.
    fn event_type(&self) -> u32;

    fn as_any(&self) -> &dyn Any;
}

/// Pub/sub dispatch over service and player listeners.
///
/// The two listener populations live in separate side tables: services
/// register through their contexts, players through their agents, and an
/// event type may fan out to both.
#[derive(Default)]
pub struct EventBus {
    service_listeners: RwLock<HashMap<u32, HashSet<AgentHandle>>>,
    player_listeners: RwLock<HashMap<u32, HashSet<AgentHandle>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen_service(&self, event: u32, handle: AgentHandle) {
        if !handle.is_valid() {
            return;
        }
        self.service_listeners
            .write()
            .entry(event)
            .or_default()
            .insert(handle);
    }

    pub fn listen_player(&self, event: u32, handle: AgentHandle) {
        if !handle.is_valid() {
            return;
        }
        self.player_listeners
            .write()
            .entry(event)
            .or_default()
            .insert(handle);
    }

    pub fn remove_service_listener(&self, event: u32, id: i64) {
        let mut table = self.service_listeners.write();
        if let Some(set) = table.get_mut(&event) {
            set.remove(&AgentHandle::detached(id));
            if set.is_empty() {
                table.remove(&event);
            }
        }
    }

    pub fn remove_player_listener(&self, event: u32, id: i64) {
        let mut table = self.player_listeners.write();
        if let Some(set) = table.get_mut(&event) {
            set.remove(&AgentHandle::detached(id));
            if set.is_empty() {
                table.remove(&event);
            }
        }
    }

    /// Drop every registration of one player agent, any event type.
    pub fn remove_player(&self, id: i64) {
        let probe = AgentHandle::detached(id);
        let mut table = self.player_listeners.write();
        table.retain(|_, set| {
            set.remove(&probe);
            !set.is_empty()
        });
    }

    /// Drop every registration of one service, any event type.
    pub fn remove_service(&self, id: i64) {
        let probe = AgentHandle::detached(id);
        let mut table = self.service_listeners.write();
        table.retain(|_, set| {
            set.remove(&probe);
            !set.is_empty()
        });
    }

    /// Deliver `event` to every valid listener of its type.
    ///
    /// Delivery goes through each listener's mailbox, preserving the
    /// per-agent serialization guarantee. Returns the number of mailboxes
    /// the event was handed to.
    pub fn dispatch(&self, event: Arc<dyn EventParam>) -> usize {
        let event_type = event.event_type();
        let mut delivered = 0;
        delivered += Self::dispatch_table(&self.service_listeners, event_type, &event);
        delivered += Self::dispatch_table(&self.player_listeners, event_type, &event);
        trace!(event_type, delivered, "event dispatched");
        delivered
    }

    fn dispatch_table(
        table: &RwLock<HashMap<u32, HashSet<AgentHandle>>>,
        event_type: u32,
        event: &Arc<dyn EventParam>,
    ) -> usize {
        // Snapshot the targets under the read lock; deliveries happen
        // outside it.
        let targets: Vec<AgentHandle> = {
            let table = table.read();
            match table.get(&event_type) {
                Some(set) => set.iter().cloned().collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut dead: Vec<i64> = Vec::new();
        for handle in targets {
            match handle.get() {
                Some(mailbox) => {
                    if mailbox.post_event(Arc::clone(event)).is_ok() {
                        delivered += 1;
                    } else {
                        dead.push(handle.id());
                    }
                }
                None => dead.push(handle.id()),
            }
        }

        if !dead.is_empty() {
            let mut table = table.write();
            if let Some(set) = table.get_mut(&event_type) {
                for id in dead {
                    set.remove(&AgentHandle::detached(id));
                }
                if set.is_empty() {
                    table.remove(&event_type);
                }
            }
        }
        delivered
    }

    /// Count of registered service listeners for one event type.
    pub fn service_listener_count(&self, event: u32) -> usize {
        self.service_listeners
            .read()
            .get(&event)
            .map_or(0, HashSet::len)
    }

    /// Count of registered player listeners for one event type.
    pub fn player_listener_count(&self, event: u32) -> usize {
        self.player_listeners
            .read()
            .get(&event)
            .map_or(0, HashSet::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Chore;
    use crate::error::ActorError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    struct Ping;

    impl EventParam for Ping {
        fn event_type(&self) -> u32 {
            9
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: AtomicUsize,
    }

    impl Mailbox for Recorder {
        fn agent_id(&self) -> i64 {
            1
        }

        fn is_open(&self) -> bool {
            true
        }

        fn post_event(&self, _event: Arc<dyn EventParam>) -> Result<(), ActorError> {
            self.events.fetch_add(1, Ordering::AcqRel);
            Ok(())
        }

        fn post_tick(&self, _at: Instant, _delta: Duration) -> Result<(), ActorError> {
            Ok(())
        }

        fn post_chore(&self, _chore: Chore) -> Result<(), ActorError> {
            Ok(())
        }
    }

    fn listener(id: i64, target: &Arc<Recorder>) -> AgentHandle {
        let erased: Arc<dyn Mailbox> = Arc::clone(target) as Arc<dyn Mailbox>;
        AgentHandle::new(id, Arc::downgrade(&erased))
    }

    #[test]
    fn dispatch_reaches_both_listener_tables() {
        let bus = EventBus::new();
        let service = Arc::new(Recorder::default());
        let player = Arc::new(Recorder::default());

        bus.listen_service(9, listener(3, &service));
        bus.listen_player(9, listener(400, &player));

        let delivered = bus.dispatch(Arc::new(Ping));
        assert_eq!(delivered, 2);
        assert_eq!(service.events.load(Ordering::Acquire), 1);
        assert_eq!(player.events.load(Ordering::Acquire), 1);
    }

    #[test]
    fn unrelated_event_types_do_not_cross() {
        let bus = EventBus::new();
        let service = Arc::new(Recorder::default());
        bus.listen_service(9, listener(3, &service));

        struct Other;
        impl EventParam for Other {
            fn event_type(&self) -> u32 {
                10
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        assert_eq!(bus.dispatch(Arc::new(Other)), 0);
        assert_eq!(service.events.load(Ordering::Acquire), 0);
    }

    #[test]
    fn expired_listeners_pruned_during_dispatch() {
        let bus = EventBus::new();
        let keep = Arc::new(Recorder::default());
        bus.listen_service(9, listener(3, &keep));

        {
            let ephemeral = Arc::new(Recorder::default());
            bus.listen_service(9, listener(4, &ephemeral));
            assert_eq!(bus.service_listener_count(9), 2);
        }

        // The dropped listener is removed while delivering, not by a sweep.
        let delivered = bus.dispatch(Arc::new(Ping));
        assert_eq!(delivered, 1);
        assert_eq!(bus.service_listener_count(9), 1);
        assert_eq!(keep.events.load(Ordering::Acquire), 1);
    }

    #[test]
    fn remove_listener_by_id() {
        let bus = EventBus::new();
        let target = Arc::new(Recorder::default());
        bus.listen_service(9, listener(3, &target));
        bus.remove_service_listener(9, 3);
        assert_eq!(bus.service_listener_count(9), 0);
        assert_eq!(bus.dispatch(Arc::new(Ping)), 0);
    }

    #[test]
    fn remove_player_clears_every_event_type() {
        let bus = EventBus::new();
        let target = Arc::new(Recorder::default());
        bus.listen_player(9, listener(400, &target));
        bus.listen_player(10, listener(400, &target));

        bus.remove_player(400);
        assert_eq!(bus.player_listener_count(9), 0);
        assert_eq!(bus.player_listener_count(10), 0);
    }

    #[test]
    fn invalid_handles_are_not_registered() {
        let bus = EventBus::new();
        bus.listen_service(9, AgentHandle::detached(3));
        assert_eq!(bus.service_listener_count(9), 0);
    }
}
