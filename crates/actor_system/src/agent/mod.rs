//! The agent mailbox: one bounded channel, one drain task, one actor.
//!
//! Every agent owns a bounded multi-producer channel of schedule nodes and
//! exactly one perpetual consumer task bound to it. Producers on any worker
//! thread enqueue without ever invoking actor logic directly; the drain
//! task executes nodes strictly one at a time. That single-consumer shape
//! is the whole concurrency story: an actor's callbacks can never overlap,
//! while different agents' drain tasks run in parallel across the runtime's
//! workers, so no per-actor lock exists anywhere.
//!
//! Producers have two entry points. The async `push_*` family takes the
//! try-send fast path and, when the channel is momentarily full, suspends
//! until room frees up — the producer task yields instead of blocking its
//! thread, and its own enqueue order is preserved. The sync `post_*`
//! family is for use inside actor callbacks and other non-async code: on a
//! full channel it hands the node to a spawned send, trading strict
//! ordering for never waiting.

use crate::actor::{Actor, ActorHost};
use crate::error::ActorError;
use crate::event::EventParam;
use crate::packet::PacketHandle;
use crate::types::INVALID_SERVICE_ID;
use std::ops::DerefMut;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

/// Default bound of an agent's schedule channel.
pub const AGENT_CHANNEL_CAPACITY: usize = 1024;

/// Lifecycle states of an agent.
///
/// Ordering is meaningful: states at or beyond `Waiting` reject new nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum AgentState {
    Created = 0,
    Initializing = 1,
    Initialized = 2,
    Idle = 3,
    Running = 4,
    Waiting = 5,
    ShuttingDown = 6,
    Stopped = 7,
    Terminated = 8,
}

impl AgentState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Initializing,
            2 => Self::Initialized,
            3 => Self::Idle,
            4 => Self::Running,
            5 => Self::Waiting,
            6 => Self::ShuttingDown,
            7 => Self::Stopped,
            _ => Self::Terminated,
        }
    }
}

/// State and identity shared between an agent's channel, its drain task and
/// its owner.
pub struct AgentShared {
    id: AtomicI64,
    state: AtomicU8,
}

impl AgentShared {
    fn new(id: i64) -> Self {
        Self {
            id: AtomicI64::new(id),
            state: AtomicU8::new(AgentState::Created as u8),
        }
    }

    pub fn id(&self) -> i64 {
        self.id.load(Ordering::Acquire)
    }

    pub fn state(&self) -> AgentState {
        AgentState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: AgentState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Advance to `state` only if currently before it; returns whether the
    /// store happened.
    pub(crate) fn advance_to(&self, state: AgentState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= state as u8 {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                state as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    fn invalidate_id(&self) {
        self.id
            .store(INVALID_SERVICE_ID as i64, Ordering::Release);
    }
}

/// A deferred closure with no actor access; used by timers.
pub type Chore = Box<dyn FnOnce() + Send>;

/// One unit of work queued to an agent.
pub enum ScheduleNode<A: Actor + ?Sized> {
    /// Deliver a package to the actor.
    Package(PacketHandle),
    /// Run a typed task against the actor.
    Task(Box<dyn FnOnce(&mut A, &ActorHost) + Send>),
    /// Deliver an event parameter.
    Event(Arc<dyn EventParam>),
    /// Deliver a periodic tick.
    Tick { at: Instant, delta: Duration },
    /// Run an actor-agnostic chore (timer callbacks).
    Chore(Chore),
}

/// Type-erased producer surface used by the event bus and timers.
///
/// Only the node kinds that need no actor typing cross this boundary;
/// typed tasks go through the concrete channel instead.
pub trait Mailbox: Send + Sync {
    fn agent_id(&self) -> i64;

    /// False once the agent stopped accepting nodes.
    fn is_open(&self) -> bool;

    fn post_event(&self, event: Arc<dyn EventParam>) -> Result<(), ActorError>;

    fn post_tick(&self, at: Instant, delta: Duration) -> Result<(), ActorError>;

    fn post_chore(&self, chore: Chore) -> Result<(), ActorError>;
}

/// Producer half of an agent's schedule channel.
pub struct AgentChannel<A: Actor + ?Sized> {
    tx: mpsc::Sender<ScheduleNode<A>>,
    shared: Arc<AgentShared>,
    shutdown: Arc<watch::Sender<bool>>,
}

/// Consumer half, owned by the drain task.
pub struct AgentReceiver<A: Actor + ?Sized> {
    rx: mpsc::Receiver<ScheduleNode<A>>,
    shutdown: watch::Receiver<bool>,
    shared: Arc<AgentShared>,
}

/// Create a schedule channel for agent `id`.
pub fn agent_channel<A: Actor + ?Sized>(
    id: i64,
    capacity: usize,
) -> (AgentChannel<A>, AgentReceiver<A>) {
    let (tx, rx) = mpsc::channel(capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shared = Arc::new(AgentShared::new(id));
    (
        AgentChannel {
            tx,
            shared: Arc::clone(&shared),
            shutdown: Arc::new(shutdown_tx),
        },
        AgentReceiver {
            rx,
            shutdown: shutdown_rx,
            shared,
        },
    )
}

impl<A: Actor + ?Sized> AgentChannel<A> {
    pub fn shared(&self) -> &Arc<AgentShared> {
        &self.shared
    }

    pub fn state(&self) -> AgentState {
        self.shared.state()
    }

    /// Mark the agent ready to accept nodes (actor instance exists).
    pub fn mark_initialized(&self) {
        self.shared.advance_to(AgentState::Initialized);
    }

    /// Reject producers once shutdown has begun. This is a contract, not
    /// best effort: the caller learns its node was not queued.
    fn guard(&self) -> Result<(), ActorError> {
        match self.shared.state() {
            AgentState::Initialized | AgentState::Idle | AgentState::Running => Ok(()),
            state => Err(ActorError::InvalidState(state)),
        }
    }

    /// Ordered enqueue: try-send first, suspend until room when full.
    pub async fn push(&self, node: ScheduleNode<A>) -> Result<(), ActorError> {
        self.guard()?;
        match self.tx.try_send(node) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ActorError::ChannelClosed),
            Err(mpsc::error::TrySendError::Full(node)) => self
                .tx
                .send(node)
                .await
                .map_err(|_| ActorError::ChannelClosed),
        }
    }

    pub async fn push_package(&self, pkg: PacketHandle) -> Result<(), ActorError> {
        self.push(ScheduleNode::Package(pkg)).await
    }

    pub async fn push_event(&self, event: Arc<dyn EventParam>) -> Result<(), ActorError> {
        self.push(ScheduleNode::Event(event)).await
    }

    pub async fn push_task(
        &self,
        task: Box<dyn FnOnce(&mut A, &ActorHost) + Send>,
    ) -> Result<(), ActorError> {
        self.push(ScheduleNode::Task(task)).await
    }

    pub async fn push_tick(&self, at: Instant, delta: Duration) -> Result<(), ActorError> {
        self.push(ScheduleNode::Tick { at, delta }).await
    }

    /// Fire-and-forget enqueue for non-async callers: the fast path is the
    /// same try-send; a full channel falls back to a send completed on a
    /// spawned task so the producer never waits.
    pub fn post(&self, node: ScheduleNode<A>) -> Result<(), ActorError>
    where
        A: 'static,
    {
        self.guard()?;
        match self.tx.try_send(node) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ActorError::ChannelClosed),
            Err(mpsc::error::TrySendError::Full(node)) => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    if tx.send(node).await.is_err() {
                        debug!("agent channel closed before deferred send completed");
                    }
                });
                Ok(())
            }
        }
    }

    pub fn post_task(
        &self,
        task: Box<dyn FnOnce(&mut A, &ActorHost) + Send>,
    ) -> Result<(), ActorError>
    where
        A: 'static,
    {
        self.post(ScheduleNode::Task(task))
    }

    pub fn post_package(&self, pkg: PacketHandle) -> Result<(), ActorError>
    where
        A: 'static,
    {
        self.post(ScheduleNode::Package(pkg))
    }

    /// Request a graceful stop: mark `Waiting` so producers are rejected,
    /// let the drain task finish what is already queued, and force the stop
    /// if it has not happened within `timeout`.
    pub fn request_shutdown(&self, timeout: Duration) {
        if !self.shared.advance_to(AgentState::Waiting) {
            return;
        }
        debug!(agent = self.shared.id(), "graceful shutdown requested");

        let shared = Arc::clone(&self.shared);
        let shutdown = Arc::clone(&self.shutdown);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if shared.state() < AgentState::Stopped {
                warn!(agent = shared.id(), "graceful shutdown timed out, forcing");
                let _ = shutdown.send(true);
            }
        });

        // Nudge the drain task in case it is parked on an empty channel
        // with nothing left to drain.
        let _ = self.shutdown.send(false);
    }

    /// Close the channel immediately. Idempotent; the universal
    /// cancellation signal for everything anchored to this agent.
    pub fn force_shutdown(&self) {
        self.shared.advance_to(AgentState::ShuttingDown);
        let _ = self.shutdown.send(true);
    }
}

impl<A: Actor + ?Sized + 'static> Mailbox for AgentChannel<A> {
    fn agent_id(&self) -> i64 {
        self.shared.id()
    }

    fn is_open(&self) -> bool {
        self.guard().is_ok()
    }

    fn post_event(&self, event: Arc<dyn EventParam>) -> Result<(), ActorError> {
        self.post(ScheduleNode::Event(event))
    }

    fn post_tick(&self, at: Instant, delta: Duration) -> Result<(), ActorError> {
        self.post(ScheduleNode::Tick { at, delta })
    }

    fn post_chore(&self, chore: Chore) -> Result<(), ActorError> {
        self.post(ScheduleNode::Chore(chore))
    }
}

fn execute_node<A: Actor + ?Sized>(node: ScheduleNode<A>, actor: &mut A, host: &ActorHost) {
    let outcome = catch_unwind(AssertUnwindSafe(|| match node {
        ScheduleNode::Package(pkg) => actor.on_package(host, &pkg),
        ScheduleNode::Task(task) => task(actor, host),
        ScheduleNode::Event(event) => actor.on_event(host, event.as_ref()),
        ScheduleNode::Tick { at, delta } => actor.on_tick(host, at, delta),
        ScheduleNode::Chore(chore) => chore(),
    }));
    if outcome.is_err() {
        // Contained: one bad handler must not take the agent down.
        error!(agent = host.agent_id(), "actor callback panicked");
    }
}

/// The perpetual consumer loop. Exactly one runs per agent.
///
/// `instance` owns the actor (for loaded modules, dropping it invokes the
/// module's destroy symbol); `cleanup` receives it back after `stop` so the
/// owner can recycle the actor instead of destroying it.
pub async fn run_agent<A, H, F>(
    mut recv: AgentReceiver<A>,
    mut instance: H,
    host: ActorHost,
    cleanup: F,
) where
    A: Actor + ?Sized,
    H: DerefMut<Target = A> + Send + 'static,
    F: FnOnce(H, &ActorHost) + Send + 'static,
{
    recv.shared.advance_to(AgentState::Idle);

    'drain: loop {
        // A graceful request lets already-queued nodes finish first.
        if recv.shared.state() >= AgentState::Waiting {
            while let Ok(node) = recv.rx.try_recv() {
                if *recv.shutdown.borrow() {
                    break;
                }
                execute_node(node, &mut *instance, &host);
            }
            break 'drain;
        }

        tokio::select! {
            changed = recv.shutdown.changed() => {
                if changed.is_err() || *recv.shutdown.borrow() {
                    break 'drain;
                }
                // Woken to re-check state (graceful request).
            }
            node = recv.rx.recv() => {
                let Some(node) = node else { break 'drain };
                recv.shared.set_state(AgentState::Running);
                execute_node(node, &mut *instance, &host);
                if recv.shared.state() >= AgentState::Waiting {
                    // Shutdown was requested mid-callback; drain the rest
                    // through the loop head.
                    continue;
                }
                recv.shared.set_state(AgentState::Idle);
            }
        }
    }

    recv.shared.set_state(AgentState::ShuttingDown);
    recv.rx.close();
    host.cancel_all_timers();

    if catch_unwind(AssertUnwindSafe(|| instance.stop(&host))).is_err() {
        error!(agent = host.agent_id(), "actor stop() panicked");
    }
    cleanup(instance, &host);

    recv.shared.invalidate_id();
    recv.shared.set_state(AgentState::Stopped);
    debug!("agent drain loop stopped");
}

#[cfg(test)]
mod tests;
