use super::*;
use crate::actor::{ActorKind, NullRouter};
use crate::event::{EventBus, EventParam};
use crate::handle::Handle;
use crate::packet::PacketPool;
use crate::recycler::PoolConfig;
use crate::timer::TimerManager;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use tokio::sync::oneshot;

struct ProbeEvent;

impl EventParam for ProbeEvent {
    fn event_type(&self) -> u32 {
        77
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[derive(Default)]
struct TestActor {
    seen: Vec<u32>,
    events: usize,
    ticks: usize,
    in_callback: Arc<AtomicBool>,
    overlaps: Arc<AtomicUsize>,
}

impl TestActor {
    fn enter(&self) {
        if self.in_callback.swap(true, AtomicOrdering::AcqRel) {
            self.overlaps.fetch_add(1, AtomicOrdering::AcqRel);
        }
        // Stretch the callback so concurrent execution would be caught.
        std::thread::sleep(Duration::from_micros(200));
    }

    fn exit(&self) {
        self.in_callback.store(false, AtomicOrdering::Release);
    }
}

impl Actor for TestActor {
    fn on_package(&mut self, _host: &ActorHost, pkg: &crate::packet::Packet) {
        self.enter();
        self.seen.push(pkg.id());
        self.exit();
    }

    fn on_event(&mut self, _host: &ActorHost, _event: &dyn EventParam) {
        self.enter();
        self.events += 1;
        self.exit();
    }

    fn on_tick(&mut self, _host: &ActorHost, _at: Instant, _delta: Duration) {
        self.enter();
        self.ticks += 1;
        self.exit();
    }
}

fn make_pool() -> PacketPool {
    let pool = PacketPool::new(PoolConfig::default());
    pool.initial(16).expect("initial");
    pool
}

fn make_host(id: i64, pool: &PacketPool) -> ActorHost {
    ActorHost::new(
        id,
        ActorKind::Service,
        pool.clone(),
        Arc::new(NullRouter),
        Arc::new(EventBus::new()),
        Arc::new(TimerManager::new()),
        Handle::detached(id),
    )
}

/// Wait for the drain task to publish its terminal state.
async fn wait_stopped(channel: &AgentChannel<TestActor>) {
    for _ in 0..200 {
        if channel.state() == AgentState::Stopped {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("agent never reached Stopped");
}

/// Spawn a drained agent; returns its channel and a receiver yielding the
/// actor back once the drain loop stops.
fn spawn_agent(
    capacity: usize,
) -> (Arc<AgentChannel<TestActor>>, oneshot::Receiver<Box<TestActor>>) {
    let pool = make_pool();
    let (channel, recv) = agent_channel::<TestActor>(7, capacity);
    channel.mark_initialized();
    let host = make_host(7, &pool);

    let (done_tx, done_rx) = oneshot::channel();
    tokio::spawn(run_agent(
        recv,
        Box::new(TestActor::default()),
        host,
        move |actor, _host| {
            let _ = done_tx.send(actor);
        },
    ));
    (Arc::new(channel), done_rx)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn callbacks_never_overlap_under_concurrent_producers() {
    let (channel, done) = spawn_agent(8);
    let pool = make_pool();

    let producers: Vec<_> = (0..4u32)
        .map(|p| {
            let channel = Arc::clone(&channel);
            let pool = pool.clone();
            tokio::spawn(async move {
                for i in 0..100u32 {
                    let mut pkg = pool.acquire().expect("acquire");
                    pkg.get_mut().expect("unique").set_id(2000 + p * 1000 + i);
                    channel.push_package(pkg).await.expect("push");
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.expect("producer");
    }

    channel.request_shutdown(Duration::from_secs(5));
    let actor = done.await.expect("actor returned");

    assert_eq!(actor.seen.len(), 400);
    assert_eq!(actor.overlaps.load(AtomicOrdering::Acquire), 0);
    wait_stopped(&channel).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fifo_preserved_across_fast_and_slow_paths() {
    // Tiny capacity forces frequent awaited sends.
    let (channel, done) = spawn_agent(4);
    let pool = make_pool();

    for i in 1..=200u32 {
        let mut pkg = pool.acquire().expect("acquire");
        pkg.get_mut().expect("unique").set_id(i);
        channel.push_package(pkg).await.expect("push");
    }

    channel.request_shutdown(Duration::from_secs(5));
    let actor = done.await.expect("actor returned");

    let expected: Vec<u32> = (1..=200).collect();
    assert_eq!(actor.seen, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn push_rejected_after_shutdown_request() {
    let (channel, done) = spawn_agent(8);
    let pool = make_pool();

    channel.request_shutdown(Duration::from_millis(200));

    let pkg = pool.acquire().expect("acquire");
    let err = channel.push_package(pkg).await.expect_err("must reject");
    assert!(matches!(err, ActorError::InvalidState(_)));

    let _ = done.await.expect("actor returned");
}

#[tokio::test(flavor = "multi_thread")]
async fn graceful_shutdown_drains_queued_nodes() {
    let (channel, done) = spawn_agent(64);
    let pool = make_pool();

    for i in 1..=10u32 {
        let mut pkg = pool.acquire().expect("acquire");
        pkg.get_mut().expect("unique").set_id(i);
        channel.push_package(pkg).await.expect("push");
    }
    channel.request_shutdown(Duration::from_secs(5));

    let actor = done.await.expect("actor returned");
    assert_eq!(actor.seen.len(), 10);
}

#[tokio::test(flavor = "multi_thread")]
async fn graceful_shutdown_with_empty_queue_stops_promptly() {
    let (channel, done) = spawn_agent(8);

    let started = Instant::now();
    channel.request_shutdown(Duration::from_secs(30));
    let _ = done.await.expect("actor returned");

    // Must not wait for the 30 s force-timeout.
    assert!(started.elapsed() < Duration::from_secs(5));
    wait_stopped(&channel).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn force_shutdown_stops_loop() {
    let (channel, done) = spawn_agent(8);
    channel.force_shutdown();
    let _ = done.await.expect("actor returned");
    wait_stopped(&channel).await;

    // Idempotent.
    channel.force_shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn mailbox_delivers_events_and_ticks() {
    let (channel, done) = spawn_agent(8);

    let mailbox: Arc<dyn Mailbox> = Arc::clone(&channel) as Arc<dyn Mailbox>;
    mailbox
        .post_event(Arc::new(ProbeEvent))
        .expect("post event");
    mailbox
        .post_tick(Instant::now(), Duration::from_millis(16))
        .expect("post tick");

    let flag = Arc::new(AtomicBool::new(false));
    let chore_flag = Arc::clone(&flag);
    mailbox
        .post_chore(Box::new(move || {
            chore_flag.store(true, AtomicOrdering::Release);
        }))
        .expect("post chore");

    channel.request_shutdown(Duration::from_secs(5));
    let actor = done.await.expect("actor returned");

    assert_eq!(actor.events, 1);
    assert_eq!(actor.ticks, 1);
    assert!(flag.load(AtomicOrdering::Acquire));
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_callback_is_contained() {
    let pool = make_pool();
    let (channel, recv) = agent_channel::<TestActor>(9, 8);
    channel.mark_initialized();
    let host = make_host(9, &pool);

    let (done_tx, done_rx) = oneshot::channel();
    tokio::spawn(run_agent(
        recv,
        Box::new(TestActor::default()),
        host,
        move |actor, _host| {
            let _ = done_tx.send(actor);
        },
    ));

    channel
        .push_task(Box::new(|_actor, _host| panic!("handler bug")))
        .await
        .expect("push panicking task");

    let mut pkg = pool.acquire().expect("acquire");
    pkg.get_mut().expect("unique").set_id(42);
    channel.push_package(pkg).await.expect("push after panic");

    channel.request_shutdown(Duration::from_secs(5));
    let actor = done_rx.await.expect("actor returned");

    // The panic was contained; the following package still arrived.
    assert_eq!(actor.seen, vec![42]);
}

#[tokio::test(flavor = "multi_thread")]
async fn agent_id_invalidated_after_stop() {
    let (channel, done) = spawn_agent(8);
    assert_eq!(channel.shared().id(), 7);

    channel.force_shutdown();
    let _ = done.await.expect("actor returned");
    wait_stopped(&channel).await;

    assert_eq!(channel.shared().id(), INVALID_SERVICE_ID as i64);
}
