use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use herald_core::app::{ClaimMode, EventWriter, RelayConfig, RelayPoller, RetryPolicy};
use herald_core::config::OutboxConfig;
use herald_core::domain::{DeliveryState, OutboxEvent, RecordId};
use herald_core::impls::{InMemoryBroker, InMemoryOutboxStore};
use herald_core::ports::{FixedClock, OutboxStore, SystemClock, UlidGenerator};
use serde::Serialize;

#[derive(Serialize)]
struct Square {
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: i64,
}

impl OutboxEvent for Square {
    const EVENT_TYPE: &'static str = "Square";
}

#[derive(Serialize)]
struct Pentagon {
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: i64,
}

impl OutboxEvent for Pentagon {
    const EVENT_TYPE: &'static str = "Pentagon";
}

fn square(timestamp: i64) -> Square {
    Square {
        kind: "Square",
        timestamp,
    }
}

struct World {
    clock: FixedClock,
    store: Arc<InMemoryOutboxStore>,
    broker: Arc<InMemoryBroker>,
    writer: EventWriter,
}

impl World {
    fn new(broker: InMemoryBroker) -> Self {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
        let store = Arc::new(InMemoryOutboxStore::new(Arc::new(clock.clone())));
        let writer = EventWriter::new(
            store.clone(),
            Arc::new(OutboxConfig::default().routing_table()),
            Arc::new(UlidGenerator::new(clock.clone())),
        );
        Self {
            clock,
            store,
            broker: Arc::new(broker),
            writer,
        }
    }

    fn relay(&self, claim: ClaimMode) -> RelayPoller {
        RelayPoller::new(
            self.store.clone(),
            self.broker.clone(),
            Arc::new(self.clock.clone()),
            Arc::new(UlidGenerator::new(self.clock.clone())),
            RelayConfig {
                claim,
                retry: RetryPolicy::immediate(),
                poll_interval: Duration::from_millis(10),
                ..OutboxConfig::default().relay_config()
            },
        )
    }

    async fn state(&self, id: RecordId) -> DeliveryState {
        self.store.get(id).await.unwrap().unwrap().state()
    }
}

#[tokio::test]
async fn records_are_attempted_in_creation_order() {
    let world = World::new(InMemoryBroker::new());
    let mut ids = world.writer.publish_committed(&square(1)).await.unwrap();
    world.clock.advance(chrono::Duration::milliseconds(1));
    ids.extend(
        world
            .writer
            .publish_committed(&Pentagon {
                kind: "Pentagon",
                timestamp: 2,
            })
            .await
            .unwrap(),
    );
    world.broker.fail_attempts(&[2]).await;

    let report = world
        .relay(ClaimMode::SingleInstance)
        .run_cycle()
        .await
        .unwrap();
    assert_eq!(report.fetched, 3);

    let states = [
        world.state(ids[0]).await,
        world.state(ids[1]).await,
        world.state(ids[2]).await,
    ];
    assert_eq!(
        states,
        [
            DeliveryState::Published,
            DeliveryState::Pending,
            DeliveryState::Published
        ]
    );

    let keys: Vec<_> = world
        .broker
        .deliveries()
        .await
        .into_iter()
        .map(|d| d.routing_key)
        .collect();
    assert_eq!(keys, vec!["shape.square", "shape.pentagon.2"]);
}

#[tokio::test]
async fn flaky_broker_eventually_delivers_everything() {
    let world = World::new(InMemoryBroker::new());
    for ts in 0..5 {
        world.writer.publish_committed(&square(ts)).await.unwrap();
    }
    world.broker.fail_next(7).await;

    let relay = world.relay(ClaimMode::Lease(Duration::from_secs(30)));
    for _ in 0..5 {
        relay.run_cycle().await.unwrap();
    }

    let counts = world.store.counts().await.unwrap();
    assert_eq!(counts.pending, 0);
    assert_eq!(counts.published, 5);
    assert_eq!(world.broker.deliveries().await.len(), 5);
}

#[tokio::test]
async fn unmarked_record_is_delivered_twice_without_claim() {
    let world = World::new(InMemoryBroker::new());
    let ids = world.writer.publish_committed(&square(1)).await.unwrap();
    world.store.fail_next_updates(1).await;

    let relay = world.relay(ClaimMode::SingleInstance);
    assert_eq!(relay.run_cycle().await.unwrap().unconfirmed, 1);
    assert_eq!(world.state(ids[0]).await, DeliveryState::Pending);

    assert_eq!(relay.run_cycle().await.unwrap().published, 1);
    assert_eq!(world.broker.deliveries().await.len(), 2);
}

#[tokio::test]
async fn concurrent_relays_without_claim_can_double_deliver() {
    let world = World::new(InMemoryBroker::with_latency(Duration::from_millis(50)));
    let ids = world.writer.publish_committed(&square(1)).await.unwrap();

    let a = world.relay(ClaimMode::SingleInstance);
    let b = world.relay(ClaimMode::SingleInstance);
    let (ra, rb) = tokio::join!(a.run_cycle(), b.run_cycle());
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(world.broker.deliveries().await.len(), 2);
    assert_eq!(ra.published + rb.published, 1);
    assert_eq!(ra.duplicates + rb.duplicates, 1);
    assert_eq!(world.state(ids[0]).await, DeliveryState::Published);
}

#[tokio::test]
async fn claim_step_prevents_double_delivery() {
    let world = World::new(InMemoryBroker::with_latency(Duration::from_millis(50)));
    let ids = world.writer.publish_committed(&square(1)).await.unwrap();

    let lease = ClaimMode::Lease(Duration::from_secs(30));
    let a = world.relay(lease);
    let b = world.relay(lease);
    let (ra, rb) = tokio::join!(a.run_cycle(), b.run_cycle());
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(world.broker.deliveries().await.len(), 1);
    assert_eq!(ra.published + rb.published, 1);
    assert_eq!(ra.duplicates + rb.duplicates, 0);
    assert_eq!(world.state(ids[0]).await, DeliveryState::Published);
}

#[tokio::test]
async fn lease_shorter_than_send_duplicates_but_never_loses() {
    let clock = Arc::new(SystemClock);
    let store = Arc::new(InMemoryOutboxStore::new(clock.clone()));
    let broker = Arc::new(InMemoryBroker::with_latency(Duration::from_millis(150)));
    let writer = EventWriter::new(
        store.clone(),
        Arc::new(OutboxConfig::default().routing_table()),
        Arc::new(UlidGenerator::new(SystemClock)),
    );
    let ids = writer.publish_committed(&square(1)).await.unwrap();

    let relay = || {
        RelayPoller::new(
            store.clone(),
            broker.clone(),
            clock.clone(),
            Arc::new(UlidGenerator::new(SystemClock)),
            RelayConfig {
                claim: ClaimMode::Lease(Duration::from_millis(20)),
                retry: RetryPolicy::immediate(),
                ..OutboxConfig::default().relay_config()
            },
        )
    };
    let (a, b) = (relay(), relay());

    // b starts once a's lease has lapsed but a's send is still in flight
    let (ra, rb) = tokio::join!(a.run_cycle(), async {
        tokio::time::sleep(Duration::from_millis(60)).await;
        b.run_cycle().await
    });
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(broker.deliveries().await.len(), 2);
    assert_eq!(ra.published, 1);
    assert_eq!(rb.duplicates, 1);

    let record = store.get(ids[0]).await.unwrap().unwrap();
    assert_eq!(record.state(), DeliveryState::Published);
    assert!(record.claim.is_none());
}

#[tokio::test]
async fn shutdown_lets_the_running_cycle_finish() {
    let clock = Arc::new(SystemClock);
    let store = Arc::new(InMemoryOutboxStore::new(clock.clone()));
    let broker = Arc::new(InMemoryBroker::with_latency(Duration::from_millis(100)));
    let writer = EventWriter::new(
        store.clone(),
        Arc::new(OutboxConfig::default().routing_table()),
        Arc::new(UlidGenerator::new(SystemClock)),
    );
    let ids = writer.publish_committed(&square(1)).await.unwrap();

    let handle = RelayPoller::new(
        store.clone(),
        broker.clone(),
        clock,
        Arc::new(UlidGenerator::new(SystemClock)),
        OutboxConfig::default().relay_config(),
    )
    .spawn();

    // let the relay get into its first send
    tokio::time::sleep(Duration::from_millis(20)).await;
    tokio::time::timeout(Duration::from_secs(2), handle.shutdown_and_join())
        .await
        .unwrap();

    let record = store.get(ids[0]).await.unwrap().unwrap();
    assert_eq!(record.state(), DeliveryState::Published);
    assert_eq!(broker.deliveries().await.len(), 1);
}
