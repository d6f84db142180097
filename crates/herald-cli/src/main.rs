use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use herald_core::app::{EventWriter, RelayPoller};
use herald_core::config::OutboxConfig;
use herald_core::domain::OutboxEvent;
use herald_core::impls::{InMemoryBroker, InMemoryOutboxStore};
use herald_core::ports::{Clock, OutboxStore, SystemClock, UlidGenerator};

mod shapes;

use shapes::{Circle, Hello, Pentagon, Square};

/// Write shape events through the outbox and relay them to an in-memory broker.
#[derive(Debug, Parser)]
#[command(name = "herald", version)]
struct Args {
    /// JSON config file. Built-in routes are used when omitted.
    #[arg(long, env = "HERALD_CONFIG")]
    config: Option<PathBuf>,

    /// Number of initial broker sends that fail.
    #[arg(long, default_value_t = 2)]
    broker_failures: usize,

    /// Give up waiting for delivery after this many seconds.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => OutboxConfig::from_path(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => OutboxConfig::default(),
    };

    // (A) store / broker / writer を用意
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(InMemoryOutboxStore::new(clock.clone()));
    let broker = Arc::new(InMemoryBroker::new());
    broker.fail_next(args.broker_failures).await;
    let ids = Arc::new(UlidGenerator::new(SystemClock));
    let writer = EventWriter::new(store.clone(), Arc::new(config.routing_table()), ids.clone());

    // (B) relay を起動
    let relay = RelayPoller::new(
        store.clone(),
        broker.clone(),
        clock,
        ids,
        config.relay_config(),
    );
    info!(relay_id = %relay.id(), "starting relay");
    let handle = relay.spawn();

    // (C) 業務状態の変更と一緒に event を書く
    write_with_state(&store, &writer, "greeting", &Hello::now()).await?;
    write_with_state(&store, &writer, "shapes/square", &Square::now()).await?;
    write_with_state(&store, &writer, "shapes/circle", &Circle::now()).await?;
    write_with_state(&store, &writer, "shapes/pentagon", &Pentagon::now()).await?;

    // (D) 全件配送されるか Ctrl-C まで待つ
    let drained = tokio::select! {
        res = tokio::time::timeout(Duration::from_secs(args.timeout_secs), wait_until_drained(&store)) => res.is_ok(),
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            false
        }
    };

    handle.shutdown_and_join().await;

    let counts = store.counts().await?;
    println!(
        "total={} pending={} published={} failed_permanent={}",
        counts.total(),
        counts.pending,
        counts.published,
        counts.failed_permanent
    );
    for delivery in broker.deliveries().await {
        println!(
            "{} {} {}",
            delivery.exchange,
            delivery.routing_key,
            delivery.payload.as_str().unwrap_or("<binary>")
        );
    }

    if !drained {
        bail!("{} outbox records still pending", counts.pending);
    }
    Ok(())
}

async fn write_with_state<E: OutboxEvent>(
    store: &InMemoryOutboxStore,
    writer: &EventWriter,
    key: &str,
    event: &E,
) -> Result<()> {
    let mut tx = store.begin_local();
    tx.put_state(key, serde_json::to_value(event)?);
    let ids = writer
        .publish(&mut tx, event)
        .await
        .with_context(|| format!("writing {} event", E::EVENT_TYPE))?;
    tx.commit().await?;
    info!(event_type = E::EVENT_TYPE, records = ids.len(), "event committed");
    Ok(())
}

async fn wait_until_drained(store: &InMemoryOutboxStore) {
    loop {
        match store.counts().await {
            Ok(counts) if counts.pending == 0 => return,
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to read outbox counts"),
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
