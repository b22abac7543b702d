//! HeroMessaging development monolith: every storage, the in-memory
//! transport, and the resilience layer wired together in one process, with
//! no external broker or database. Useful for exercising the wiring and for
//! local integration testing of application code against a live
//! `HeroMessaging` handle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use hero_core::MessagingBuilder;
use hero_dlq::InMemoryDeadLetterQueue;
use hero_outbox::{InMemoryOutboxStorage, OutboxEntry, OutboxStorage};
use hero_scheduler::{InMemoryScheduledMessageStorage, ScheduledMessage, ScheduledMessageStorage};
use hero_transport::InMemoryTransport;
use tokio::signal;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "hero-dev")]
#[command(about = "HeroMessaging development monolith - every component wired in one binary")]
struct Args {
    /// Path to a hero-config TOML file; falls back to built-in defaults
    /// (plus HERO_-prefixed env overrides) when absent.
    #[arg(long, env = "HERO_CONFIG_PATH")]
    config: Option<String>,

    /// Seeds a sample outbox entry, scheduled message, and queue message at
    /// startup so `start()` has something to process immediately.
    #[arg(long, env = "HERO_DEV_SEED", default_value = "true")]
    seed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    hero_common::logging::init_logging("hero-dev");

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => hero_config::AppConfig::from_file(path)?,
        None => hero_config::AppConfig::load().unwrap_or_default(),
    };
    config.validate()?;

    info!(data_dir = %config.data_dir, "starting HeroMessaging dev monolith");

    let transport = InMemoryTransport::new("dev-transport");
    let messaging = MessagingBuilder::new()
        .with_app_config(&config)
        .with_dlq("dead-letter-queue", Arc::new(InMemoryDeadLetterQueue::new()))?
        .with_outbox_storage("outbox-storage", Arc::new(InMemoryOutboxStorage::new()))?
        .with_scheduled_storage("scheduled-storage", Arc::new(InMemoryScheduledMessageStorage::new()))?
        .with_queue_storage("queue-storage", Arc::new(hero_core::InMemoryQueueStorage::new()))?
        .with_transport("in-memory-transport", transport)?
        .build()?;

    if args.seed {
        seed_sample_work(&messaging).await?;
    }

    messaging.start().await;
    info!("HeroMessaging started, press Ctrl+C to shut down");

    let mut ticker = tokio::time::interval(Duration::from_secs(10));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let health = messaging.overall_health();
                let dlq = messaging.dlq_statistics().await;
                info!(?health, dlq_total = dlq.total_by_status.values().sum::<u64>(), "status tick");
            }
            _ = shutdown_signal() => break,
        }
    }

    info!("shutdown signal received, stopping HeroMessaging");
    messaging.stop().await;
    info!("HeroMessaging dev monolith shut down cleanly");
    Ok(())
}

async fn seed_sample_work(messaging: &hero_core::HeroMessaging) -> Result<()> {
    messaging
        .outbox_storage()
        .add(OutboxEntry::new(
            "orders.created",
            "OrderCreated",
            serde_json::json!({"order_id": 1}),
        ))
        .await?;

    messaging
        .scheduled_storage()
        .schedule(ScheduledMessage::new(
            "reminders",
            "FollowUpReminder",
            serde_json::json!({"order_id": 1}),
            chrono::Utc::now() + chrono::Duration::seconds(5),
            0,
        ))
        .await?;

    messaging.queue_storage().create_queue("dev-queue").await?;
    messaging
        .queue_storage()
        .enqueue("dev-queue", serde_json::json!({"hello": "world"}))
        .await?;

    info!("seeded one outbox entry, one scheduled message, one queued message");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
