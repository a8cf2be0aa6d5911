//! Topicflow Runtime - windowed aggregation of topic samples
//!
//! Wires the aggregation engine to a connection supervisor and runs the
//! single-task service loop until CTRL+C or until the retry budget is spent.
//! By default the supervisor drives an MQTT broker connection. `--simulate`
//! swaps in the in-process loopback transport fed by a synthetic sensor source.
//!
//! Usage:
//!   cargo run --release --bin topicflow -- --interval-minutes 1 --recent 5 --dry-run
//!   cargo run --release --bin topicflow -- --simulate
//!
//! Environment variables:
//!   MQTT_HOST - Broker host (required), MQTT_PORT (default: 1883)
//!   MQTT_USER / MQTT_PASS / MQTT_CLIENT_ID - Session credentials (optional)
//!   SUBSCRIBE_TOPICS - Comma-separated patterns (default: rent/+/+/+/status/banner/0)
//!   INTERVAL_MINUTES / INTERVAL_SECS - Aggregation window (default: 15 minutes)
//!   RECENT_SIZE - History entries per key (default: 96)
//!   REDUCER - avg | min | max | count (default: avg)
//!   DRY_RUN - Log publications instead of sending them (default: false)
//!   SIMULATE - Same as --simulate (default: false)
//!   SIMULATED_DEVICES - Synthetic devices feeding the loopback (default: 3)
//!   SIMULATED_PERIOD_MS - Delay between synthetic samples (default: 1000)

use dotenv::dotenv;
use log::{error, info, warn};
use rand::Rng;
use std::env;
use std::time::Duration;
use topicflow::aggregator_core::AggregationKey;
use topicflow::pipeline::{AggregationEngine, PipelineConfig};
use topicflow::routing::SubscriptionPattern;
use topicflow::transport_core::{
    ConnectionSupervisor, LoopbackHandle, LoopbackTransport, MqttSettings, MqttTransport,
    RuntimeConfig, SupervisorError, SupervisorSettings, Transport,
};

/// Concrete topic for `device` under `pattern`, one synthetic id per wildcard
fn simulated_topic(pattern: &SubscriptionPattern, device: usize) -> Option<String> {
    let key: AggregationKey = (0..pattern.wildcard_count())
        .map(|level| format!("sim{}-{}", level, device))
        .collect();
    pattern.substitute(&key).ok().map(|segments| segments.join("/"))
}

async fn simulated_feed(handle: LoopbackHandle, topics: Vec<String>, period: Duration) {
    info!("🌡️  Simulated feed publishing to {} topic(s)", topics.len());
    let mut timer = tokio::time::interval(period);

    loop {
        timer.tick().await;
        for topic in &topics {
            let (temperature, humidity) = {
                let mut rng = rand::thread_rng();
                (rng.gen_range(18.0..26.0), rng.gen_range(30.0..60.0))
            };
            handle.inject_message(
                topic.clone(),
                format!("{:.1}~C {:.0}%", temperature, humidity),
            );
        }
    }
}

/// Run the supervisor over `transport` until CTRL+C or until it gives up
async fn supervise<T: Transport>(
    transport: T,
    engine: AggregationEngine,
    settings: SupervisorSettings,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut supervisor = ConnectionSupervisor::new(transport, engine, settings);

    let stop = supervisor.stop_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("");
                warn!("⚠️  Received CTRL+C, shutting down...");
                stop.stop();
            }
            Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
        }
    });

    info!("🔄 Press CTRL+C to shutdown gracefully");

    match supervisor.run().await {
        Ok(()) => {
            info!(
                "✅ Runtime stopped ({} publications)",
                supervisor.publications_emitted()
            );
            Ok(())
        }
        Err(SupervisorError::GivenUp(exhausted)) => {
            error!(
                "💀 Giving up: '{}' failed {} times",
                exhausted.operation, exhausted.attempts
            );
            Err(SupervisorError::GivenUp(exhausted).into())
        }
        Err(e) => {
            error!("❌ Supervisor failed: {}", e);
            Err(e.into())
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let mut runtime_config = RuntimeConfig::from_env()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&runtime_config.rust_log),
    )
    .target(env_logger::Target::Stderr)
    .init();

    let args: Vec<String> = env::args().collect();
    let mut pipeline_config = PipelineConfig::from_env()?;
    pipeline_config.apply_args(&args)?;
    if args.iter().any(|a| a == "--dry-run") {
        runtime_config.supervisor.dry_run = true;
    }
    let simulate = args.iter().any(|a| a == "--simulate")
        || env::var("SIMULATE")
            .map(|s| matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

    let aggregator_config = pipeline_config.aggregator_config()?;
    info!("🚀 Topicflow Runtime");
    info!("   ├─ Endpoint: {}", runtime_config.endpoint());
    info!("   ├─ Patterns: {:?}", pipeline_config.subscribe_topics);
    info!(
        "   ├─ Aggregator '{}' every {:?}, recent {} items",
        aggregator_config.reducer().name(),
        aggregator_config.window(),
        aggregator_config.capacity()
    );
    info!("   ├─ Path: {}", aggregator_config.path_descriptor());
    info!("   ├─ Simulated: {}", simulate);
    info!("   └─ Dry run: {}", runtime_config.supervisor.dry_run);

    let engine = AggregationEngine::from_config(&pipeline_config)?;
    let settings = runtime_config.supervisor.clone();

    if !simulate {
        let transport = MqttTransport::new(MqttSettings::from_runtime(&runtime_config));
        return supervise(transport, engine, settings).await;
    }

    let (transport, handle) = LoopbackTransport::new(runtime_config.endpoint());
    let devices: usize = env::var("SIMULATED_DEVICES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(3);
    let period = Duration::from_millis(
        env::var("SIMULATED_PERIOD_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1_000),
    );
    let first_pattern = pipeline_config
        .subscribe_topics
        .first()
        .ok_or("no subscription pattern configured")?;
    let first_pattern = SubscriptionPattern::parse(first_pattern)?;
    let topics: Vec<String> = (0..devices)
        .filter_map(|device| simulated_topic(&first_pattern, device))
        .collect();
    tokio::spawn(simulated_feed(handle, topics, period));

    supervise(transport, engine, settings).await
}
