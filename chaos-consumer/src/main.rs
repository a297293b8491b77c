use std::sync::Arc;

use anyhow::{Context, Result};
use envconfig::Envconfig;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use chaos_common::metrics::{serve, setup_metrics_recorder, with_metrics_routes};
use chaos_consumer::api;
use chaos_consumer::config::Config;
use chaos_consumer::consumer::ConsumptionLoop;
use chaos_consumer::control::ControlService;
use chaos_consumer::counters::RuntimeCounters;
use chaos_consumer::fault::{FaultConfig, FaultInjector};
use chaos_consumer::kafka::config::ConsumerConfigBuilder;
use chaos_consumer::kafka::container::{ContainerSettings, KafkaListenerContainer};
use chaos_consumer::lifecycle::{LifecycleManager, SharedLifecycleState};
use chaos_consumer::rebalance::PauseAwareRebalanceCoordinator;
use chaos_consumer::shutdown::ShutdownSignal;

fn init_logging() {
    let log_layer = fmt::layer().json().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = Config::init_from_env().context("Invalid configuration")?;
    info!(
        topic = %config.kafka_consumer_topic,
        group_id = %config.kafka_consumer_group,
        concurrency = config.consumer_concurrency,
        "Starting chaos consumer"
    );

    // Every component below reports metrics from construction onwards.
    let metrics_handle = if config.export_prometheus {
        Some(setup_metrics_recorder().context("Failed to install metrics recorder")?)
    } else {
        None
    };

    let state = SharedLifecycleState::new(config.initial_lifecycle_state());
    let counters = Arc::new(RuntimeCounters::new());
    let faults = Arc::new(FaultConfig::new(config.fault_settings()));
    let shutdown = ShutdownSignal::new();

    let consumption = ConsumptionLoop::new(
        config.kafka_consumer_group.clone(),
        state.clone(),
        FaultInjector::new(
            faults.clone(),
            shutdown.clone(),
            config.poll_timeout_exceed_block(),
        ),
        counters.clone(),
    );
    let coordinator = Arc::new(PauseAwareRebalanceCoordinator::new(
        state.clone(),
        counters.clone(),
    ));

    let container = Arc::new(
        KafkaListenerContainer::start(
            &ConsumerConfigBuilder::from_config(&config).build(),
            ContainerSettings {
                topic: config.kafka_consumer_topic.clone(),
                concurrency: config.consumer_concurrency,
                poll_timeout: config.consumer_poll_timeout.0,
                group_instance_id: config.kafka_group_instance_id.clone(),
            },
            coordinator,
            consumption,
            shutdown.clone(),
        )
        .context("Failed to start kafka listener container")?,
    );

    let lifecycle = Arc::new(LifecycleManager::new(state, container.clone()));
    lifecycle.apply_initial_state();

    let mut router = api::router(ControlService::new(lifecycle, faults, counters));
    if let Some(handle) = metrics_handle {
        router = with_metrics_routes(router, handle);
    }

    let mut term = signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut interrupt =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
    let served = serve(router, &config.bind(), async move {
        tokio::select! {
            _ = term.recv() => {},
            _ = interrupt.recv() => {},
        };
        info!("Shutting down gracefully...");
    })
    .await;

    // Interrupts fault delays in flight, so consumer threads exit promptly.
    shutdown.trigger();
    tokio::task::spawn_blocking(move || container.stop())
        .await
        .context("Failed to join consumer threads")?;

    served.context("Control server failed")
}
