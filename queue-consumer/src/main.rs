//! Poll a queue proxy for records and dispatch them until told to stop.

use std::future::ready;
use std::sync::Arc;

use axum::{routing::get, Router};
use envconfig::Envconfig;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use health::HealthRegistry;
use queue_consumer::config::Config;
use queue_consumer::consumer::LoggingDispatcher;
use queue_consumer::health::PassiveConsumerCheck;
use queue_consumer::proxy::HttpProxyGateway;
use queue_consumer::supervisor::StreamSupervisor;

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

async fn index() -> &'static str {
    "queue-consumer"
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    setup_tracing();
    info!("starting queue consumer");

    let config = Config::init_from_env()?;
    let settings = config.stream_settings();

    info!(
        proxy = config.queue_proxy_url,
        group = config.group_name,
        topic = config.topic,
        streams = settings.stream_count,
        auto_commit = settings.auto_commit,
        "configuration loaded"
    );

    let gateway = Arc::new(HttpProxyGateway::new(&config)?);
    let liveness = HealthRegistry::new("liveness");

    // Health and metrics server
    let readiness = PassiveConsumerCheck::new(gateway.clone());
    let registry = liveness.clone();
    let recorder_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(move || ready(readiness.check())))
        .route("/_liveness", get(move || ready(registry.get_status())))
        .route("/metrics", get(move || ready(recorder_handle.render())));

    let bind = config.bind();
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(&bind)
            .await
            .expect("failed to bind health server");
        axum::serve(listener, router)
            .await
            .expect("health server failed");
    });

    let supervisor = StreamSupervisor::new(
        gateway,
        Arc::new(LoggingDispatcher),
        settings,
        liveness,
    );
    supervisor.start();

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    supervisor.stop().await?;
    info!("queue consumer shut down");
    Ok(())
}
