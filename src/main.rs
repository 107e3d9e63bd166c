//! camfleet - camera node / central server entry point

use camfleet::{
    capture_device::{probe_camera, LibcameraDevice},
    capture_orchestrator::CaptureOrchestrator,
    metrics::SysinfoMetrics,
    node_client::HttpNodeClient,
    node_registry::NodeRegistry,
    node_store::NodeStore,
    preview_relay::PreviewRelay,
    preview_source::{LibcameraPreview, PreviewPublisher},
    set_aggregator::{SetAggregator, SetRepository},
    state::{CentralAppState, CentralConfig, NodeAppState, NodeConfig},
    web_api,
};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CAMERA_LIST_BINARY: &str = "libcamera-still";

#[derive(Debug, Parser)]
#[command(name = "camfleet", version, about = "Camera fleet capture coordinator")]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Debug, Subcommand)]
enum Role {
    /// Run a camera node (capture + local store + preview publisher)
    Node {
        /// Overrides PORT
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the central server (fan-out capture, gallery, preview relay)
    Central {
        /// Overrides PORT
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camfleet=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    tracing::info!("Starting camfleet v{}", env!("CARGO_PKG_VERSION"));

    match cli.role {
        Role::Node { port } => run_node(port).await,
        Role::Central { port } => run_central(port).await,
    }
}

async fn run_node(port: Option<u16>) -> anyhow::Result<()> {
    let mut config = NodeConfig::default();
    if let Some(port) = port {
        config.port = port;
    }
    tracing::info!(
        node_id = %config.node_id,
        capture_dir = %config.capture_dir.display(),
        storage_limit_mb = config.storage_limit_mb,
        resolution = %config.default_resolution,
        "Node configuration loaded"
    );

    let camera = if config.skip_camera_check {
        tracing::warn!("Camera check skipped");
        None
    } else {
        Some(probe_camera(CAMERA_LIST_BINARY).await?)
    };

    let mut device = LibcameraDevice::new(config.capture_timeout);
    if let Some(info) = camera {
        tracing::info!(
            model = %info.model,
            sensor_width = info.width,
            sensor_height = info.height,
            bayer = %info.bayer,
            "Camera detected"
        );
        device = device.with_camera(info);
        if config.extract_red_channel {
            tracing::info!("Red-channel extraction enabled");
            device = device.with_red_channel();
        }
    } else if config.extract_red_channel {
        tracing::warn!("Red-channel extraction needs the camera check, disabled");
    }

    let store = Arc::new(NodeStore::open(config.store_config(), Arc::new(device)).await?);
    tracing::info!("NodeStore initialized");

    let preview = Arc::new(PreviewPublisher::new(
        Arc::new(LibcameraPreview::new()),
        config.preview_resolution,
        config.preview_framerate,
    )?);

    let config = Arc::new(config);
    let state = NodeAppState {
        config: config.clone(),
        store,
        metrics: Arc::new(SysinfoMetrics::new()),
        preview: preview.clone(),
    };

    let app = web_api::create_node_router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Node listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    preview.stop().await;
    tracing::info!("Node stopped");
    Ok(())
}

async fn run_central(port: Option<u16>) -> anyhow::Result<()> {
    let mut config = CentralConfig::default();
    if let Some(port) = port {
        config.port = port;
    }
    tracing::info!(
        nodes = config.nodes.len(),
        database_url = %config.database_url,
        fanout_timeout_ms = config.fanout_timeout.as_millis() as u64,
        "Central configuration loaded"
    );

    let repository = SetRepository::connect(&config.database_url).await?;
    let aggregator = Arc::new(SetAggregator::open(repository.clone(), config.max_sets).await?);
    tracing::info!("SetAggregator initialized");

    let registry = Arc::new(NodeRegistry::new(config.unreachable_threshold));
    for node in &config.nodes {
        registry.register(&node.node_id, &node.address).await?;
    }

    let client = Arc::new(HttpNodeClient::new(
        config.node_connect_timeout,
        config.node_request_timeout,
    )?);

    let orchestrator = Arc::new(
        CaptureOrchestrator::new(registry, client, aggregator, config.orchestrator_config())
            .resume_sessions()
            .await,
    );
    orchestrator.start_health_probe().await;

    let relay = PreviewRelay::new(config.preview_queue_capacity);
    let config = Arc::new(config);
    let state = CentralAppState {
        config: config.clone(),
        orchestrator: orchestrator.clone(),
        relay: relay.clone(),
    };

    let app = web_api::create_central_router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Central listening on {}", addr);

    // Live preview connections would hold graceful shutdown open
    let relay_on_shutdown = relay.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            relay_on_shutdown.detach_publisher("central shutting down");
            relay_on_shutdown.close();
        })
        .await?;

    orchestrator.stop_health_probe().await;
    repository.close().await;
    tracing::info!("Central stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
