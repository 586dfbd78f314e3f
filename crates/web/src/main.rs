use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use analysis_bridge_core::{AnalysisEvent, EngineBridge, EngineConfig, Publisher};

mod routes;

const DEFAULT_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_CONFIG_FILE: &str = "bridge.json";

/// Capacity of the event channel. Slow WebSocket clients that fall further
/// behind than this skip ahead to the newest events.
const EVENT_CAPACITY: usize = 256;

/// Publishes bridge events to every connected WebSocket client.
pub struct BroadcastPublisher(broadcast::Sender<AnalysisEvent>);

impl Publisher for BroadcastPublisher {
    fn publish(&self, event: AnalysisEvent) {
        // Err only means nobody is subscribed right now
        let _ = self.0.send(event);
    }
}

pub struct AppState {
    pub bridge: EngineBridge<BroadcastPublisher>,
    pub events: broadcast::Sender<AnalysisEvent>,
}

impl AppState {
    pub fn new(config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            bridge: EngineBridge::new(config, BroadcastPublisher(events.clone())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AnalysisEvent> {
        self.events.subscribe()
    }
}

/// `BRIDGE_CONFIG` (or `bridge.json` when present), then environment
/// overrides.
fn load_config() -> analysis_bridge_core::Result<EngineConfig> {
    let config = match std::env::var("BRIDGE_CONFIG") {
        Ok(path) => EngineConfig::from_file(path)?,
        Err(_) if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            EngineConfig::from_file(DEFAULT_CONFIG_FILE)?
        }
        Err(_) => {
            info!("Config file not found, using defaults");
            EngineConfig::default()
        }
    };
    config.with_env_overrides()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config = load_config()?;
    info!(
        engine = %config.path,
        multipv = config.multipv,
        hash_mb = ?config.hash_mb,
        depth = ?config.depth,
        "Configuration loaded"
    );

    let state = Arc::new(AppState::new(config));
    let app = routes::router(Arc::clone(&state));

    let addr = std::env::var("BRIDGE_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Server running");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let stopped = tokio::task::spawn_blocking(move || state.bridge.stop()).await?;
    if let Err(e) = stopped {
        warn!(error = %e, "Engine did not stop cleanly");
    }
    info!("Server stopped");
    Ok(())
}
