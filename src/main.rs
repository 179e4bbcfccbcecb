use std::net::SocketAddr;
use std::sync::Arc;
use triage_flow::config::{self, CacheBackend};
use triage_flow::engine::{EngineSettings, RecommendationEngine};
use triage_flow::occupancy::{
    CameraOccupancySource, CountMode, HttpCameraFetcher, VisionCounter,
};
use triage_flow::routing::{GoogleRoutingClient, RoutingProvider};
use triage_flow::state::AppState;
use triage_flow::store::{EstimateStore, MemoryStore, PostgrestStore};
use triage_flow::{api, state};

fn init_tracing() {
    let subscriber = tracing_subscriber::fmt().with_target(false).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    tracing::info!(
        config_path = config::DEFAULT_CONFIG_PATH,
        "triage-flow starting"
    );
    let config = config::load_default()?;

    // One connection pool shared by every outbound collaborator.
    let client = reqwest::Client::new();

    let (store, backend): (Arc<dyn EstimateStore>, &'static str) = match config.cache_backend() {
        CacheBackend::Postgrest => match config.postgrest() {
            Some(section) => {
                tracing::info!(base_url = %section.base_url, "Using durable estimate store");
                (
                    Arc::new(PostgrestStore::new(
                        client.clone(),
                        &section.base_url,
                        section.api_key.clone(),
                        section
                            .table
                            .as_deref()
                            .unwrap_or(config::DEFAULT_POSTGREST_TABLE),
                    )),
                    "postgrest",
                )
            }
            None => {
                tracing::warn!(
                    "Cache backend is postgrest but [cache.postgrest] is missing, using memory"
                );
                (Arc::new(MemoryStore::new()), "memory")
            }
        },
        CacheBackend::Memory => (Arc::new(MemoryStore::new()), "memory"),
    };

    let vision_api_key = config.vision_api_key();
    if vision_api_key.is_none() {
        tracing::warn!("No vision API key configured, counting falls back to the seeded heuristic");
    }
    let counter = Arc::new(VisionCounter::new(
        client.clone(),
        &config.vision_endpoint(),
        &config.vision_model(),
        vision_api_key,
    ));
    let fetcher = Arc::new(HttpCameraFetcher::new(
        client.clone(),
        config.fetch_timeout(),
        config.min_image_bytes(),
    ));
    let mode = if config.vision_strict() {
        CountMode::Strict
    } else {
        CountMode::Heuristic
    };
    let source = Arc::new(CameraOccupancySource::new(
        fetcher,
        counter,
        mode,
        config.camera_parallel(),
    ));

    let engine = Arc::new(RecommendationEngine::new(
        Arc::clone(&store),
        Arc::clone(&source),
        EngineSettings::from_config(&config),
        config.rng_seed(),
    ));

    let routing: Option<Arc<dyn RoutingProvider>> = match config.routing_api_key() {
        Some(api_key) => Some(Arc::new(GoogleRoutingClient::new(
            client,
            api_key,
            &config.places_url(),
            &config.routes_url(),
        ))),
        None => {
            tracing::warn!("No routing API key configured, /recommend will answer 502");
            None
        }
    };

    let state = Arc::new(state::AppState::new(
        store,
        source,
        engine,
        routing,
        config.default_limit(),
        config.max_candidates(),
        config.radius_m(),
        backend,
    ));

    serve(state, config.server_port()).await
}

async fn serve(state: Arc<AppState>, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let app = api::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
