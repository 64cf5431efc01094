mod configuration;
mod error;
mod routes;
mod state;

use std::sync::Arc;

use structbert::auth::{MemoryUserStore, UserStore};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::configuration::Settings;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for logging, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::new()?;
    let addr = settings.server.socket_addr()?;

    let users: Arc<dyn UserStore> = match &settings.auth.users_file {
        Some(path) => Arc::new(MemoryUserStore::from_file(path).await?),
        None => Arc::new(MemoryUserStore::new()),
    };

    info!(
        provider = %settings.provider.provider_type(),
        max_steps = settings.agent.max_steps,
        "starting structbertd"
    );
    let state = AppState::new(settings.provider.into_config(), users)
        .with_agent_config(settings.agent.into_config());

    // Create router with CORS support
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::configure(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
