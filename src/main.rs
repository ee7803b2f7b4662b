//! HealthQuest server.
//!
//! # API Endpoints
//!
//! - `POST /owners/{id}/samples` - Log a metric value
//! - `GET|PUT /owners/{id}/goals` - List or save goals
//! - `GET /owners/{id}/goals/progress` - Goal progress in the current period
//! - `GET /owners/{id}/challenges/{challenge_id}` - Challenge progress
//! - `POST /owners/{id}/rewards/{reward_id}/claim` - Spend points
//! - `GET /leaderboard/{metric}` - Metric leaderboard
//! - `GET /health` - Health check
//!
//! See [`healthquest::api`] for the full list.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use healthquest::api::{AppState, router};
use healthquest::clock::SystemClock;
use healthquest::config::Config;
use healthquest::storage::Storage;
use healthquest::tracker::{Tracker, TrackerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("healthquest=info".parse()?))
        .init();

    let config = Config::from_env()?;
    info!(
        port = config.port,
        db_url = %config.database_url,
        zone = ?config.zone,
        "Starting HealthQuest server"
    );

    let storage = Storage::new(&config.database_url).await?;
    info!("Database initialized");

    let mut tracker_config = TrackerConfig::standard(config.zone)?;
    tracker_config.leaderboard_size = config.leaderboard_size;
    let tracker = Tracker::new(storage, tracker_config, Arc::new(SystemClock));

    let seeded = tracker.seed_challenges().await?;
    info!(challenges = seeded, "Challenge catalogue seeded");

    let app = router(AppState { tracker })
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "HealthQuest is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
