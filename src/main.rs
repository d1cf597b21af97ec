use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newsdesk::config::Config;
use newsdesk::desk::{start_background_refresh, NewsDesk};
use newsdesk::pipeline::Pipeline;
use newsdesk::routes::{self, AppState};
use newsdesk::store::{ReaderState, SqliteStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newsdesk=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("NEWSDESK_CONFIG").unwrap_or_else(|_| "newsdesk.toml".to_string());
    let config = Config::load(&config_path)?;
    info!(
        "Loaded configuration from {} ({} inline categories)",
        config_path,
        config.categories.len()
    );

    // Reader state
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:newsdesk.db?mode=rwc".to_string());
    let store = SqliteStore::new(&database_url).await?;
    store.initialize().await?;
    let reader = ReaderState::new(Arc::new(store));
    info!("Database initialized");

    // Pipeline and the desk that owns its output
    let pipeline = Pipeline::from_config(&config)?;
    let client = pipeline.client().clone();
    let (desk, image_updates) = NewsDesk::new(pipeline, config.registry());
    let desk = Arc::new(desk);

    tokio::spawn(desk.clone().run_image_updates(image_updates));

    // Start background refresh task
    let bg_desk = desk.clone();
    let refresh_interval = config.refresh_interval;
    tokio::spawn(async move {
        start_background_refresh(bg_desk, refresh_interval).await;
    });

    let state = Arc::new(AppState {
        desk,
        reader,
        client,
        relay_private_targets: config.server.relay_private_targets,
    });
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!("Server starting on http://{}", config.server.bind);

    axum::serve(listener, app).await?;

    Ok(())
}
