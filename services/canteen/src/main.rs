use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use canteen::{
    AppState, Settings, Stores,
    config::DEV_SECRET,
    repositories::run_migrations,
    routes,
};
use common::database::{DatabaseConfig, health_check, init_pool};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting canteen service");

    let settings = Settings::load()?;
    if settings.session.secret == DEV_SECRET {
        warn!("Using the development session secret; set CANTEEN__SESSION__SECRET");
    }
    info!(
        "Policy: timezone {}, window -{}/+{} min, lock {}h, week starts {}",
        settings.policy.timezone,
        settings.policy.window_before_minutes,
        settings.policy.window_after_minutes,
        settings.policy.lock_hours,
        settings.policy.week_start
    );

    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    // Check database connectivity
    if health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    run_migrations(&pool).await?;
    info!("Database migrations applied");

    let listen = settings.server.listen.clone();
    let state = AppState::new(settings, Stores::postgres(pool));
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!("Canteen service listening on {}", listen);

    axum::serve(listener, app).await?;

    Ok(())
}
