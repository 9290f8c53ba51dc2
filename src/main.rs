use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use membership::auth::PgCredentialStore;
use membership::member::{LifecycleEngine, MemberQuery};
use membership::notify::LogNotifier;
use membership::store::postgres::PgMemberStore;
use membership::{api, config, store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("MEMBERSHIP_LOG").unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().json())
        .init();

    let cfg = config::Config::load();

    // Primary store: connect and run migrations
    let pool = store::pool::connect(&cfg.database_url).await?;
    store::bootstrap::seed_reference_data(&pool).await?;

    // Credential store has its own pool, even when it shares the database
    let credential_pool = store::pool::connect_credentials(&cfg.credential_database_url).await?;

    let members: Arc<dyn store::MemberStore> = Arc::new(PgMemberStore::new(pool));
    let credentials = Arc::new(PgCredentialStore::new(credential_pool));

    // First admin on an empty store
    store::bootstrap::run(
        members.as_ref(),
        credentials.as_ref(),
        cfg.admin_seed().as_ref(),
    )
    .await?;

    let engine = LifecycleEngine::new(
        Arc::clone(&members),
        credentials,
        Arc::new(LogNotifier),
        cfg.engine_settings(),
    );
    let state = store::AppState {
        engine: Arc::new(engine),
        query: MemberQuery::new(members),
        config: Arc::new(cfg.clone()),
    };

    let app = api::app(state);

    let addr: SocketAddr = cfg.listen.parse()?;
    tracing::info!(%addr, "starting membership service");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("membership service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
