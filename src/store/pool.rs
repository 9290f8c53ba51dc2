use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Connect to the member store and apply pending migrations.
#[tracing::instrument(skip(url), err)]
pub async fn connect(url: &str) -> anyhow::Result<PgPool> {
    let pool = open(url, 10).await?;

    sqlx::migrate!().run(&pool).await?;
    tracing::info!("migrations applied");

    Ok(pool)
}

/// Connect without migrating. Used for the credential store, which may live
/// in a database this service does not own.
#[tracing::instrument(skip(url), err)]
pub async fn connect_credentials(url: &str) -> anyhow::Result<PgPool> {
    open(url, 4).await
}

async fn open(url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?;

    tracing::info!(max_connections, "connected to postgres");
    Ok(pool)
}
