use sqlx::{postgres::PgPoolOptions, PgPool};

/// Opens the shared PostgreSQL pool
///
/// The bound comes from configuration: each recommendation touches the
/// catalog a handful of times but never holds a connection across the
/// embedding or generative calls, so a modest pool covers bursts.
pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    Ok(pool)
}
