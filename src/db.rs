//! SQLite pool setup and the embedded schema migration.

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{path::Path, str::FromStr, time::Duration};
use tracing::{debug, info};

use crate::errors::TierResult;

const INIT_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Open a pool against `database_url`, creating the file (and its parent
/// directory) when it does not exist yet.
pub async fn connect(database_url: &str, max_connections: u32) -> TierResult<SqlitePool> {
    let db_path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    debug!("Interpreted SQLite path => {}", db_path);

    if !db_path.starts_with(":memory:") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                info!("Created missing directory {:?}", parent);
            }
        }
    }

    let opts = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(opts)
        .await?;
    Ok(pool)
}

/// A private in-memory database with the schema applied.
///
/// Every connection to `sqlite::memory:` sees its own database, so the pool
/// is pinned to a single connection that is never recycled.
pub async fn connect_in_memory() -> TierResult<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Run the embedded schema statement by statement. Idempotent.
pub async fn run_migrations(db: &SqlitePool) -> TierResult<()> {
    let statements = split_statements(INIT_SQL);

    info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(&stmt).execute(db).await?;
    }

    Ok(())
}

/// Comments are dropped before splitting on `;`, so a `;` inside a comment
/// never ends a statement.
fn split_statements(sql: &str) -> Vec<String> {
    strip_comments(sql)
        .split(';')
        .map(|stmt| stmt.trim().to_string())
        .filter(|stmt| !stmt.is_empty())
        .collect()
}

fn strip_comments(sql: &str) -> String {
    sql.lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
