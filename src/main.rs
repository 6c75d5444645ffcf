use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use object_tiering::{
    clock::SystemClock,
    config::{AppConfig, Command, LockKind, TieringConfig},
    db,
    handlers::AppState,
    logger::AggregateLogger,
    manipulators::ManipulatorContext,
    remote, routes,
    runner::BatchRunner,
    services::{
        InMemoryLockService, LockService, ObjectRegistry, SqliteFileCatalog, SqliteLockService,
        TieredFileSystem,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;
    tracing::info!("Starting object-tiering with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db = Arc::new(
        db::connect(&cfg.database_url, 5)
            .await
            .with_context(|| format!("connecting to {}", cfg.database_url))?,
    );

    if let Command::Migrate = command {
        db::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Initialize core services ---
    let tiering = TieringConfig::from_env()?;
    let registry = ObjectRegistry::new(db.clone());
    let locks: Arc<dyn LockService> = match cfg.lock_kind {
        LockKind::Memory => Arc::new(InMemoryLockService::new()),
        LockKind::Database => Arc::new(SqliteLockService::new(db.clone())),
    };
    let remote = remote::build(&cfg).await.context("opening remote tier")?;
    let fs = Arc::new(
        TieredFileSystem::new(&cfg.local_dir, remote, locks, registry.clone())
            .await
            .context("opening local tier")?
            .with_lock_lease(tiering.lock_lease),
    );

    match command {
        Command::Migrate => Ok(()),
        Command::Run { task } => {
            let ctx = ManipulatorContext {
                registry,
                fs,
                catalog: Arc::new(SqliteFileCatalog::new(db.clone())),
                clock: Arc::new(SystemClock),
                logger: Arc::new(AggregateLogger::new()),
                config: tiering,
            };
            let report = BatchRunner::new(ctx)
                .run(task)
                .await
                .with_context(|| format!("running {}", task))?;
            tracing::info!(
                task = %task,
                processed = report.processed,
                succeeded = report.succeeded,
                failed = report.failed,
                skipped = report.skipped,
                bytes = report.bytes,
                remaining = report.remaining,
                "run complete"
            );
            Ok(())
        }
        Command::Serve { .. } => serve(&cfg, AppState { registry, fs }).await,
    }
}

async fn serve(cfg: &AppConfig, state: AppState) -> Result<()> {
    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
