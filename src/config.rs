use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use crate::{
    errors::{TierError, TierResult},
    manipulators::ManipulatorKind,
    remote::RemoteKind,
};

/// Upper bound on candidates per run; larger batches only hold locks and
/// memory for longer without moving data any faster.
pub const BATCH_SIZE_MAX: u32 = 100_000;

/// Which lock service backs per-object locking.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockKind {
    /// Process-local map. Only safe with a single worker process.
    Memory,
    /// Lock rows in the registry database.
    Database,
}

/// Centralized process configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub local_dir: PathBuf,
    pub remote_kind: RemoteKind,
    pub remote_dir: PathBuf,
    pub lock_kind: LockKind,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Moves content-addressed objects between a local and a remote tier")]
pub struct Args {
    /// Database URL (overrides OBJECTFS_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Root of the local tier (overrides OBJECTFS_LOCAL_DIR)
    #[arg(long)]
    pub local_dir: Option<PathBuf>,

    /// Remote backend (overrides OBJECTFS_REMOTE_KIND)
    #[arg(long, value_enum)]
    pub remote_kind: Option<RemoteKind>,

    /// Root of the filesystem remote backend (overrides OBJECTFS_REMOTE_DIR)
    #[arg(long)]
    pub remote_dir: Option<PathBuf>,

    /// Lock backend (overrides OBJECTFS_LOCK_KIND)
    #[arg(long, value_enum)]
    pub lock_kind: Option<LockKind>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Apply the database schema and exit
    Migrate,
    /// Run one manipulator batch and exit
    Run {
        #[arg(long, value_enum)]
        task: ManipulatorKind,
    },
    /// Serve health probes and object lookups over HTTP
    Serve {
        /// Host to bind to (overrides OBJECTFS_HOST)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (overrides OBJECTFS_PORT)
        #[arg(long)]
        port: Option<u16>,
    },
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command to run.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("OBJECTFS_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("OBJECTFS_PORT", 3000u16)?;
        let env_db = env::var("OBJECTFS_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/objectfs.db".into());
        let env_local =
            env::var("OBJECTFS_LOCAL_DIR").unwrap_or_else(|_| "./data/local".into());
        let env_remote =
            env::var("OBJECTFS_REMOTE_DIR").unwrap_or_else(|_| "./data/remote".into());
        let env_remote_kind = match env::var("OBJECTFS_REMOTE_KIND") {
            Ok(value) => <RemoteKind as ValueEnum>::from_str(&value, true)
                .map_err(|err| anyhow::anyhow!("parsing OBJECTFS_REMOTE_KIND: {}", err))?,
            Err(_) => RemoteKind::Filesystem,
        };
        let env_lock_kind = match env::var("OBJECTFS_LOCK_KIND") {
            Ok(value) => <LockKind as ValueEnum>::from_str(&value, true)
                .map_err(|err| anyhow::anyhow!("parsing OBJECTFS_LOCK_KIND: {}", err))?,
            Err(_) => LockKind::Database,
        };

        let (host, port) = match &args.command {
            Command::Serve { host, port } => (host.clone(), *port),
            _ => (None, None),
        };

        // --- Merge ---
        let cfg = Self {
            host: host.unwrap_or(env_host),
            port: port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            local_dir: args.local_dir.unwrap_or_else(|| env_local.into()),
            remote_kind: args.remote_kind.unwrap_or(env_remote_kind),
            remote_dir: args.remote_dir.unwrap_or_else(|| env_remote.into()),
            lock_kind: args.lock_kind.unwrap_or(env_lock_kind),
        };

        Ok((cfg, args.command))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The live tiering settings, captured once per run.
///
/// Selectors and manipulators receive a clone at construction and never see
/// it change mid-run, so every threshold and deadline check in one pass is
/// made against the same values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TieringConfig {
    /// Objects strictly larger than this are pushed and later have their local
    /// copy deleted; objects at or below it are pulled back.
    pub size_threshold: u64,
    /// Minimum age of the oldest referencing file before a push.
    pub minimum_age: Duration,
    /// How long an object must sit in DUPLICATED before its local copy goes.
    pub consistency_delay: Duration,
    pub batch_size: u32,
    pub max_task_runtime: Duration,
    pub delete_local: bool,
    /// How long an ORPHANED record is kept before it is removed.
    pub orphan_grace_delay: Duration,
    /// Also delete the remote copy when an orphaned record is removed.
    pub delete_external: bool,
    /// Bounded wait for a per-object lock; zero means a single attempt.
    pub lock_wait: Duration,
    /// Lease on database-backed locks, so a crashed worker cannot hold one forever.
    pub lock_lease: Duration,
}

impl Default for TieringConfig {
    fn default() -> Self {
        Self {
            size_threshold: 1024 * 10,
            minimum_age: Duration::from_secs(7 * 24 * 3600),
            consistency_delay: Duration::from_secs(24 * 3600),
            batch_size: 10_000,
            max_task_runtime: Duration::from_secs(60),
            delete_local: false,
            orphan_grace_delay: Duration::from_secs(7 * 24 * 3600),
            delete_external: false,
            lock_wait: Duration::ZERO,
            lock_lease: Duration::from_secs(600),
        }
    }
}

impl TieringConfig {
    /// Read `OBJECTFS_*` overrides on top of the defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let cfg = Self {
            size_threshold: env_parse("OBJECTFS_SIZE_THRESHOLD", defaults.size_threshold)?,
            minimum_age: env_secs("OBJECTFS_MINIMUM_AGE", defaults.minimum_age)?,
            consistency_delay: env_secs("OBJECTFS_CONSISTENCY_DELAY", defaults.consistency_delay)?,
            batch_size: env_parse("OBJECTFS_BATCH_SIZE", defaults.batch_size)?,
            max_task_runtime: env_secs("OBJECTFS_MAX_TASK_RUNTIME", defaults.max_task_runtime)?,
            delete_local: env_parse("OBJECTFS_DELETE_LOCAL", defaults.delete_local)?,
            orphan_grace_delay: env_secs(
                "OBJECTFS_ORPHAN_GRACE_DELAY",
                defaults.orphan_grace_delay,
            )?,
            delete_external: env_parse("OBJECTFS_DELETE_EXTERNAL", defaults.delete_external)?,
            lock_wait: Duration::from_millis(env_parse(
                "OBJECTFS_LOCK_WAIT_MS",
                defaults.lock_wait.as_millis() as u64,
            )?),
            lock_lease: env_secs("OBJECTFS_LOCK_LEASE", defaults.lock_lease)?,
        };
        cfg.validate().context("validating tiering configuration")?;
        Ok(cfg)
    }

    /// Reject settings that would make a run meaningless.
    pub fn validate(&self) -> TierResult<()> {
        if self.batch_size == 0 {
            return Err(TierError::InvalidConfig("batch_size must be at least 1".into()));
        }
        if self.batch_size > BATCH_SIZE_MAX {
            return Err(TierError::InvalidConfig(format!(
                "batch_size must not exceed {}",
                BATCH_SIZE_MAX
            )));
        }
        if self.max_task_runtime.is_zero() {
            return Err(TierError::InvalidConfig(
                "max_task_runtime must be positive".into(),
            ));
        }
        if self.lock_lease <= self.lock_wait {
            return Err(TierError::InvalidConfig(
                "lock_lease must be longer than lock_wait".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("parsing {} value `{}`: {}", name, value, err)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn env_secs(name: &str, default: Duration) -> Result<Duration> {
    env_parse(name, default.as_secs()).map(Duration::from_secs)
}
