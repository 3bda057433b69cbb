//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::lock::LockBackend;
use crate::state::MAX_LICENSES;

pub const DEFAULT_TIMEOUT_SECS: u64 = 100;
pub const DEFAULT_LOGFILE: &str = "runlic.log";
pub const DEFAULT_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Parser)]
#[command(
    name = "runlic",
    about = "Run commands from stdin under a shared license pool",
    args_conflicts_with_subcommands = true
)]
pub struct Args {
    /// Number of licenses in the pool.
    pub licenses: Option<i64>,

    /// Seconds before the run is force-terminated.
    #[arg(short = 't', long = "timeout", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Mutual-exclusion backend for the shared pool.
    #[arg(long = "lock", value_enum, default_value_t = LockBackend::Semaphore)]
    pub lock: LockBackend,

    /// Append-only run log.
    #[arg(long = "logfile", default_value = DEFAULT_LOGFILE)]
    pub logfile: PathBuf,

    /// Milliseconds between license-acquire attempts.
    #[arg(long = "backoff-ms", default_value_t = DEFAULT_BACKOFF_MS, hide = true)]
    pub backoff_ms: u64,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Internal re-exec entry point for per-job workers.
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(Debug, clap::Args)]
pub struct WorkerArgs {
    #[arg(long)]
    pub state: PathBuf,

    #[arg(long)]
    pub sem_name: String,

    #[arg(long)]
    pub logfile: PathBuf,

    #[arg(long, value_enum)]
    pub lock: LockBackend,

    #[arg(long)]
    pub backoff_ms: u64,

    #[arg(long)]
    pub line: String,
}

// The lock engine stays clap-free; its CLI surface is defined here.
impl clap::ValueEnum for LockBackend {
    fn value_variants<'a>() -> &'a [Self] {
        &[LockBackend::Semaphore, LockBackend::Bakery]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(self.as_str()))
    }
}

/// Validate the requested license count. Negative counts are an error;
/// counts above the pool ceiling are clamped with a warning, so a
/// caller asking for more than the hardware supports still gets a run.
pub fn clamp_licenses(requested: i64) -> Result<i32, String> {
    if requested < 0 {
        return Err(format!("license count must be non-negative, got {requested}"));
    }
    if requested > i64::from(MAX_LICENSES) {
        tracing::warn!(requested, max = MAX_LICENSES, "license count clamped to pool ceiling");
        return Ok(MAX_LICENSES);
    }
    Ok(requested as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn defaults_apply() {
        let args = Args::parse_from(["runlic", "4"]);
        assert_eq!(args.licenses, Some(4));
        assert_eq!(args.timeout, DEFAULT_TIMEOUT_SECS);
        assert_eq!(args.lock, LockBackend::Semaphore);
        assert_eq!(args.logfile, PathBuf::from(DEFAULT_LOGFILE));
    }

    #[test]
    fn timeout_override() {
        let args = Args::parse_from(["runlic", "-t", "5", "2"]);
        assert_eq!(args.timeout, 5);
        assert_eq!(args.licenses, Some(2));
    }

    #[test]
    fn lock_backend_names_parse() {
        let args = Args::parse_from(["runlic", "--lock", "semaphore", "1"]);
        assert_eq!(args.lock, LockBackend::Semaphore);
        let args = Args::parse_from(["runlic", "--lock", "bakery", "1"]);
        assert_eq!(args.lock, LockBackend::Bakery);
        assert!(Args::try_parse_from(["runlic", "--lock", "futex", "1"]).is_err());
    }

    #[test]
    fn worker_subcommand_parses() {
        let args = Args::parse_from([
            "runlic", "worker", "--state", "/tmp/s", "--sem-name", "/n", "--logfile", "l",
            "--lock", "bakery", "--backoff-ms", "250", "--line", "/bin/sleep 1",
        ]);
        match args.command {
            Some(Command::Worker(w)) => {
                assert_eq!(w.lock, LockBackend::Bakery);
                assert_eq!(w.backoff_ms, 250);
                assert_eq!(w.line, "/bin/sleep 1");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn clamp_rejects_negative() {
        assert!(clamp_licenses(-1).is_err());
    }

    #[test]
    fn clamp_caps_at_ceiling() {
        assert_eq!(clamp_licenses(25).unwrap(), MAX_LICENSES);
        assert_eq!(clamp_licenses(0).unwrap(), 0);
        assert_eq!(clamp_licenses(20).unwrap(), 20);
    }
}
