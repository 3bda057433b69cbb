//! Load generator for exercising the dispatcher.
//!
//! Meant to be fed to `runlic` on stdin, e.g.
//! `loadgen 2 5` sleeps two seconds and writes a progress entry, five
//! times over. The entries land in the shared run log, so a run's log
//! shows the interleaving of every concurrent job.

use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use runlic::journal::Journal;

#[derive(Debug, Parser)]
#[command(name = "loadgen", about = "Sleep-and-log load generator")]
struct Args {
    /// Seconds to sleep between entries.
    sleep_secs: u64,

    /// Number of entries to write.
    repeat: u64,

    /// Log to append progress entries to.
    #[arg(long = "logfile", default_value = "loadgen.log")]
    logfile: std::path::PathBuf,
}

fn main() -> anyhow::Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new("loadgen=info")
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let journal = Journal::new(&args.logfile);
    let pid = std::process::id();

    for i in 1..=args.repeat {
        thread::sleep(Duration::from_secs(args.sleep_secs));
        journal
            .append(&format!(" {pid} {i}/{}", args.repeat))
            .context("failed to write progress entry")?;
        tracing::debug!(i, repeat = args.repeat, "progress entry written");
    }

    Ok(())
}
