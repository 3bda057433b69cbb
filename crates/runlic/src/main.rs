use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use runlic::config::{self, Args, Command};
use runlic::dispatcher::{Dispatcher, SelfExecSpawner};
use runlic::lifecycle::ShutdownHandle;
use runlic::session::{Session, SessionPaths};
use runlic::worker::{self, WorkerOptions};

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new("runlic=info")
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let args = Args::parse();

    let outcome = match args.command {
        Some(Command::Worker(w)) => run_worker(w).await,
        None => run_dispatcher(args).await,
    };

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("runlic: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn run_dispatcher(args: Args) -> anyhow::Result<i32> {
    let requested = args
        .licenses
        .context("missing license count (usage: runlic [-t SECS] LICENSES)")?;
    let capacity = config::clamp_licenses(requested).map_err(anyhow::Error::msg)?;

    let paths = SessionPaths::for_run(&args.logfile);
    let session = Session::create(paths.clone(), args.lock)
        .context("failed to set up the shared session")?;
    session
        .locked(move |pool, _| pool.init(capacity))
        .await
        .context("failed to initialize the license pool")?;

    tracing::info!(
        capacity,
        timeout = args.timeout,
        backend = args.lock.as_str(),
        "dispatcher starting"
    );

    let shutdown = ShutdownHandle::install(Some(Duration::from_secs(args.timeout)))
        .context("failed to install signal handlers")?;
    let spawner = SelfExecSpawner::new(paths, args.lock, args.backoff_ms);
    let dispatcher = Dispatcher::new(session, Box::new(spawner), shutdown);

    let code = dispatcher.run().await?;
    Ok(code)
}

async fn run_worker(args: runlic::config::WorkerArgs) -> anyhow::Result<i32> {
    let opts = WorkerOptions {
        paths: SessionPaths {
            state_path: args.state,
            sem_name: args.sem_name,
            log_path: args.logfile,
        },
        backend: args.lock,
        line: args.line,
        backoff: Duration::from_millis(args.backoff_ms),
    };
    // Workers stop on the same signals as the root; the root also
    // sends an explicit SIGTERM to every tracked worker on shutdown.
    let shutdown = ShutdownHandle::install(None).context("failed to install signal handlers")?;
    let code = worker::run(opts, shutdown.token()).await?;
    Ok(code)
}
