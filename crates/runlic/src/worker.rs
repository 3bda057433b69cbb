//! Per-job worker process.
//!
//! Spawned by the dispatcher for every input line. The worker attaches
//! the session, blocks for a license (non-blocking check under the
//! critical section, fixed backoff between attempts), runs the command
//! as its own child, and unconditionally returns the license before it
//! exits — including when the spawn itself fails, since a leaked
//! license would shrink the pool for the rest of the run.

use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::lock::LockBackend;
use crate::session::{Session, SessionError, SessionPaths};

/// Sleep between license-acquire attempts.
pub const ACQUIRE_BACKOFF: Duration = Duration::from_secs(1);

/// Executable plus at most two arguments.
pub const MAX_COMMAND_TOKENS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("empty command line")]
    EmptyCommand,
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub paths: SessionPaths,
    pub backend: LockBackend,
    pub line: String,
    pub backoff: Duration,
}

/// Split a command line into executable and arguments. Whitespace
/// tokens only, hard 3-token limit: extra tokens are dropped with a
/// warning, matching the dispatcher's contract of "command plus up to
/// two arguments", not shell parsing.
pub fn parse_command(line: &str) -> Result<(String, Vec<String>), WorkerError> {
    let mut tokens = line.split_whitespace();
    let command = tokens.next().ok_or(WorkerError::EmptyCommand)?.to_string();
    let args: Vec<String> = tokens
        .by_ref()
        .take(MAX_COMMAND_TOKENS - 1)
        .map(str::to_string)
        .collect();
    if tokens.next().is_some() {
        tracing::warn!(command = %line, max = MAX_COMMAND_TOKENS, "extra tokens ignored");
    }
    Ok((command, args))
}

/// Run one job to completion. Returns the worker's exit code: the
/// command child's status when it ran, nonzero otherwise.
pub async fn run(opts: WorkerOptions, shutdown: CancellationToken) -> Result<i32, WorkerError> {
    let session = Session::attach(opts.paths, opts.backend)?;
    let (command, args) = parse_command(&opts.line)?;

    // Blocking wait for availability, built from a non-blocking check
    // and retry. Admission across waiting workers is unordered.
    loop {
        let admitted = session.locked(|pool, _| pool.try_acquire()).await?;
        if admitted {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(opts.backoff) => {}
            _ = shutdown.cancelled() => {
                // No license held yet; nothing to return.
                tracing::warn!(command = %command, "terminated while awaiting a license");
                return Ok(1);
            }
        }
    }

    let pid = std::process::id();
    tracing::info!(command = %command, "license acquired");
    journal(&session, format!(" - started {pid} {command}")).await;

    let mut child = match Command::new(&command).args(&args).spawn() {
        Ok(child) => child,
        Err(e) => {
            // Spawn failure abandons the job but must not leak the
            // license.
            tracing::error!(command = %command, error = %e, "failed to spawn command");
            release(&session).await?;
            journal(&session, format!(" - failed {pid} {command}")).await;
            return Ok(1);
        }
    };

    let code = tokio::select! {
        status = child.wait() => match status {
            Ok(s) => s.code().unwrap_or(1),
            Err(e) => {
                tracing::error!(command = %command, error = %e, "failed to wait for command");
                1
            }
        },
        _ = shutdown.cancelled() => {
            tracing::warn!(command = %command, "terminated mid-run; killing command child");
            let _ = child.start_kill();
            let _ = child.wait().await;
            release(&session).await?;
            return Ok(1);
        }
    };

    // Release and the completion entry travel under one section.
    session
        .locked(move |pool, journal| {
            pool.release();
            if let Err(e) = journal.append(&format!(" - finished {pid} (status {code})")) {
                tracing::warn!(error = %e, "failed to write journal entry");
            }
        })
        .await?;

    Ok(code)
}

async fn release(session: &Arc<Session>) -> Result<(), SessionError> {
    session
        .locked(|pool, _| {
            pool.release();
        })
        .await
}

async fn journal(session: &Arc<Session>, message: String) {
    let outcome = session
        .locked(move |_pool, journal| journal.append(&message))
        .await;
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "failed to write journal entry"),
        Err(e) => tracing::error!(error = %e, "critical section failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_and_args() {
        let (cmd, args) = parse_command("/bin/sleep 2").unwrap();
        assert_eq!(cmd, "/bin/sleep");
        assert_eq!(args, vec!["2"]);
    }

    #[test]
    fn parses_bare_command() {
        let (cmd, args) = parse_command("/bin/true").unwrap();
        assert_eq!(cmd, "/bin/true");
        assert!(args.is_empty());
    }

    #[test]
    fn extra_tokens_are_dropped() {
        let (cmd, args) = parse_command("/bin/echo a b c d").unwrap();
        assert_eq!(cmd, "/bin/echo");
        assert_eq!(args, vec!["a", "b"]);
    }

    #[test]
    fn empty_line_is_an_error() {
        assert!(matches!(parse_command("   "), Err(WorkerError::EmptyCommand)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn spawn_failure_returns_the_license() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SessionPaths {
            state_path: dir.path().join("seg"),
            sem_name: format!("/runlic-test-worker-{}", std::process::id()),
            log_path: dir.path().join("run.log"),
        };

        let root = Session::create(paths.clone(), LockBackend::Semaphore).unwrap();
        root.locked(|pool, _| pool.init(1)).await.unwrap();

        let opts = WorkerOptions {
            paths,
            backend: LockBackend::Semaphore,
            line: "/definitely/not/a/real/binary".to_string(),
            backoff: Duration::from_millis(50),
        };
        let code = run(opts, CancellationToken::new()).await.unwrap();
        assert_ne!(code, 0);

        // The license came back despite the failed spawn.
        let available = root.locked(|pool, _| pool.available()).await.unwrap();
        assert_eq!(available, 1);
        root.teardown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn successful_job_releases_and_reports_status() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SessionPaths {
            state_path: dir.path().join("seg"),
            sem_name: format!("/runlic-test-worker-ok-{}", std::process::id()),
            log_path: dir.path().join("run.log"),
        };

        let root = Session::create(paths.clone(), LockBackend::Semaphore).unwrap();
        root.locked(|pool, _| pool.init(1)).await.unwrap();

        let opts = WorkerOptions {
            paths,
            backend: LockBackend::Semaphore,
            line: "/bin/true".to_string(),
            backoff: Duration::from_millis(50),
        };
        let code = run(opts, CancellationToken::new()).await.unwrap();
        assert_eq!(code, 0);

        let available = root.locked(|pool, _| pool.available()).await.unwrap();
        assert_eq!(available, 1);

        let log = std::fs::read_to_string(root.journal().path()).unwrap();
        assert!(log.contains(" - started "));
        assert!(log.contains(" - finished "));
        root.teardown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancellation_while_waiting_leaves_pool_alone() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SessionPaths {
            state_path: dir.path().join("seg"),
            sem_name: format!("/runlic-test-worker-cancel-{}", std::process::id()),
            log_path: dir.path().join("run.log"),
        };

        let root = Session::create(paths.clone(), LockBackend::Semaphore).unwrap();
        // Empty pool: the worker will sit in the retry loop.
        root.locked(|pool, _| pool.init(0)).await.unwrap();

        let token = CancellationToken::new();
        let opts = WorkerOptions {
            paths,
            backend: LockBackend::Semaphore,
            line: "/bin/true".to_string(),
            backoff: Duration::from_millis(50),
        };

        let worker = tokio::spawn(run(opts, token.clone()));
        tokio::time::sleep(Duration::from_millis(120)).await;
        token.cancel();

        let code = worker.await.unwrap().unwrap();
        assert_ne!(code, 0);

        let available = root.locked(|pool, _| pool.available()).await.unwrap();
        assert_eq!(available, 0);
        root.teardown();
    }
}
