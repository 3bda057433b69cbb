//! Root dispatch loop.
//!
//! Reads one command line at a time from stdin and hands each to a
//! fresh worker process; the worker does its own license acquisition
//! and release. The root's reap sweep is bookkeeping only. On end of
//! input it waits for every outstanding worker, journals the
//! termination line, and tears the session down; a shutdown trigger
//! diverts to the same termination path early, with an explicit kill
//! broadcast to the tracked workers in place of process-group
//! signalling.

use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::lifecycle::{ShutdownHandle, ShutdownReason};
use crate::lock::LockBackend;
use crate::session::{Session, SessionError, SessionPaths};

/// Input lines are bounded; anything longer is truncated at the bound.
pub const MAX_LINE: usize = 150;

/// How long the kill broadcast waits for a worker to exit before
/// escalating to SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to read input: {0}")]
    Input(#[from] std::io::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Extension point for how per-job worker processes are spawned.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self, line: &str) -> std::io::Result<Child>;
}

/// Re-execs the current binary with the hidden `worker` subcommand,
/// carrying the session paths so the worker can re-attach.
pub struct SelfExecSpawner {
    paths: SessionPaths,
    backend: LockBackend,
    backoff_ms: u64,
}

impl SelfExecSpawner {
    pub fn new(paths: SessionPaths, backend: LockBackend, backoff_ms: u64) -> Self {
        Self {
            paths,
            backend,
            backoff_ms,
        }
    }
}

impl WorkerSpawner for SelfExecSpawner {
    fn spawn(&self, line: &str) -> std::io::Result<Child> {
        let exe = std::env::current_exe()?;
        Command::new(exe)
            .arg("worker")
            .arg("--state")
            .arg(&self.paths.state_path)
            .arg("--sem-name")
            .arg(&self.paths.sem_name)
            .arg("--logfile")
            .arg(&self.paths.log_path)
            .arg("--lock")
            .arg(self.backend.as_str())
            .arg("--backoff-ms")
            .arg(self.backoff_ms.to_string())
            .arg("--line")
            .arg(line)
            .kill_on_drop(true)
            .spawn()
    }
}

struct JobHandle {
    pid: u32,
    line: String,
    child: Child,
}

pub struct Dispatcher {
    session: Arc<Session>,
    spawner: Box<dyn WorkerSpawner>,
    shutdown: ShutdownHandle,
    jobs: Vec<JobHandle>,
}

impl Dispatcher {
    pub fn new(
        session: Arc<Session>,
        spawner: Box<dyn WorkerSpawner>,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            session,
            spawner,
            shutdown,
            jobs: Vec::new(),
        }
    }

    /// Run to completion. Returns the process exit code: 0 after a
    /// clean end-of-input drain, nonzero after a shutdown trigger.
    pub async fn run(mut self) -> Result<i32, DispatchError> {
        let token = self.shutdown.token();
        let mut input = BufReader::new(tokio::io::stdin());

        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(self.terminate().await),
                line = read_line_bounded(&mut input) => match line? {
                    None => break,
                    Some(raw) => {
                        let line = raw.trim();
                        if line.is_empty() {
                            continue;
                        }
                        self.submit(line);
                        self.reap_finished();
                    }
                },
            }
        }

        tracing::info!(outstanding = self.jobs.len(), "input exhausted; draining workers");
        while let Some(mut job) = self.jobs.pop() {
            tokio::select! {
                _ = token.cancelled() => {
                    self.jobs.push(job);
                    return Ok(self.terminate().await);
                }
                status = job.child.wait() => match status {
                    Ok(s) => tracing::info!(
                        pid = job.pid,
                        status = s.code().unwrap_or(-1),
                        command = %job.line,
                        "worker finished"
                    ),
                    Err(e) => tracing::warn!(pid = job.pid, error = %e, "failed to wait for worker"),
                },
            }
        }

        self.journal_termination().await;
        self.session.teardown();
        Ok(0)
    }

    fn submit(&mut self, line: &str) {
        match self.spawner.spawn(line) {
            Ok(child) => {
                let pid = child.id().unwrap_or(0);
                tracing::info!(pid, command = %line, "worker spawned");
                self.jobs.push(JobHandle {
                    pid,
                    line: line.to_string(),
                    child,
                });
            }
            // The job is abandoned; later lines keep being processed.
            Err(e) => tracing::error!(command = %line, error = %e, "failed to spawn worker"),
        }
    }

    /// Non-blocking sweep over outstanding workers. Release is the
    /// worker's own job before it exits; this only logs.
    fn reap_finished(&mut self) {
        self.jobs.retain_mut(|job| match job.child.try_wait() {
            Ok(Some(status)) => {
                tracing::info!(
                    pid = job.pid,
                    status = status.code().unwrap_or(-1),
                    command = %job.line,
                    "worker reaped"
                );
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(pid = job.pid, error = %e, "failed to poll worker");
                true
            }
        });
    }

    /// Shutdown path: journal the termination line, broadcast
    /// termination to every tracked worker, tear the session down.
    async fn terminate(mut self) -> i32 {
        match self.shutdown.reason() {
            ShutdownReason::Interrupt => tracing::warn!("interrupt received; shutting down"),
            ShutdownReason::Deadline => tracing::warn!("time budget expired; shutting down"),
        }

        self.journal_termination().await;

        // SIGTERM first so workers can kill their command child and
        // return their license; escalate per worker after the grace
        // period.
        for job in &self.jobs {
            if let Err(e) = kill(Pid::from_raw(job.pid as i32), Signal::SIGTERM) {
                tracing::debug!(pid = job.pid, error = %e, "worker already gone");
            }
        }
        for job in &mut self.jobs {
            match tokio::time::timeout(KILL_GRACE, job.child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::info!(pid = job.pid, status = status.code().unwrap_or(-1), "worker terminated")
                }
                Ok(Err(e)) => tracing::warn!(pid = job.pid, error = %e, "failed to wait for worker"),
                Err(_) => {
                    tracing::warn!(pid = job.pid, "worker ignored SIGTERM; killing");
                    let _ = job.child.start_kill();
                    let _ = job.child.wait().await;
                }
            }
        }

        self.session.teardown();
        1
    }

    async fn journal_termination(&self) {
        let outcome = self
            .session
            .locked(|_pool, journal| journal.append(" - Termination"))
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to write termination entry"),
            Err(e) => tracing::error!(error = %e, "critical section failed during termination"),
        }
    }
}

/// Read one line, keeping at most `MAX_LINE` bytes of it. The bound
/// holds at read time: the remainder up to the newline is consumed
/// chunk by chunk and discarded, so an arbitrarily long line is never
/// held in memory. `None` only at end of input.
async fn read_line_bounded<R>(input: &mut R) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut kept: Vec<u8> = Vec::new();
    let mut seen_any = false;
    let mut dropped = 0usize;

    loop {
        let (consumed, done) = {
            let buf = input.fill_buf().await?;
            if buf.is_empty() {
                (0, true)
            } else {
                seen_any = true;
                let (chunk, newline) = match buf.iter().position(|b| *b == b'\n') {
                    Some(pos) => (&buf[..pos], true),
                    None => (&buf[..], false),
                };
                let room = MAX_LINE - kept.len();
                if chunk.len() <= room {
                    kept.extend_from_slice(chunk);
                } else {
                    kept.extend_from_slice(&chunk[..room]);
                    dropped += chunk.len() - room;
                }
                (chunk.len() + usize::from(newline), newline)
            }
        };
        input.consume(consumed);
        if done {
            break;
        }
    }

    if !seen_any {
        return Ok(None);
    }
    if dropped > 0 {
        tracing::warn!(dropped, max = MAX_LINE, "input line truncated");
    }
    Ok(Some(decode_clamped(&kept)))
}

/// Decode the kept bytes. A multibyte character split by the byte
/// bound is dropped whole rather than decoded as a replacement
/// character.
fn decode_clamped(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(e) if e.error_len().is_none() => {
            String::from_utf8_lossy(&bytes[..e.valid_up_to()]).into_owned()
        }
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}
