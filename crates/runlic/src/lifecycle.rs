//! Bounded-lifetime shutdown.
//!
//! Interrupt signals and the run deadline funnel into one cancellation
//! token. The listening task does nothing but record the reason and
//! cancel; journal writes, kill broadcast, and teardown all happen on
//! the observer side in ordinary code, never inside a signal path.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

/// Default run deadline, overridable with `-t`.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Operator interrupt (SIGINT or SIGTERM).
    Interrupt,
    /// The run's time budget expired.
    Deadline,
}

#[derive(Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl ShutdownHandle {
    /// Install signal listeners, plus the deadline timer when given.
    /// Workers pass `None`; only the root arms the deadline.
    pub fn install(deadline: Option<Duration>) -> std::io::Result<Self> {
        let token = CancellationToken::new();
        let reason = Arc::new(OnceLock::new());

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        let fire_token = token.clone();
        let fire_reason = Arc::clone(&reason);
        tokio::spawn(async move {
            let why = tokio::select! {
                _ = sigint.recv() => ShutdownReason::Interrupt,
                _ = sigterm.recv() => ShutdownReason::Interrupt,
                _ = async {
                    match deadline {
                        Some(d) => tokio::time::sleep(d).await,
                        None => std::future::pending().await,
                    }
                } => ShutdownReason::Deadline,
            };
            let _ = fire_reason.set(why);
            fire_token.cancel();
        });

        Ok(Self { token, reason })
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> ShutdownReason {
        self.reason
            .get()
            .copied()
            .unwrap_or(ShutdownReason::Interrupt)
    }
}
