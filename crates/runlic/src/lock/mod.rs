//! Cross-process mutual exclusion engine.
//!
//! Two interchangeable backends behind one interface: a POSIX named
//! counting semaphore (`sem`, the default) and a Lamport bakery over
//! the shared segment (`bakery`, useful where no kernel object is
//! wanted). Both guarantee the same thing: at most one entrant inside
//! the critical section at a time, across all cooperating processes.
//!
//! A failure of the primitive itself is fatal for the process that hit
//! it; once the exclusion protocol is unreliable nothing else can be
//! trusted.

pub mod bakery;
pub mod sem;

use bakery::BakeryLock;
use sem::SemLock;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("semaphore operation failed: {0}")]
    Semaphore(#[from] std::io::Error),
    #[error("semaphore name contains an interior NUL byte")]
    BadName,
}

/// Backend selection, fixed at startup. The CLI mapping lives in
/// `config`; this module knows nothing about argument parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockBackend {
    Semaphore,
    Bakery,
}

impl LockBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockBackend::Semaphore => "semaphore",
            LockBackend::Bakery => "bakery",
        }
    }
}

pub enum LockEngine {
    Semaphore(SemLock),
    Bakery(BakeryLock),
}

impl LockEngine {
    /// Block until this process is the sole entrant, then return a
    /// guard that leaves the section when dropped.
    pub fn enter(&self) -> Result<SectionGuard<'_>, LockError> {
        match self {
            LockEngine::Semaphore(s) => {
                s.wait()?;
                Ok(SectionGuard {
                    engine: self,
                    slot: None,
                })
            }
            LockEngine::Bakery(b) => {
                let slot = b.claim();
                b.enter(slot);
                Ok(SectionGuard {
                    engine: self,
                    slot: Some(slot),
                })
            }
        }
    }
}

/// Held critical section. Leaves on drop.
pub struct SectionGuard<'a> {
    engine: &'a LockEngine,
    slot: Option<usize>,
}

impl Drop for SectionGuard<'_> {
    fn drop(&mut self) {
        match self.engine {
            LockEngine::Semaphore(s) => {
                if let Err(e) = s.post() {
                    // Exclusion can no longer be guaranteed for anyone.
                    tracing::error!(error = %e, "failed to leave critical section; aborting");
                    std::process::exit(1);
                }
            }
            LockEngine::Bakery(b) => {
                if let Some(slot) = self.slot {
                    b.leave(slot);
                }
            }
        }
    }
}
