//! License-gated job dispatcher.
//!
//! Reads command lines from stdin and runs each as its own process,
//! admitting at most as many concurrent jobs as there are licenses in
//! a shared pool. The pool lives in a file-backed shared segment so
//! the dispatcher and every worker see one source of truth; all access
//! goes through a cross-process critical section, and the run log is
//! written inside that same section so entries never interleave.

pub mod config;
pub mod dispatcher;
pub mod journal;
pub mod lifecycle;
pub mod lock;
pub mod pool;
pub mod session;
pub mod state;
pub mod worker;

pub use config::{Args, Command, WorkerArgs};
pub use dispatcher::{Dispatcher, DispatchError, MAX_LINE, SelfExecSpawner, WorkerSpawner};
pub use journal::Journal;
pub use lifecycle::{DEFAULT_DEADLINE, ShutdownHandle, ShutdownReason};
pub use lock::{LockBackend, LockEngine, LockError, SectionGuard};
pub use pool::LicensePool;
pub use session::{Session, SessionError, SessionPaths};
pub use state::{BAKERY_SLOTS, MAX_LICENSES, Segment, SegmentError, SharedState};
pub use worker::{WorkerError, WorkerOptions};
