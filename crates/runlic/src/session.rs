//! Session: the shared resources one run coordinates through.
//!
//! A session bundles the mapped segment, the lock engine, and the
//! journal. The root process creates it; each worker attaches from the
//! paths it received on its command line. All pool and journal access
//! goes through [`Session::locked`], the single critical-section
//! funnel.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::journal::Journal;
use crate::lock::bakery::BakeryLock;
use crate::lock::sem::SemLock;
use crate::lock::{LockBackend, LockEngine, LockError};
use crate::pool::LicensePool;
use crate::state::{Segment, SegmentError};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Segment(#[from] SegmentError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("critical section task failed: {0}")]
    Join(String),
}

/// Where a run's shared objects live. Passed to workers verbatim.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub state_path: PathBuf,
    pub sem_name: String,
    pub log_path: PathBuf,
}

impl SessionPaths {
    /// Fresh per-run names keyed by the root's pid, so concurrent runs
    /// never collide.
    pub fn for_run(log_path: &Path) -> Self {
        let pid = std::process::id();
        Self {
            state_path: std::env::temp_dir().join(format!("runlic-{pid}.state")),
            sem_name: format!("/runlic-{pid}"),
            log_path: log_path.to_path_buf(),
        }
    }
}

pub struct Session {
    seg: Arc<Segment>,
    lock: LockEngine,
    journal: Journal,
    paths: SessionPaths,
    backend: LockBackend,
}

impl Session {
    /// Allocate the shared objects. Root process only, exactly once,
    /// before any worker is spawned.
    pub fn create(paths: SessionPaths, backend: LockBackend) -> Result<Arc<Self>, SessionError> {
        let seg = Arc::new(Segment::create(&paths.state_path)?);
        let lock = match backend {
            LockBackend::Semaphore => LockEngine::Semaphore(SemLock::create(&paths.sem_name)?),
            LockBackend::Bakery => LockEngine::Bakery(BakeryLock::new(Arc::clone(&seg))),
        };
        Ok(Arc::new(Self {
            journal: Journal::new(&paths.log_path),
            seg,
            lock,
            paths,
            backend,
        }))
    }

    /// Attach to an existing session (worker side). Attachments do not
    /// survive process creation, so every worker does this on startup.
    pub fn attach(paths: SessionPaths, backend: LockBackend) -> Result<Arc<Self>, SessionError> {
        let seg = Arc::new(Segment::attach(&paths.state_path)?);
        let lock = match backend {
            LockBackend::Semaphore => LockEngine::Semaphore(SemLock::open(&paths.sem_name)?),
            LockBackend::Bakery => LockEngine::Bakery(BakeryLock::new(Arc::clone(&seg))),
        };
        Ok(Arc::new(Self {
            journal: Journal::new(&paths.log_path),
            seg,
            lock,
            paths,
            backend,
        }))
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    pub fn backend(&self) -> LockBackend {
        self.backend
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Run `f` inside the cross-process critical section.
    ///
    /// Entry can block on other processes, so the whole
    /// enter/run/leave sequence goes to the blocking thread pool
    /// rather than stalling the async runtime.
    pub async fn locked<T, F>(self: &Arc<Self>, f: F) -> Result<T, SessionError>
    where
        F: FnOnce(LicensePool<'_>, &Journal) -> T + Send + 'static,
        T: Send + 'static,
    {
        let session = Arc::clone(self);
        tokio::task::spawn_blocking(move || -> Result<T, SessionError> {
            let _section = session.lock.enter()?;
            Ok(f(LicensePool::new(session.seg.state()), &session.journal))
        })
        .await
        .map_err(|e| SessionError::Join(e.to_string()))?
    }

    /// Synchronous variant for callers without a runtime.
    pub fn locked_sync<T>(
        &self,
        f: impl FnOnce(LicensePool<'_>, &Journal) -> T,
    ) -> Result<T, SessionError> {
        let _section = self.lock.enter()?;
        Ok(f(LicensePool::new(self.seg.state()), &self.journal))
    }

    /// Release the shared objects behind this session. Multiple
    /// processes may race here during shutdown; every step tolerates
    /// an object that is already gone.
    pub fn teardown(&self) {
        Segment::destroy(&self.paths.state_path);
        if self.backend == LockBackend::Semaphore {
            SemLock::unlink(&self.paths.sem_name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_paths(dir: &tempfile::TempDir, tag: &str) -> SessionPaths {
        SessionPaths {
            state_path: dir.path().join(format!("{tag}.state")),
            sem_name: format!("/runlic-test-sess-{}-{tag}", std::process::id()),
            log_path: dir.path().join(format!("{tag}.log")),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_attach_share_the_pool() {
        let dir = tempfile::tempdir().unwrap();
        let paths = scratch_paths(&dir, "share");

        let root = Session::create(paths.clone(), LockBackend::Semaphore).unwrap();
        root.locked(|pool, _| pool.init(4)).await.unwrap();

        let worker = Session::attach(paths, LockBackend::Semaphore).unwrap();
        let taken = worker.locked(|pool, _| pool.try_acquire()).await.unwrap();
        assert!(taken);

        let left = root.locked(|pool, _| pool.available()).await.unwrap();
        assert_eq!(left, 3);

        root.teardown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn journal_writes_go_through_the_section() {
        let dir = tempfile::tempdir().unwrap();
        let paths = scratch_paths(&dir, "journal");

        let session = Session::create(paths, LockBackend::Bakery).unwrap();
        session
            .locked(|_, journal| {
                journal.append(" - Termination").unwrap();
            })
            .await
            .unwrap();

        let text = std::fs::read_to_string(session.journal().path()).unwrap();
        assert!(text.trim_end().ends_with(" - Termination"));
        session.teardown();
    }

    #[test]
    fn teardown_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let paths = scratch_paths(&dir, "teardown");

        let session = Session::create(paths, LockBackend::Semaphore).unwrap();
        session.teardown();
        session.teardown();
    }

    #[test]
    fn attach_without_create_fails() {
        let dir = tempfile::tempdir().unwrap();
        let paths = scratch_paths(&dir, "orphan");
        assert!(Session::attach(paths, LockBackend::Bakery).is_err());
    }
}
