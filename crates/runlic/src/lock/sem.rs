//! Kernel-semaphore lock backend.
//!
//! A POSIX named counting semaphore initialized to 1. The root process
//! creates it; workers open it by name after exec. Names survive the
//! creating process, so teardown unlinks explicitly and tolerates a
//! name that is already gone.

use std::ffi::CString;
use std::io;

use super::LockError;

pub struct SemLock {
    sem: *mut libc::sem_t,
    name: CString,
    owner: bool,
}

// POSIX semaphores are MT-safe.
unsafe impl Send for SemLock {}
unsafe impl Sync for SemLock {}

impl SemLock {
    /// Create the named semaphore with value 1. Fails if the name is
    /// already taken, which would mean a stale run left it behind.
    pub fn create(name: &str) -> Result<Self, LockError> {
        let cname = CString::new(name).map_err(|_| LockError::BadName)?;
        let sem = unsafe { libc::sem_open(cname.as_ptr(), libc::O_CREAT | libc::O_EXCL, 0o600, 1) };
        if sem == libc::SEM_FAILED {
            return Err(LockError::Semaphore(io::Error::last_os_error()));
        }
        Ok(Self {
            sem,
            name: cname,
            owner: true,
        })
    }

    /// Open an existing semaphore by name (worker side).
    pub fn open(name: &str) -> Result<Self, LockError> {
        let cname = CString::new(name).map_err(|_| LockError::BadName)?;
        let sem = unsafe { libc::sem_open(cname.as_ptr(), 0) };
        if sem == libc::SEM_FAILED {
            return Err(LockError::Semaphore(io::Error::last_os_error()));
        }
        Ok(Self {
            sem,
            name: cname,
            owner: false,
        })
    }

    pub(crate) fn wait(&self) -> Result<(), LockError> {
        loop {
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            // An unrelated signal interrupting the wait is not a
            // failure; retry until the decrement goes through.
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(LockError::Semaphore(err));
            }
        }
    }

    pub(crate) fn post(&self) -> Result<(), LockError> {
        if unsafe { libc::sem_post(self.sem) } == 0 {
            Ok(())
        } else {
            Err(LockError::Semaphore(io::Error::last_os_error()))
        }
    }

    /// Remove the semaphore name. Processes race to clean up during
    /// shutdown; an already-unlinked name is a benign no-op, and open
    /// handles keep working after the unlink.
    pub fn unlink(name: &str) {
        let Ok(cname) = CString::new(name) else {
            return;
        };
        if unsafe { libc::sem_unlink(cname.as_ptr()) } != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                tracing::warn!(name, error = %err, "failed to unlink semaphore");
            }
        }
    }
}

impl Drop for SemLock {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
        if self.owner {
            if let Ok(name) = self.name.clone().into_string() {
                Self::unlink(&name);
            }
        }
    }
}
