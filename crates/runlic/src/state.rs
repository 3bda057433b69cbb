//! Shared segment backing the license pool and the bakery tickets.
//!
//! One file-backed `MAP_SHARED` mapping holds all cross-process mutable
//! state. The root process creates it before any worker is spawned;
//! every worker re-attaches by path, since process creation does not
//! inherit a live mapping. All fields are atomics so that concurrent
//! mappings are sound; higher-level invariants are still protected by
//! the mutual exclusion engine, not by the atomics themselves.

use std::fs::{File, OpenOptions};
use std::io;
use std::num::NonZeroUsize;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};

use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap};

/// Ceiling on concurrent jobs, regardless of what the CLI asks for.
pub const MAX_LICENSES: i32 = 20;

/// Ticket slots for the bakery backend. Slots are claimed per
/// critical-section use, not per process, so each job may consume
/// several over its lifetime.
pub const BAKERY_SLOTS: usize = 99;

const MAGIC: u32 = 0x524c_4943; // "RLIC"

/// The cross-process state struct, laid out for shared mapping.
#[repr(C)]
pub struct SharedState {
    magic: AtomicU32,
    pub(crate) capacity: AtomicI32,
    pub(crate) available: AtomicI32,
    pub(crate) claimed: [AtomicU32; BAKERY_SLOTS],
    pub(crate) choosing: [AtomicU32; BAKERY_SLOTS],
    pub(crate) number: [AtomicU64; BAKERY_SLOTS],
}

#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error("segment file error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to map segment: {0}")]
    Map(#[from] nix::Error),
    #[error("segment at {0} has wrong magic (stale or foreign file)")]
    BadMagic(PathBuf),
}

/// A process-local view of the shared state file.
pub struct Segment {
    ptr: NonNull<SharedState>,
    path: PathBuf,
}

// The mapping holds only atomics.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Create and initialize the backing file. Called exactly once per
    /// run, by the root process, before any worker exists.
    pub fn create(path: &Path) -> Result<Self, SegmentError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)?;
        file.set_len(size_of::<SharedState>() as u64)?;

        let seg = Self::map(&file, path)?;
        // set_len zero-fills, so counters and ticket arrays start at 0.
        seg.state().magic.store(MAGIC, Ordering::SeqCst);
        Ok(seg)
    }

    /// Attach to an existing segment. Every worker process does this on
    /// startup.
    pub fn attach(path: &Path) -> Result<Self, SegmentError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let seg = Self::map(&file, path)?;
        if seg.state().magic.load(Ordering::SeqCst) != MAGIC {
            return Err(SegmentError::BadMagic(path.to_path_buf()));
        }
        Ok(seg)
    }

    fn map(file: &File, path: &Path) -> Result<Self, SegmentError> {
        let len = NonZeroUsize::new(size_of::<SharedState>())
            .expect("SharedState is not zero-sized");
        let ptr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                file,
                0,
            )?
        };
        Ok(Self {
            ptr: ptr.cast(),
            path: path.to_path_buf(),
        })
    }

    pub fn state(&self) -> &SharedState {
        unsafe { self.ptr.as_ref() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the backing file. Multiple processes may race to clean
    /// up during shutdown; a file that is already gone is a benign
    /// no-op. Existing mappings stay valid after the unlink.
    pub fn destroy(path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove segment file"),
        }
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if let Err(e) = unsafe { munmap(self.ptr.cast(), size_of::<SharedState>()) } {
            tracing::warn!(error = %e, "failed to unmap shared segment");
        }
    }
}
