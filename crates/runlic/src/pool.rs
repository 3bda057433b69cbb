//! License pool accessors.
//!
//! A license is one unit of permission to run a job concurrently. The
//! pool is the shared `available`/`capacity` pair in the segment; these
//! accessors are the only place it is mutated.
//!
//! Contract: every operation here assumes the caller already holds the
//! mutual exclusion engine's critical section. The accessors are not
//! internally synchronized and are not reentrant.

use std::sync::atomic::Ordering;

use crate::state::SharedState;

pub struct LicensePool<'a> {
    state: &'a SharedState,
}

impl<'a> LicensePool<'a> {
    pub fn new(state: &'a SharedState) -> Self {
        Self { state }
    }

    /// Set both `capacity` and `available`. Called exactly once per
    /// run, before dispatch begins.
    pub fn init(&self, capacity: i32) {
        self.state.capacity.store(capacity, Ordering::SeqCst);
        self.state.available.store(capacity, Ordering::SeqCst);
    }

    pub fn capacity(&self) -> i32 {
        self.state.capacity.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> i32 {
        self.state.available.load(Ordering::SeqCst)
    }

    /// Take one license. Never blocks: returns `false`, leaving the
    /// pool untouched, when none is free. Callers build a blocking wait
    /// out of retry-with-backoff around this.
    pub fn try_acquire(&self) -> bool {
        let available = self.available();
        if available <= 0 {
            return false;
        }
        self.state.available.store(available - 1, Ordering::SeqCst);
        true
    }

    /// Return one license. Refuses to inflate the pool past capacity,
    /// which would otherwise let a double-release bug overcommit.
    pub fn release(&self) -> bool {
        let available = self.available();
        if available >= self.capacity() {
            tracing::warn!(available, "license pool already full; release ignored");
            return false;
        }
        self.state.available.store(available + 1, Ordering::SeqCst);
        true
    }

    /// Administrative resize: add `n` licenses. Not used by the
    /// steady-state dispatch loop.
    pub fn add(&self, n: i32) {
        if n < 0 {
            tracing::warn!(n, "cannot add a negative number of licenses");
            return;
        }
        let available = self.available();
        if available + n > self.capacity() {
            tracing::warn!(
                n,
                available,
                capacity = self.capacity(),
                "adding licenses would exceed capacity; ignored"
            );
            return;
        }
        self.state.available.store(available + n, Ordering::SeqCst);
    }

    /// Administrative resize: remove `n` licenses, clamping at zero.
    pub fn remove(&self, n: i32) {
        if n < 0 {
            tracing::warn!(n, "cannot remove a negative number of licenses");
            return;
        }
        let available = self.available();
        if available - n < 0 {
            tracing::warn!(n, available, "removal would drop below zero; clamping to 0");
            self.state.available.store(0, Ordering::SeqCst);
            return;
        }
        self.state.available.store(available - n, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Segment;

    fn scratch() -> (tempfile::TempDir, Segment) {
        let dir = tempfile::tempdir().unwrap();
        let seg = Segment::create(&dir.path().join("seg")).unwrap();
        (dir, seg)
    }

    #[test]
    fn acquire_until_exhausted() {
        let (_dir, seg) = scratch();
        let pool = LicensePool::new(seg.state());
        pool.init(2);

        assert!(pool.try_acquire());
        assert!(pool.try_acquire());
        assert_eq!(pool.available(), 0);

        // Exhausted pool: acquire fails and mutates nothing.
        assert!(!pool.try_acquire());
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn release_at_capacity_is_refused() {
        let (_dir, seg) = scratch();
        let pool = LicensePool::new(seg.state());
        pool.init(3);

        assert!(!pool.release());
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn acquire_release_roundtrip_stays_in_bounds() {
        let (_dir, seg) = scratch();
        let pool = LicensePool::new(seg.state());
        pool.init(2);

        for _ in 0..10 {
            assert!(pool.try_acquire());
            assert!(pool.available() >= 0 && pool.available() <= pool.capacity());
            assert!(pool.release());
            assert!(pool.available() >= 0 && pool.available() <= pool.capacity());
        }
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn add_past_capacity_is_refused() {
        let (_dir, seg) = scratch();
        let pool = LicensePool::new(seg.state());
        pool.init(5);
        assert!(pool.try_acquire());

        pool.add(2); // would make 6 of 5
        assert_eq!(pool.available(), 4);

        pool.add(1);
        assert_eq!(pool.available(), 5);
    }

    #[test]
    fn remove_clamps_at_zero() {
        let (_dir, seg) = scratch();
        let pool = LicensePool::new(seg.state());
        pool.init(3);

        pool.remove(5);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn negative_amounts_are_rejected() {
        let (_dir, seg) = scratch();
        let pool = LicensePool::new(seg.state());
        pool.init(3);

        pool.add(-1);
        pool.remove(-1);
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn zero_capacity_pool_never_admits() {
        let (_dir, seg) = scratch();
        let pool = LicensePool::new(seg.state());
        pool.init(0);

        assert!(!pool.try_acquire());
        assert!(!pool.release());
        assert_eq!(pool.available(), 0);
    }
}
