//! Lamport-bakery lock backend over the shared segment.
//!
//! Pure shared-memory mutual exclusion: no kernel object, just the
//! `claimed`/`choosing`/`number` arrays in the segment. A waiter claims
//! a ticket slot, draws a number one higher than any outstanding one,
//! and spins until no other contender precedes it under the
//! `(number, slot)` lexicographic order. Entry is FIFO-ish in ticket
//! order; the guarantee covers section entry only, not whatever
//! resource the section protects.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::state::{BAKERY_SLOTS, Segment, SharedState};

pub struct BakeryLock {
    seg: Arc<Segment>,
}

impl BakeryLock {
    pub fn new(seg: Arc<Segment>) -> Self {
        Self { seg }
    }

    fn state(&self) -> &SharedState {
        self.seg.state()
    }

    /// Claim a free ticket slot via compare-exchange. The slot bound is
    /// a hard capacity: when every slot is busy, back off and retry.
    pub(crate) fn claim(&self) -> usize {
        let state = self.state();
        loop {
            for i in 0..BAKERY_SLOTS {
                if state.claimed[i]
                    .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return i;
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Spin until slot `slot` holds the section. Caller must have
    /// claimed the slot.
    pub(crate) fn enter(&self, slot: usize) {
        let state = self.state();

        state.choosing[slot].store(1, Ordering::SeqCst);
        let max = state
            .number
            .iter()
            .map(|n| n.load(Ordering::SeqCst))
            .max()
            .unwrap_or(0);
        state.number[slot].store(max + 1, Ordering::SeqCst);
        state.choosing[slot].store(0, Ordering::SeqCst);

        let mine = state.number[slot].load(Ordering::SeqCst);
        for other in 0..BAKERY_SLOTS {
            if other == slot {
                continue;
            }
            while state.choosing[other].load(Ordering::SeqCst) != 0 {
                std::thread::yield_now();
            }
            loop {
                let theirs = state.number[other].load(Ordering::SeqCst);
                // (a, i) precedes (b, j) iff a < b, or a == b and i < j.
                if theirs == 0 || (theirs, other) >= (mine, slot) {
                    break;
                }
                std::thread::yield_now();
            }
        }
    }

    /// Leave the section and return the ticket slot to the free set.
    pub(crate) fn leave(&self, slot: usize) {
        let state = self.state();
        state.number[slot].store(0, Ordering::SeqCst);
        state.claimed[slot].store(0, Ordering::SeqCst);
    }
}
