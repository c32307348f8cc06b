//! Tick barrier and coordinator (§4.4, §5).
//!
//! A single two-phase barrier per tick with `N` participants: phase A
//! (gather) waits until every sampler has published and arrived; the
//! master then runs the controller; phase B (release) wakes the samplers,
//! and only primary-in-module samplers continue to the MSR-write step.
//!
//! Implemented with `parking_lot::{Mutex, Condvar}` rather than a bare
//! spin-counter (§9 "barrier as counter... may substitute a reusable
//! two-phase barrier primitive as long as the ordering guarantees hold").

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

struct State {
    arrived: u32,
    /// Bumped every time phase B completes, so a sampler that re-enters
    /// `arrive` after release (next tick) cannot be confused with a
    /// straggler from the previous tick.
    generation: u64,
}

/// Shared two-phase tick barrier for `n` participants.
pub struct TickBarrier {
    n: u32,
    state: Mutex<State>,
    gather_done: Condvar,
    release_done: Condvar,
}

impl TickBarrier {
    pub fn new(n: u32) -> Arc<Self> {
        Arc::new(Self {
            n,
            state: Mutex::new(State {
                arrived: 0,
                generation: 0,
            }),
            gather_done: Condvar::new(),
            release_done: Condvar::new(),
        })
    }

    /// Phase A: called by every sampler after publishing its sample.
    /// Returns `true` to exactly one caller — the master — once the
    /// arrival count reaches `n`; all others block until phase B releases
    /// them. The master must call `release` after running the controller.
    pub fn arrive_and_wait_for_master(&self, is_master: bool) -> bool {
        let mut state = self.state.lock();
        let my_generation = state.generation;
        state.arrived += 1;
        self.gather_done.notify_all();

        if is_master {
            // The master waits for every other sampler to have arrived
            // before running the controller.
            while state.arrived < self.n {
                self.gather_done.wait(&mut state);
            }
            true
        } else {
            // Non-master samplers wait until the master clears the
            // generation via `release`.
            while state.generation == my_generation {
                self.release_done.wait(&mut state);
            }
            false
        }
    }

    /// Phase B: called by the master once the controller has produced its
    /// decisions. Clears the arrival counter and wakes all waiting
    /// samplers.
    pub fn release(&self) {
        let mut state = self.state.lock();
        state.arrived = 0;
        state.generation = state.generation.wrapping_add(1);
        self.release_done.notify_all();
    }

    pub fn participant_count(&self) -> u32 {
        self.n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn single_participant_barrier_is_a_no_op() {
        let barrier = TickBarrier::new(1);
        assert!(barrier.arrive_and_wait_for_master(true));
        barrier.release();
    }

    #[test]
    fn all_participants_release_together() {
        let barrier = TickBarrier::new(3);
        let order = Arc::new(Mutex::new(Vec::new()));

        let b1 = barrier.clone();
        let o1 = order.clone();
        let t1 = thread::spawn(move || {
            let is_master = b1.arrive_and_wait_for_master(false);
            assert!(!is_master);
            o1.lock().push(1);
        });

        let b2 = barrier.clone();
        let o2 = order.clone();
        let t2 = thread::spawn(move || {
            let is_master = b2.arrive_and_wait_for_master(false);
            assert!(!is_master);
            o2.lock().push(2);
        });

        // Give the two non-master threads a chance to block on phase A.
        thread::sleep(Duration::from_millis(50));

        let is_master = barrier.arrive_and_wait_for_master(true);
        assert!(is_master);
        barrier.release();

        t1.join().unwrap();
        t2.join().unwrap();
        assert_eq!(order.lock().len(), 2);
    }
}
