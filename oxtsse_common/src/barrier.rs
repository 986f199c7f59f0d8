//! Reusable generation-counted completion barrier for dispatch rounds.

use std::sync::{Condvar, Mutex};

struct BarrierState {
    generation: u64,
    outstanding: usize,
}

/// Tracks one dispatch round at a time: the dispatcher opens a generation
/// with the number of participating workers, every worker arrives exactly
/// once, and the dispatcher blocks until the round has fully drained. The
/// generation counter makes a stale wait impossible across reuse.
pub struct RoundBarrier {
    state: Mutex<BarrierState>,
    complete: Condvar,
}

impl RoundBarrier {
    pub fn new() -> RoundBarrier {
        RoundBarrier {
            state: Mutex::new(BarrierState { generation: 0, outstanding: 0 }),
            complete: Condvar::new(),
        }
    }

    /// Opens the next generation for `parties` arrivals and returns it. Must
    /// only be called once the previous round has drained; the pool's
    /// exclusive dispatch entry point guarantees that.
    pub fn open(&self, parties: usize) -> u64 {
        let mut state = self.state.lock().unwrap();
        debug_assert_eq!(state.outstanding, 0, "a round is still in flight");

        state.generation += 1;
        state.outstanding = parties;
        state.generation
    }

    /// Records the completion of one party's share of the current round.
    pub fn arrive(&self) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(state.outstanding > 0, "arrival without an open round");

        state.outstanding -= 1;
        if state.outstanding == 0 {
            self.complete.notify_all();
        }
    }

    /// Blocks until every party of `generation` has arrived.
    pub fn wait(&self, generation: u64) {
        let mut state = self.state.lock().unwrap();
        while state.generation == generation && state.outstanding > 0 {
            state = self.complete.wait(state).unwrap();
        }
    }
}

impl Default for RoundBarrier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::RoundBarrier;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn generations_drain_in_order() {
        let barrier = Arc::new(RoundBarrier::new());

        for round in 1..=3u64 {
            let generation = barrier.open(4);
            assert_eq!(generation, round);

            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let barrier = barrier.clone();
                    thread::spawn(move || barrier.arrive())
                })
                .collect();

            barrier.wait(generation);
            for handle in handles {
                handle.join().unwrap();
            }
        }
    }
}
