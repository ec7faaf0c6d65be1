//! Id Generation
//!
//! Allocates 64-bit blob ids from wall-clock time plus a per-process
//! sequence, so ids are unique without coordination and sort by creation
//! time:
//!
//! ```text
//! ┌──────────────────────────┬─────────┬──────────┐
//! │ millis since epoch       │ node    │ sequence │
//! │ (41 bits)                │ (10)    │ (12)     │
//! └──────────────────────────┴─────────┴──────────┘
//! ```
//!
//! The sequence wraps within a single millisecond; on wrap the generator
//! spins until the clock advances, which keeps ids strictly increasing per
//! process. Clock readings that go backwards (NTP step) are clamped to the
//! last observed tick for the same reason.

use std::sync::Mutex;

/// Custom epoch: 2015-01-01T00:00:00Z, matching the deployment's first year.
const EPOCH_MILLIS: i64 = 1_420_070_400_000;

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_NODE: u64 = (1 << NODE_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Monotonic 64-bit id allocator.
pub struct IdGenerator {
    node: u64,
    state: Mutex<State>,
}

struct State {
    last_millis: i64,
    sequence: u64,
}

impl IdGenerator {
    /// `node` identifies this process in the cluster; values above 1023 are
    /// masked into range.
    pub fn new(node: u64) -> Self {
        Self {
            node: node & MAX_NODE,
            state: Mutex::new(State {
                last_millis: 0,
                sequence: 0,
            }),
        }
    }

    /// Allocate the next id. Strictly increasing per process.
    pub fn generate(&self) -> i64 {
        let mut state = self.state.lock().expect("id generator lock poisoned");

        let mut now = Self::now_millis();
        if now < state.last_millis {
            now = state.last_millis;
        }

        if now == state.last_millis {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // Sequence exhausted for this tick, spin to the next one.
                while now <= state.last_millis {
                    now = Self::now_millis();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_millis = now;

        let timestamp = (now - EPOCH_MILLIS) as u64;
        ((timestamp << (NODE_BITS + SEQUENCE_BITS)) | (self.node << SEQUENCE_BITS)
            | state.sequence) as i64
    }

    fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_strictly_increasing() {
        let generator = IdGenerator::new(1);
        let mut last = 0;
        for _ in 0..10_000 {
            let id = generator.generate();
            assert!(id > last, "id {} not greater than {}", id, last);
            last = id;
        }
    }

    #[test]
    fn test_ids_are_unique_across_threads() {
        let generator = std::sync::Arc::new(IdGenerator::new(3));
        let mut handles = Vec::new();

        for _ in 0..4 {
            let generator = std::sync::Arc::clone(&generator);
            handles.push(std::thread::spawn(move || {
                (0..5_000).map(|_| generator.generate()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
    }

    #[test]
    fn test_node_bits_are_embedded() {
        let generator = IdGenerator::new(7);
        let id = generator.generate() as u64;
        assert_eq!((id >> SEQUENCE_BITS) & MAX_NODE, 7);
    }

    #[test]
    fn test_node_is_masked_into_range() {
        let generator = IdGenerator::new(u64::MAX);
        let id = generator.generate() as u64;
        assert_eq!((id >> SEQUENCE_BITS) & MAX_NODE, MAX_NODE);
    }
}
