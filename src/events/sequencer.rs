//! Session generation management
//!
//! Every create for a session id gets a fresh, strictly increasing generation. Only the
//! newest generation of an id is "live"; events tagged with any other generation belong to a
//! replaced or removed session and are dropped.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

pub struct SessionSequencer {
    counters: DashMap<String, AtomicU64>,
    live: DashMap<String, u64>,
}

impl SessionSequencer {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            live: DashMap::new(),
        }
    }

    /// Next generation for `id`. Starts at 1; counters are never reset, so a recreated id
    /// cannot reuse an old generation.
    pub fn next(&self, id: &str) -> u64 {
        self.counters
            .entry(id.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst)
            + 1
    }

    /// Latest generation handed out for `id` (0 if none)
    pub fn current(&self, id: &str) -> u64 {
        self.counters
            .get(id)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Allocate a generation and make it the live one for `id`
    pub fn activate(&self, id: &str) -> u64 {
        let generation = self.next(id);
        self.live.insert(id.to_string(), generation);
        generation
    }

    pub fn is_live(&self, id: &str, generation: u64) -> bool {
        self.live.get(id).is_some_and(|g| *g == generation)
    }

    /// Run `f` while holding `id`'s slot, only if `generation` is live.
    ///
    /// A concurrent [`retire_with`](Self::retire_with) either completes before `f` runs or
    /// waits until it returns.
    pub fn run_if_live<F: FnOnce()>(&self, id: &str, generation: u64, f: F) -> bool {
        match self.live.get(id) {
            Some(live) if *live == generation => {
                f();
                true
            }
            _ => false,
        }
    }

    /// Retire `generation` of `id`, running `f` atomically with the removal.
    ///
    /// Returns false (and does not run `f`) if the generation was not live.
    pub fn retire_with<F: FnOnce()>(&self, id: &str, generation: u64, f: F) -> bool {
        let mut f = Some(f);
        self.live
            .remove_if(id, |_, live| {
                if *live != generation {
                    return false;
                }
                if let Some(f) = f.take() {
                    f();
                }
                true
            })
            .is_some()
    }

    pub fn retire(&self, id: &str, generation: u64) -> bool {
        self.retire_with(id, generation, || {})
    }

    /// Number of live sessions
    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

impl Default for SessionSequencer {
    fn default() -> Self {
        Self::new()
    }
}
