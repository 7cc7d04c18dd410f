//! Request id → command name bookkeeping for asynchronous RPC replies.

use std::collections::HashMap;

use parking_lot::Mutex;
use smol_str::SmolStr;

#[derive(Debug)]
struct CorrelatorState {
    next_id: u64,
    pending: HashMap<u64, SmolStr>,
}

/// Hands out request ids and remembers which command each one carried.
///
/// The command loop inserts, the reply forwarder removes; a single lock guards
/// both the counter and the map and is never held across I/O.
#[derive(Debug)]
pub struct RequestCorrelator {
    state: Mutex<CorrelatorState>,
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestCorrelator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CorrelatorState {
                next_id: 1,
                pending: HashMap::new(),
            }),
        }
    }

    pub fn next_id(&self) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id = state.next_id.saturating_add(1);
        id
    }

    pub fn remember(&self, id: u64, method: impl Into<SmolStr>) {
        self.state.lock().pending.insert(id, method.into());
    }

    /// Allocates an id and records `method` for it in one step.
    pub fn issue(&self, method: impl Into<SmolStr>) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id = state.next_id.saturating_add(1);
        state.pending.insert(id, method.into());
        id
    }

    /// Removes and returns the method recorded for `id`; empty when unknown.
    pub fn take_method(&self, id: u64) -> SmolStr {
        self.state.lock().pending.remove(&id).unwrap_or_default()
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    #[must_use]
    pub fn is_pending(&self, id: u64) -> bool {
        self.state.lock().pending.contains_key(&id)
    }
}
