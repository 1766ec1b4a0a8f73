//! Atomic holder of a tenant's local lifecycle state

use std::sync::atomic::{AtomicU8, Ordering};

use tenancy_types::LocalLifecycleState;

/// Lock-free cell with compare-and-set transitions.
///
/// Every change that depends on the current state goes through
/// [`LifecycleCell::transition`], so a check and its update cannot be
/// separated by another writer.
#[derive(Debug)]
pub struct LifecycleCell(AtomicU8);

impl LifecycleCell {
    pub fn new(state: LocalLifecycleState) -> Self {
        Self(AtomicU8::new(encode(state)))
    }

    pub fn get(&self) -> LocalLifecycleState {
        decode(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`. Returns the observed state on mismatch.
    pub fn transition(
        &self,
        from: LocalLifecycleState,
        to: LocalLifecycleState,
    ) -> Result<(), LocalLifecycleState> {
        self.0
            .compare_exchange(encode(from), encode(to), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(decode)
    }

    /// Unconditional store, for transitions already guarded by the operation lock
    pub fn set(&self, state: LocalLifecycleState) {
        self.0.store(encode(state), Ordering::Release);
    }
}

impl Default for LifecycleCell {
    fn default() -> Self {
        Self::new(LocalLifecycleState::Stopped)
    }
}

fn encode(state: LocalLifecycleState) -> u8 {
    match state {
        LocalLifecycleState::Stopped => 0,
        LocalLifecycleState::Starting => 1,
        LocalLifecycleState::Started => 2,
        LocalLifecycleState::Stopping => 3,
    }
}

fn decode(raw: u8) -> LocalLifecycleState {
    match raw {
        1 => LocalLifecycleState::Starting,
        2 => LocalLifecycleState::Started,
        3 => LocalLifecycleState::Stopping,
        _ => LocalLifecycleState::Stopped,
    }
}
