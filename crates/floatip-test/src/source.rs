//! Settable desired-state source.

use async_trait::async_trait;
use floatip_common::store::DEFAULT_PREFIX_LEN;
use floatip_common::{BindingSource, DesiredState};
use floatip_types::DesiredBinding;
use parking_lot::Mutex;

/// [`BindingSource`] whose content the test replaces between ticks.
#[derive(Debug, Default)]
pub struct MemorySource {
    state: Mutex<DesiredState>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, state: DesiredState) {
        *self.state.lock() = state;
    }

    /// Replaces the content with a parsed store document.
    pub fn set_json(&self, raw: &str) {
        self.set(DesiredState::parse_json(raw, DEFAULT_PREFIX_LEN));
    }

    /// Replaces the content with `(floating, managed)` pairs.
    ///
    /// Panics on an invalid pair; fixtures are expected to be well formed.
    pub fn set_bindings(&self, pairs: &[(&str, &str)]) {
        let mut state = DesiredState::new();
        for (floating, managed) in pairs {
            let desired = DesiredBinding::parse(floating, managed, DEFAULT_PREFIX_LEN)
                .unwrap_or_else(|e| panic!("invalid fixture binding {floating} -> {managed}: {e}"));
            state.insert(desired);
        }
        self.set(state);
    }

    pub fn clear(&self) {
        self.set(DesiredState::new());
    }
}

#[async_trait]
impl BindingSource for MemorySource {
    async fn load(&self) -> DesiredState {
        self.state.lock().clone()
    }
}
