// SPDX-License-Identifier: MIT

//! The engine registry (§4.D): `register`, `get(id)`, `list_metadata()`,
//! `default()` over whatever concrete [`forge_adapters::Engine`]s the
//! daemon wires up at startup.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use forge_adapters::{Engine, EngineMetadata};
use forge_core::{CoreError, CoreResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

struct RegistryState {
    engines: HashMap<String, Arc<dyn Engine>>,
    default_id: Option<String>,
}

/// Resolves an `engine_id` to a callable [`Engine`]. One registry is shared
/// across all workers of a daemon process.
pub struct EngineRegistry {
    state: RwLock<RegistryState>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self { state: RwLock::new(RegistryState { engines: HashMap::new(), default_id: None }) }
    }

    /// Registers `engine` under its own `metadata().id`. The first
    /// registered engine becomes the default unless `default` is `false`
    /// for it and `true` for a later one.
    pub fn register(&self, engine: Arc<dyn Engine>, default: bool) {
        let id = engine.metadata().id.clone();
        let mut state = self.state.write();
        let is_first = state.engines.is_empty();
        state.engines.insert(id.clone(), engine);
        if default || is_first {
            state.default_id = Some(id);
        }
    }

    pub fn get(&self, id: &str) -> CoreResult<Arc<dyn Engine>> {
        self.state.read().engines.get(id).cloned().ok_or_else(|| CoreError::NotFound(format!("engine {id}")))
    }

    pub fn list_metadata(&self) -> Vec<EngineMetadata> {
        self.state.read().engines.values().map(|e| e.metadata().clone()).collect()
    }

    pub fn default(&self) -> CoreResult<Arc<dyn Engine>> {
        let state = self.state.read();
        let id = state.default_id.as_ref().ok_or_else(|| CoreError::NotFound("no default engine registered".into()))?;
        state.engines.get(id).cloned().ok_or_else(|| CoreError::NotFound(format!("engine {id}")))
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}
