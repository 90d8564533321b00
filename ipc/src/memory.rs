//! Process-local in-memory backing for tests
//!
//! Mirrors the shared-memory store's observable behavior without touching
//! kernel state, which keeps engine unit tests hermetic. Not suitable for
//! real cross-process use: a forked child writes to its own copy.

use crate::identity::TaskIdentity;
use crate::store::{slot_key, IpcStore};
use crate::{IpcError, Result};
use serde_json::Value;
use std::collections::HashMap;

/// In-memory IPC store.
///
/// Teardown mirrors the still-attached view of the shared-memory backing:
/// the final values stay readable until the next `initialize`, which starts
/// from an empty namespace again.
#[derive(Debug, Default)]
pub struct MemoryStore {
    identity: Option<TaskIdentity>,
    slots: Option<HashMap<u64, Value>>,
    torn_down: bool,
}

impl MemoryStore {
    /// Create an unbound store
    pub fn new() -> Self {
        Self::default()
    }
}

impl IpcStore for MemoryStore {
    fn bind(&mut self, identity: TaskIdentity) {
        self.identity = Some(identity);
    }

    fn identity(&self) -> Option<&TaskIdentity> {
        self.identity.as_ref()
    }

    fn initialize(&mut self) -> Result<()> {
        if self.identity.is_none() {
            return Err(IpcError::Unbound);
        }
        if self.torn_down || self.slots.is_none() {
            self.slots = Some(HashMap::new());
            self.torn_down = false;
        }
        Ok(())
    }

    fn teardown(&mut self, _including_group: bool) {
        self.torn_down = true;
    }

    fn has(&self, key: &str) -> bool {
        self.slots
            .as_ref()
            .is_some_and(|slots| slots.contains_key(&slot_key(key)))
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.slots.as_ref()?.get(&slot_key(key)).cloned()
    }

    fn remove(&mut self, key: &str) -> bool {
        self.slots
            .as_mut()
            .is_some_and(|slots| slots.remove(&slot_key(key)).is_some())
    }

    fn write(&mut self, key: &str, value: Value) -> Result<()> {
        let slots = self.slots.as_mut().ok_or(IpcError::Uninitialized)?;
        slots.insert(slot_key(key), value);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
