//! IPC (Inter-Process Communication) store for forktask
//!
//! This crate handles the state exchanged between processes that share no
//! memory by default: a small keyed get/set/has/remove store addressed by a
//! derived task identity. The reference backing is a System-V shared memory
//! segment; a process-local in-memory backing exists for tests.

pub mod error;
pub mod identity;
pub mod memory;
pub mod shm;
pub mod store;


pub use error::{IpcError, Result};
pub use identity::{IdentityError, TaskIdentity, TaskOrigin};
pub use memory::MemoryStore;
pub use shm::SharedMemoryStore;
pub use store::{slot_key, IpcStore, PUBLISHER_PID_KEY, STATUS_KEY, WORKER_PID_KEY};
