//! Shared-memory reference backing for the IPC store
//!
//! Two System-V segments per task: one addressed by the instance id, one by
//! the definition key (shared by every instance of the same task type, used
//! for group teardown decisions). Each segment holds a tiny slot table:
//! a magic/count header followed by `[slot u64][len u32][json bytes]`
//! records, rewritten wholesale on every put — the key set is three slots,
//! so linear rewrites are cheap.
//!
//! ## Removal semantics
//!
//! `teardown` marks segments with `IPC_RMID` but keeps the local
//! attachment. System-V destroys a removed segment only once the last
//! attachment goes away, so processes that were already bound continue to
//! observe the final status while fresh attachers get a new, empty segment.
//! No locks protect the table: each slot has one writer at a time in normal
//! operation, and duplicated cleanup is idempotent.

// Allow unsafe code for this module since System-V shared memory requires
// raw libc::shmget/shmat/shmdt/shmctl calls
#![allow(unsafe_code)]

use crate::identity::TaskIdentity;
use crate::store::{slot_key, IpcStore};
use crate::{IpcError, Result};
use serde_json::Value;
use tracing::{debug, warn};

/// Fixed size of every segment; comfortably holds the three-slot table
const SEGMENT_SIZE: usize = 16 * 1024;

/// Marks a segment whose table has been written at least once
const SEGMENT_MAGIC: u32 = 0x4654_534B;

/// Bytes taken by the magic/count header
const HEADER_LEN: usize = 8;

/// Bytes taken per record before its payload (slot u64 + len u32)
const RECORD_HEADER_LEN: usize = 12;

/// One attached System-V shared memory segment
struct ShmSegment {
    key: i32,
    id: i32,
    addr: *mut u8,
    size: usize,
}

impl ShmSegment {
    /// Create-or-open the segment for `key` and attach it.
    fn attach(key: i32) -> Result<Self> {
        // Safety: shmget allocates or looks up a segment; no memory is
        // touched until shmat.
        let id = unsafe { libc::shmget(key, SEGMENT_SIZE, libc::IPC_CREAT | 0o600) };
        if id == -1 {
            return Err(IpcError::SegmentCreate {
                key,
                reason: std::io::Error::last_os_error().to_string(),
            });
        }

        // Safety: attaching a segment we just created or looked up; the
        // kernel picks the address.
        let addr = unsafe { libc::shmat(id, std::ptr::null(), 0) };
        if addr == usize::MAX as *mut libc::c_void {
            return Err(IpcError::SegmentAttach {
                id,
                reason: std::io::Error::last_os_error().to_string(),
            });
        }

        debug!("Attached shared memory segment {} (key {})", id, key);

        Ok(Self {
            key,
            id,
            addr: addr.cast::<u8>(),
            size: SEGMENT_SIZE,
        })
    }

    /// Copy the raw segment contents into a local buffer.
    fn snapshot(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.size];
        // Safety: addr points at a mapping of exactly `size` bytes that
        // stays attached for the lifetime of self.
        unsafe {
            std::ptr::copy_nonoverlapping(self.addr, buf.as_mut_ptr(), self.size);
        }
        buf
    }

    /// Parse the slot table. A fresh (zeroed) or foreign segment reads as
    /// empty; truncated records end the parse rather than failing it.
    fn load(&self) -> Vec<(u64, Vec<u8>)> {
        let buf = self.snapshot();
        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != SEGMENT_MAGIC {
            return Vec::new();
        }
        let count = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;

        let mut entries = Vec::with_capacity(count);
        let mut cursor = HEADER_LEN;
        for _ in 0..count {
            if cursor + RECORD_HEADER_LEN > buf.len() {
                break;
            }
            let slot = u64::from_le_bytes(buf[cursor..cursor + 8].try_into().unwrap());
            let len =
                u32::from_le_bytes(buf[cursor + 8..cursor + 12].try_into().unwrap()) as usize;
            cursor += RECORD_HEADER_LEN;
            if cursor + len > buf.len() {
                break;
            }
            entries.push((slot, buf[cursor..cursor + len].to_vec()));
            cursor += len;
        }
        entries
    }

    /// Rewrite the slot table. Fails if the records do not fit the segment.
    fn save(&self, entries: &[(u64, Vec<u8>)]) -> std::result::Result<(), ()> {
        let payload: usize = entries
            .iter()
            .map(|(_, data)| RECORD_HEADER_LEN + data.len())
            .sum();
        if HEADER_LEN + payload > self.size {
            return Err(());
        }

        let mut buf = Vec::with_capacity(HEADER_LEN + payload);
        buf.extend_from_slice(&SEGMENT_MAGIC.to_le_bytes());
        buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        for (slot, data) in entries {
            buf.extend_from_slice(&slot.to_le_bytes());
            buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
            buf.extend_from_slice(data);
        }

        // Safety: buf.len() <= size was checked above; addr maps `size`
        // writable bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(buf.as_ptr(), self.addr, buf.len());
        }
        Ok(())
    }

    fn get(&self, slot: u64) -> Option<Vec<u8>> {
        self.load()
            .into_iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, data)| data)
    }

    fn put(&self, slot: u64, data: Vec<u8>) -> std::result::Result<(), ()> {
        let mut entries = self.load();
        if let Some(entry) = entries.iter_mut().find(|(s, _)| *s == slot) {
            entry.1 = data;
        } else {
            entries.push((slot, data));
        }
        self.save(&entries)
    }

    fn remove(&self, slot: u64) -> bool {
        let mut entries = self.load();
        let before = entries.len();
        entries.retain(|(s, _)| *s != slot);
        if entries.len() == before {
            return false;
        }
        // Shrinking rewrite always fits
        let _ = self.save(&entries);
        true
    }

    /// Mark the segment for destruction. Existing attachments (including
    /// this one) keep reading it; fresh `shmget` calls land on a new
    /// segment.
    fn mark_removed(&self) {
        // Safety: IPC_RMID takes no buffer argument.
        let rc = unsafe { libc::shmctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) };
        if rc == -1 {
            // Racing teardown from another process is expected
            debug!(
                "Segment {} (key {}) already removed: {}",
                self.id,
                self.key,
                std::io::Error::last_os_error()
            );
        } else {
            debug!("Marked segment {} (key {}) for removal", self.id, self.key);
        }
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        // Safety: addr came from a successful shmat and is detached exactly
        // once.
        let rc = unsafe { libc::shmdt(self.addr.cast::<libc::c_void>()) };
        if rc == -1 {
            warn!(
                "Failed to detach segment {}: {}",
                self.id,
                std::io::Error::last_os_error()
            );
        }
    }
}

/// Fold a wide instance id into the 32-bit, non-zero System-V key space.
///
/// Key 0 is IPC_PRIVATE and would allocate a fresh segment per attach, so
/// the fold lands in 1..=i32::MAX-1.
fn fold_key(id: u64) -> i32 {
    (id % (i32::MAX as u64 - 1)) as i32 + 1
}

/// IPC store backed by System-V shared memory.
///
/// The reference backing: status and pids written here survive the original
/// caller process and are visible to any process that derives the same
/// task identity.
pub struct SharedMemoryStore {
    identity: Option<TaskIdentity>,
    instance: Option<ShmSegment>,
    group: Option<ShmSegment>,
}

impl SharedMemoryStore {
    /// Create an unbound store
    pub fn new() -> Self {
        Self {
            identity: None,
            instance: None,
            group: None,
        }
    }
}

impl Default for SharedMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SharedMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemoryStore")
            .field("identity", &self.identity)
            .field("attached", &self.instance.is_some())
            .finish()
    }
}

impl IpcStore for SharedMemoryStore {
    fn bind(&mut self, identity: TaskIdentity) {
        self.identity = Some(identity);
    }

    fn identity(&self) -> Option<&TaskIdentity> {
        self.identity.as_ref()
    }

    fn initialize(&mut self) -> Result<()> {
        let identity = self.identity.ok_or(IpcError::Unbound)?;

        // Always re-attach: after a teardown the old key resolves to a new,
        // empty segment, which is exactly where a fresh run must land.
        self.instance = Some(ShmSegment::attach(fold_key(identity.id()))?);
        self.group = Some(ShmSegment::attach(identity.definition_key())?);
        Ok(())
    }

    fn teardown(&mut self, including_group: bool) {
        if let Some(segment) = &self.instance {
            segment.mark_removed();
        }
        if including_group {
            if let Some(segment) = &self.group {
                segment.mark_removed();
            }
        }
    }

    fn has(&self, key: &str) -> bool {
        self.instance
            .as_ref()
            .is_some_and(|seg| seg.get(slot_key(key)).is_some())
    }

    fn get(&self, key: &str) -> Option<Value> {
        let data = self.instance.as_ref()?.get(slot_key(key))?;
        serde_json::from_slice(&data).ok()
    }

    fn remove(&mut self, key: &str) -> bool {
        self.instance
            .as_ref()
            .is_some_and(|seg| seg.remove(slot_key(key)))
    }

    fn write(&mut self, key: &str, value: Value) -> Result<()> {
        let segment = self.instance.as_ref().ok_or(IpcError::Uninitialized)?;
        let data = serde_json::to_vec(&value)
            .map_err(|e| IpcError::SerializationFailed(e.to_string()))?;

        segment
            .put(slot_key(key), data)
            .map_err(|()| IpcError::WriteFailed {
                key: key.to_string(),
                segment: segment.id,
            })
    }

    fn backend_name(&self) -> &'static str {
        "shared-memory"
    }
}
