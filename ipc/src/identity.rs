//! Task identity derivation
//!
//! A task identity must be reproducible across unrelated process invocations
//! on the same machine: any process that constructs the same task type with
//! the same ordinal has to land on the same store namespace. The caller
//! supplies a [`TaskOrigin`] (a filesystem path naming the defining code
//! unit plus a locator for the instantiation site, typically
//! `TaskOrigin::new(file!(), line!())`), and the definition key is derived
//! from the path with the System-V `ftok` scheme.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Project id fed to `ftok`; fixed so every process derives the same key.
const FTOK_PROJECT_ID: libc::c_int = b'A' as libc::c_int;

/// Identity derivation error types
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("The conversion of the path {path:?} to a System V IPC key failed")]
    KeyDerivation { path: PathBuf },

    #[error("Cannot resolve origin path {path:?}: {reason}")]
    UnresolvablePath { path: PathBuf, reason: String },

    #[error("Derived task id '{digits}' overflows the identity space")]
    IdOverflow { digits: String },
}

impl IdentityError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            IdentityError::KeyDerivation { .. } => "IDN001",
            IdentityError::UnresolvablePath { .. } => "IDN002",
            IdentityError::IdOverflow { .. } => "IDN003",
        }
    }
}

/// Where a task type is defined and instantiated.
///
/// The path names the defining code unit and must exist on disk when the
/// identity is derived; the locator distinguishes instantiation sites within
/// that unit (a line number works well).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOrigin {
    path: PathBuf,
    locator: u32,
}

impl TaskOrigin {
    /// Create an origin from a defining path and an instantiation locator
    pub fn new(path: impl Into<PathBuf>, locator: u32) -> Self {
        Self {
            path: path.into(),
            locator,
        }
    }

    /// The defining path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The instantiation locator
    pub fn locator(&self) -> u32 {
        self.locator
    }
}

/// Stable identity of one task instance.
///
/// `definition_key` is shared by every instance of the same task type and is
/// the grouping key; `id` is unique per (type, ordinal) pair and addresses
/// the per-instance store namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskIdentity {
    definition_key: i32,
    id: u64,
    ordinal: u32,
}

impl TaskIdentity {
    /// Derive the identity for an origin and instance ordinal.
    ///
    /// The definition key comes from `ftok(path, 'A')` on the canonicalized
    /// origin path; the id is the decimal-digit concatenation of the
    /// definition key, the locator, and the ordinal.
    ///
    /// # Errors
    ///
    /// Returns an error if the origin path cannot be canonicalized, the
    /// `ftok` conversion fails, or the concatenated id does not fit the
    /// identity space.
    pub fn derive(origin: &TaskOrigin, ordinal: u32) -> Result<Self, IdentityError> {
        let canonical = std::fs::canonicalize(origin.path()).map_err(|e| {
            IdentityError::UnresolvablePath {
                path: origin.path().to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        let definition_key = ftok(&canonical)?;

        let digits = format!("{}{}{}", definition_key, origin.locator(), ordinal);
        let id = digits
            .parse::<u64>()
            .map_err(|_| IdentityError::IdOverflow { digits })?;

        Ok(Self {
            definition_key,
            id,
            ordinal,
        })
    }

    /// Key shared by every instance of the same task type
    pub fn definition_key(&self) -> i32 {
        self.definition_key
    }

    /// Per-instance store namespace key
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Caller-supplied instance ordinal
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }
}

/// Convert a path to a System V IPC key.
fn ftok(path: &Path) -> Result<i32, IdentityError> {
    let bytes = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        IdentityError::KeyDerivation {
            path: path.to_path_buf(),
        }
    })?;

    // Safety: `bytes` is a valid NUL-terminated string that outlives the
    // call; ftok only reads the path.
    let key = unsafe { libc::ftok(bytes.as_ptr(), FTOK_PROJECT_ID) };
    if key == -1 {
        return Err(IdentityError::KeyDerivation {
            path: path.to_path_buf(),
        });
    }

    Ok(key as i32)
}
