// src/error.rs
use std::io;

use libc::{EFBIG, EINVAL, EIO, ENODATA, ENOENT, ENOSPC};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LfsError>;

#[derive(Debug, Error)]
pub enum LfsError {
    #[error("malformed {what}: {reason}")]
    Format { what: &'static str, reason: String },

    #[error("file's maximum size is reached (logical block {block})")]
    CapacityExceeded { block: u64 },

    #[error("block is empty: logical block {block} of inode {ino} was never written")]
    LogicalMiss { ino: u32, block: u64 },

    #[error("storage fault at block {addr}")]
    StorageFault {
        addr: u32,
        #[source]
        source: io::Error,
    },

    #[error("inode {0} not found")]
    NotFound(u32),

    #[error("no space left: {0}")]
    NoSpace(&'static str),
}

impl LfsError {
    pub(crate) fn format(what: &'static str, reason: impl Into<String>) -> Self {
        LfsError::Format {
            what,
            reason: reason.into(),
        }
    }

    /// Fault for an address the log never handed out.
    pub(crate) fn unwritten(addr: u32) -> Self {
        LfsError::StorageFault {
            addr,
            source: io::Error::new(io::ErrorKind::NotFound, "block was never written"),
        }
    }

    pub fn as_errno(&self) -> i32 {
        match self {
            LfsError::Format { .. } => EINVAL,
            LfsError::CapacityExceeded { .. } => EFBIG,
            LfsError::LogicalMiss { .. } => ENODATA,
            LfsError::StorageFault { .. } => EIO,
            LfsError::NotFound(_) => ENOENT,
            LfsError::NoSpace(_) => ENOSPC,
        }
    }

    /// `true` for conditions that retrying the same call cannot fix.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, LfsError::StorageFault { .. })
    }
}

/// Adapter for `map_err` on device results.
pub(crate) fn storage_fault(addr: u32) -> impl FnOnce(io::Error) -> LfsError {
    move |source| LfsError::StorageFault { addr, source }
}
