// src/ops.rs
//! Typed command surface over a mounted volume.
//!
//! Front ends drive the file system through [`Command`] values. The
//! [`Dispatcher`] holds one mutex per inode around every load-mutate-store
//! sequence; this is the locking contract the core relies on, since
//! [`Inode::write`](crate::Inode::write) itself takes no lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;

use crate::error::{LfsError, Result};
use crate::fs::Lfs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Create { is_directory: bool },
    Write { ino: u32, offset: u64, data: Vec<u8> },
    Read { ino: u32, offset: u64, length: usize },
    Stat { ino: u32 },
    Sync,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Created { ino: u32 },
    Written { bytes: usize, filesize: u32 },
    Data(Vec<u8>),
    Stat { filesize: u32, is_directory: bool },
    Synced { sequence: u64 },
}

pub struct Dispatcher {
    lfs: Arc<Lfs>,
    locks: Mutex<HashMap<u32, Arc<Mutex<()>>>>,
}

impl Dispatcher {
    pub fn new(lfs: Arc<Lfs>) -> Self {
        Self {
            lfs,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn lfs(&self) -> &Arc<Lfs> {
        &self.lfs
    }

    /// Lock for `ino`. Unknown ids get no entry; ids are never removed, so a
    /// known id stays valid once checked.
    fn inode_lock(&self, ino: u32) -> Result<Arc<Mutex<()>>> {
        if !self.lfs.inode_map().contains(ino) {
            return Err(LfsError::NotFound(ino));
        }
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(locks.entry(ino).or_default()))
    }

    pub fn execute(&self, command: Command) -> Result<Reply> {
        debug!("dispatch: {:?}", Summary(&command));
        match command {
            Command::Create { is_directory } => {
                let inode = self.lfs.create_inode(is_directory)?;
                Ok(Reply::Created { ino: inode.id() })
            }

            Command::Write { ino, offset, data } => {
                let lock = self.inode_lock(ino)?;
                let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                let mut inode = self.lfs.load_inode(ino)?;
                inode.write(&self.lfs, offset, &data, false)?;
                Ok(Reply::Written {
                    bytes: data.len(),
                    filesize: inode.filesize(),
                })
            }

            Command::Read { ino, offset, length } => {
                let lock = self.inode_lock(ino)?;
                let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                let inode = self.lfs.load_inode(ino)?;
                Ok(Reply::Data(inode.read(&self.lfs, offset, length)?))
            }

            Command::Stat { ino } => {
                let inode = self.lfs.load_inode(ino)?;
                Ok(Reply::Stat {
                    filesize: inode.filesize(),
                    is_directory: inode.is_directory(),
                })
            }

            Command::Sync => {
                self.lfs.checkpoint()?;
                Ok(Reply::Synced {
                    sequence: self.lfs.checkpoint_sequence(),
                })
            }
        }
    }
}

/// Logs a command without dumping its payload.
struct Summary<'a>(&'a Command);

impl std::fmt::Debug for Summary<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Command::Write { ino, offset, data } => {
                write!(f, "Write {{ ino: {}, offset: {}, len: {} }}", ino, offset, data.len())
            }
            other => write!(f, "{:?}", other),
        }
    }
}
