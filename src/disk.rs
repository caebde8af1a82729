// src/disk.rs
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crate::layout::LFS_BLOCK_SIZE;

/// Fixed-size block storage. Every call moves exactly one block.
pub trait BlockDevice: Send + Sync {
    fn block_count(&self) -> u32;
    fn read_block(&self, addr: u32) -> io::Result<Vec<u8>>;
    fn write_block(&self, addr: u32, data: &[u8]) -> io::Result<()>;
    fn flush(&self) -> io::Result<()>;
}

fn check_range(addr: u32, block_count: u32) -> io::Result<()> {
    if addr >= block_count {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("block {} out of range ({} blocks)", addr, block_count),
        ));
    }
    Ok(())
}

/// Pads short buffers with zeros and cuts long ones to one block.
fn to_block(data: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; LFS_BLOCK_SIZE];
    let n = data.len().min(LFS_BLOCK_SIZE);
    buf[..n].copy_from_slice(&data[..n]);
    buf
}

// -----------------------------------------------------------------------------
// Image file
// -----------------------------------------------------------------------------

#[derive(Debug)]
pub struct FileDevice {
    file: Mutex<File>,
    block_count: u32,
}

impl FileDevice {
    /// Opens (or creates) an image and sizes it to `block_count` blocks.
    pub fn create(path: &Path, block_count: u32) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len(block_count as u64 * LFS_BLOCK_SIZE as u64)?;
        Ok(Self {
            file: Mutex::new(file),
            block_count,
        })
    }

    /// Opens an existing image; its length decides the block count.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let block_count = u32::try_from(len / LFS_BLOCK_SIZE as u64).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, "image too large for 32-bit addresses")
        })?;
        Ok(Self {
            file: Mutex::new(file),
            block_count,
        })
    }
}

impl BlockDevice for FileDevice {
    fn block_count(&self) -> u32 {
        self.block_count
    }

    fn read_block(&self, addr: u32) -> io::Result<Vec<u8>> {
        check_range(addr, self.block_count)?;
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.seek(SeekFrom::Start(addr as u64 * LFS_BLOCK_SIZE as u64))?;
        let mut buf = vec![0u8; LFS_BLOCK_SIZE];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_block(&self, addr: u32, data: &[u8]) -> io::Result<()> {
        check_range(addr, self.block_count)?;
        let buf = to_block(data);
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.seek(SeekFrom::Start(addr as u64 * LFS_BLOCK_SIZE as u64))?;
        file.write_all(&buf)
    }

    fn flush(&self) -> io::Result<()> {
        let file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.sync_data()
    }
}

// -----------------------------------------------------------------------------
// In-memory device
// -----------------------------------------------------------------------------

#[derive(Debug)]
pub struct MemDevice {
    blocks: Mutex<Vec<Vec<u8>>>,
}

impl MemDevice {
    pub fn new(block_count: u32) -> Self {
        Self {
            blocks: Mutex::new(vec![vec![0u8; LFS_BLOCK_SIZE]; block_count as usize]),
        }
    }
}

impl BlockDevice for MemDevice {
    fn block_count(&self) -> u32 {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner).len() as u32
    }

    fn read_block(&self, addr: u32) -> io::Result<Vec<u8>> {
        let blocks = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);
        check_range(addr, blocks.len() as u32)?;
        Ok(blocks[addr as usize].clone())
    }

    fn write_block(&self, addr: u32, data: &[u8]) -> io::Result<()> {
        let mut blocks = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);
        check_range(addr, blocks.len() as u32)?;
        blocks[addr as usize] = to_block(data);
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}
