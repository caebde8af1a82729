// src/inode.rs
use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::error::{LfsError, Result};
use crate::fs::Lfs;
use crate::layout::{
    empty_pointer_table, imap_blocks_for, is_unallocated, read_pointer, write_pointer, INODE_RECORD_SIZE,
    LFS_BLOCK_SIZE, MAX_FILE_SIZE, NUM_DIRECT_BLOCKS, POINTERS_PER_BLOCK, ROOT_INO,
};

const BLOCK: u64 = LFS_BLOCK_SIZE as u64;

/// Per-file record mapping logical blocks to log addresses.
///
/// An `Inode` is a plain value: `read` and `write` take no lock. Two writers
/// holding copies of the same inode race on the pointer array, so callers
/// serialize access per id (see [`crate::ops::Dispatcher`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    id: u32,
    filesize: u32,
    direct_blocks: [u32; NUM_DIRECT_BLOCKS],
    indirect_block: u32,
    is_directory: bool,
}

/// Where a logical block lives.
enum Slot {
    Direct(usize),
    Indirect(usize),
}

fn slot_for(block: u64) -> Result<Slot> {
    if block < NUM_DIRECT_BLOCKS as u64 {
        return Ok(Slot::Direct(block as usize));
    }
    let slot = block - NUM_DIRECT_BLOCKS as u64;
    if slot >= POINTERS_PER_BLOCK as u64 {
        return Err(LfsError::CapacityExceeded { block });
    }
    Ok(Slot::Indirect(slot as usize))
}

impl Inode {
    fn empty(id: u32, is_directory: bool) -> Self {
        Self {
            id,
            filesize: 0,
            direct_blocks: [0; NUM_DIRECT_BLOCKS],
            indirect_block: 0,
            is_directory,
        }
    }

    /// Allocates a fresh id and registers the empty record in the inode map.
    ///
    /// Fails with `NoSpace` when the log could not hold a checkpoint covering
    /// ids up to the new one.
    pub fn create(lfs: &Lfs, is_directory: bool) -> Result<Self> {
        // only the id step is serialized
        let id = lfs
            .ids
            .allocate_with(|id| lfs.segments.hold_for_checkpoint(imap_blocks_for(id)))?;
        let inode = Self::empty(id, is_directory);
        lfs.inode_map.update(id, inode.serialize());
        debug!("inode {} created (directory = {})", id, is_directory);
        Ok(inode)
    }

    /// Root directory record for a freshly formatted volume.
    pub(crate) fn root() -> Self {
        Self::empty(ROOT_INO, true)
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        id: u32,
        filesize: u32,
        direct_blocks: [u32; NUM_DIRECT_BLOCKS],
        indirect_block: u32,
        is_directory: bool,
    ) -> Self {
        Self {
            id,
            filesize,
            direct_blocks,
            indirect_block,
            is_directory,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn filesize(&self) -> u32 {
        self.filesize
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    pub fn direct_blocks(&self) -> &[u32; NUM_DIRECT_BLOCKS] {
        &self.direct_blocks
    }

    /// `0` when no indirect block was allocated yet.
    pub fn indirect_block(&self) -> u32 {
        self.indirect_block
    }

    // -------------------- Record layout --------------------

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0u8; INODE_RECORD_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.id);
        LittleEndian::write_u32(&mut buf[4..8], self.filesize);
        let end = 8 + 4 * NUM_DIRECT_BLOCKS;
        LittleEndian::write_u32_into(&self.direct_blocks, &mut buf[8..end]);
        LittleEndian::write_u32(&mut buf[end..end + 4], self.indirect_block);
        buf[end + 4] = self.is_directory as u8;
        buf
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < INODE_RECORD_SIZE {
            return Err(LfsError::format(
                "inode",
                format!("{} bytes, expected {}", bytes.len(), INODE_RECORD_SIZE),
            ));
        }

        let end = 8 + 4 * NUM_DIRECT_BLOCKS;
        let is_directory = match bytes[end + 4] {
            0 => false,
            1 => true,
            tag => return Err(LfsError::format("inode", format!("directory tag {}", tag))),
        };

        let mut direct_blocks = [0u32; NUM_DIRECT_BLOCKS];
        LittleEndian::read_u32_into(&bytes[8..end], &mut direct_blocks);

        Ok(Self {
            id: LittleEndian::read_u32(&bytes[0..4]),
            filesize: LittleEndian::read_u32(&bytes[4..8]),
            direct_blocks,
            indirect_block: LittleEndian::read_u32(&bytes[end..end + 4]),
            is_directory,
        })
    }

    // -------------------- Block addressing --------------------

    /// Log address of `block`, or `None` if it was never written.
    fn block_address(&self, lfs: &Lfs, block: u64) -> Result<Option<u32>> {
        let addr = match slot_for(block)? {
            Slot::Direct(i) => self.direct_blocks[i],
            Slot::Indirect(slot) => {
                if self.indirect_block == 0 {
                    return Ok(None);
                }
                let table = lfs.segments.block_read(self.indirect_block)?;
                read_pointer(&table, slot)
            }
        };
        Ok(if is_unallocated(addr) { None } else { Some(addr) })
    }

    fn block_exists(&self, lfs: &Lfs, block: u64) -> Result<bool> {
        Ok(self.block_address(lfs, block)?.is_some())
    }

    fn block_contents(&self, lfs: &Lfs, block: u64) -> Result<Vec<u8>> {
        match self.block_address(lfs, block)? {
            Some(addr) => lfs.segments.block_read(addr),
            None => Err(LfsError::LogicalMiss { ino: self.id, block }),
        }
    }

    /// Points `block` at `addr`. The indirect block, when touched, is itself
    /// rewritten to a fresh log address.
    fn attach_block(&mut self, lfs: &Lfs, block: u64, addr: u32) -> Result<()> {
        match slot_for(block)? {
            Slot::Direct(i) => self.direct_blocks[i] = addr,
            Slot::Indirect(slot) => {
                let mut table = if self.indirect_block == 0 {
                    empty_pointer_table()
                } else {
                    lfs.segments.block_read(self.indirect_block)?
                };
                write_pointer(&mut table, slot, addr);
                self.indirect_block = lfs.segments.write_to_new_block(&table)?;
            }
        }
        Ok(())
    }

    // -------------------- Data path --------------------

    /// Reads up to `length` bytes from `offset`; short or empty past EOF.
    pub fn read(&self, lfs: &Lfs, offset: u64, length: usize) -> Result<Vec<u8>> {
        let size = self.filesize as u64;
        if offset >= size {
            return Ok(Vec::new());
        }
        let amount = (length as u64).min(size - offset) as usize;

        let mut data = Vec::with_capacity(amount);
        let mut block = offset / BLOCK;
        let mut in_block = (offset % BLOCK) as usize;
        while data.len() < amount {
            let contents = self.block_contents(lfs, block)?;
            let take = (amount - data.len()).min(LFS_BLOCK_SIZE - in_block);
            data.extend_from_slice(&contents[in_block..in_block + take]);
            in_block = 0;
            block += 1;
        }
        Ok(data)
    }

    /// Writes `data` at `offset`, appending every touched block to the log.
    ///
    /// With `defer_map_update` the inode map is left stale; the caller must push
    /// the record (e.g. via [`Lfs::store_inode`]) before anyone reloads it.
    /// On error `self` is unchanged; blocks already appended are orphaned.
    pub fn write(&mut self, lfs: &Lfs, offset: u64, data: &[u8], defer_map_update: bool) -> Result<()> {
        let end = offset.saturating_add(data.len() as u64);
        if end > MAX_FILE_SIZE {
            // the whole range must be addressable before any block is appended
            return Err(LfsError::CapacityExceeded {
                block: (end - 1) / BLOCK,
            });
        }

        let mut next = self.clone();
        next.splice(lfs, offset, data)?;
        next.filesize = next.filesize.max(end as u32);
        if !defer_map_update {
            lfs.inode_map.update(next.id, next.serialize());
        }
        *self = next;
        Ok(())
    }

    fn splice(&mut self, lfs: &Lfs, offset: u64, data: &[u8]) -> Result<()> {
        let mut block = offset / BLOCK;
        let mut in_block = (offset % BLOCK) as usize;
        let mut rest = data;
        while !rest.is_empty() {
            let take = rest.len().min(LFS_BLOCK_SIZE - in_block);

            // 1. copy of the old block, unless every byte is replaced
            let mut buf = if take < LFS_BLOCK_SIZE && self.block_exists(lfs, block)? {
                self.block_contents(lfs, block)?
            } else {
                vec![0u8; LFS_BLOCK_SIZE]
            };

            // 2. splice the new bytes in
            buf[in_block..in_block + take].copy_from_slice(&rest[..take]);

            // 3. append and repoint
            let addr = lfs.segments.write_to_new_block(&buf)?;
            self.attach_block(lfs, block, addr)?;

            rest = &rest[take..];
            in_block = 0;
            block += 1;
        }
        Ok(())
    }
}
