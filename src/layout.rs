// src/layout.rs
use byteorder::{ByteOrder, LittleEndian};

use crate::error::{LfsError, Result};

// -----------------------------------------------------------------------------
// Constants and on-disk structures
// -----------------------------------------------------------------------------

pub const LFS_BLOCK_SIZE: usize = 1024;
pub const LFS_MAGIC: u32 = 0x3153_464C; // "LFS1"
pub const LFS_VERSION: u32 = 1;

pub const CHECKPOINT_MAGIC: u32 = 0x5043_464C; // "LFCP"
pub const IMAP_MAGIC: u32 = 0x4D49_464C; // "LFIM"

pub const ROOT_INO: u32 = 1;

/// Can go up to 252 and still fit a record in one block; baked into the record.
pub const NUM_DIRECT_BLOCKS: usize = 100;

/// Pointer slots in an indirect block.
pub const POINTERS_PER_BLOCK: usize = LFS_BLOCK_SIZE / 4;

/// Marks an empty indirect slot. No device has this many blocks.
pub const INVALID_BLOCK_ADDRESS: u32 = u32::MAX;

/// id + filesize + direct pointers + indirect pointer + directory flag.
pub const INODE_RECORD_SIZE: usize = 4 + 4 + 4 * NUM_DIRECT_BLOCKS + 4 + 1;

pub const MAX_FILE_BLOCKS: u64 = (NUM_DIRECT_BLOCKS + POINTERS_PER_BLOCK) as u64;
pub const MAX_FILE_SIZE: u64 = MAX_FILE_BLOCKS * LFS_BLOCK_SIZE as u64;

pub const SUPERBLOCK_ADDR: u32 = 0;
pub const CHECKPOINT_A_ADDR: u32 = 1;
pub const CHECKPOINT_B_ADDR: u32 = 2;
pub const LOG_START: u32 = 3;

const IMAP_HEADER_SIZE: usize = 12;
pub const IMAP_RECORDS_PER_BLOCK: usize = (LFS_BLOCK_SIZE - IMAP_HEADER_SIZE) / INODE_RECORD_SIZE;

/// Log blocks one checkpoint needs to persist `records` inode records.
pub fn imap_blocks_for(records: u32) -> u32 {
    let per_block = IMAP_RECORDS_PER_BLOCK as u32;
    records / per_block + u32::from(records % per_block != 0)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SuperblockDisk {
    pub magic: u32,
    pub version: u32,
    pub block_size: u32,
    pub total_blocks: u32,
    pub segment_blocks: u32,
    pub segment_count: u32,
    pub log_start: u32,
    pub checkpoint_a: u32,
    pub checkpoint_b: u32,
    pub direct_blocks: u32,
}

impl SuperblockDisk {
    const FIELDS: usize = 10;

    /// Lays out a fresh volume over `total_blocks`.
    pub fn new(total_blocks: u32, segment_blocks: u32) -> Result<Self> {
        if segment_blocks == 0 {
            return Err(LfsError::format("superblock", "segment_blocks must be > 0"));
        }
        let segment_count = total_blocks.saturating_sub(LOG_START) / segment_blocks;
        if segment_count == 0 {
            return Err(LfsError::format(
                "superblock",
                format!(
                    "{} blocks cannot hold a single {}-block segment after {} reserved blocks",
                    total_blocks, segment_blocks, LOG_START
                ),
            ));
        }

        Ok(Self {
            magic: LFS_MAGIC,
            version: LFS_VERSION,
            block_size: LFS_BLOCK_SIZE as u32,
            total_blocks,
            segment_blocks,
            segment_count,
            log_start: LOG_START,
            checkpoint_a: CHECKPOINT_A_ADDR,
            checkpoint_b: CHECKPOINT_B_ADDR,
            direct_blocks: NUM_DIRECT_BLOCKS as u32,
        })
    }

    /// First address past the last segment. Saturates on geometry that
    /// `from_block` would reject.
    pub fn log_end(&self) -> u32 {
        self.segment_count
            .saturating_mul(self.segment_blocks)
            .saturating_add(self.log_start)
    }

    pub fn to_block(&self) -> Vec<u8> {
        let fields = [
            self.magic,
            self.version,
            self.block_size,
            self.total_blocks,
            self.segment_blocks,
            self.segment_count,
            self.log_start,
            self.checkpoint_a,
            self.checkpoint_b,
            self.direct_blocks,
        ];
        let mut buf = vec![0u8; LFS_BLOCK_SIZE];
        LittleEndian::write_u32_into(&fields, &mut buf[..Self::FIELDS * 4]);
        buf
    }

    /// Parses and validates block 0.
    pub fn from_block(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::FIELDS * 4 {
            return Err(LfsError::format("superblock", format!("{} bytes", buf.len())));
        }
        let mut f = [0u32; Self::FIELDS];
        LittleEndian::read_u32_into(&buf[..Self::FIELDS * 4], &mut f);

        let sb = Self {
            magic: f[0],
            version: f[1],
            block_size: f[2],
            total_blocks: f[3],
            segment_blocks: f[4],
            segment_count: f[5],
            log_start: f[6],
            checkpoint_a: f[7],
            checkpoint_b: f[8],
            direct_blocks: f[9],
        };

        if sb.magic != LFS_MAGIC {
            return Err(LfsError::format(
                "superblock",
                format!("magic mismatch (expected {:#X}, read {:#X})", LFS_MAGIC, sb.magic),
            ));
        }
        if sb.version != LFS_VERSION {
            return Err(LfsError::format(
                "superblock",
                format!("unsupported version {} (expected {})", sb.version, LFS_VERSION),
            ));
        }
        if sb.block_size as usize != LFS_BLOCK_SIZE || sb.direct_blocks as usize != NUM_DIRECT_BLOCKS {
            return Err(LfsError::format(
                "superblock",
                format!(
                    "built for block_size={} direct={}, image has block_size={} direct={}",
                    LFS_BLOCK_SIZE, NUM_DIRECT_BLOCKS, sb.block_size, sb.direct_blocks
                ),
            ));
        }
        if sb.log_start != LOG_START
            || sb.checkpoint_a != CHECKPOINT_A_ADDR
            || sb.checkpoint_b != CHECKPOINT_B_ADDR
        {
            return Err(LfsError::format(
                "superblock",
                format!(
                    "reserved blocks moved (log_start={}, checkpoints {} and {})",
                    sb.log_start, sb.checkpoint_a, sb.checkpoint_b
                ),
            ));
        }
        let log_end = sb
            .segment_count
            .checked_mul(sb.segment_blocks)
            .and_then(|len| len.checked_add(sb.log_start));
        match log_end {
            Some(end) if sb.segment_blocks > 0 && sb.segment_count > 0 && end <= sb.total_blocks => {
                Ok(sb)
            }
            _ => Err(LfsError::format(
                "superblock",
                format!(
                    "{} segments of {} blocks do not fit {} blocks",
                    sb.segment_count, sb.segment_blocks, sb.total_blocks
                ),
            )),
        }
    }
}

/// Commit record written alternately to the two checkpoint regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckpointDisk {
    pub sequence: u64,
    pub log_cursor: u32,
    pub next_inode_id: u32,
    pub imap_head: u32,
    pub imap_blocks: u32,
    pub inode_count: u32,
}

impl CheckpointDisk {
    const SIZE: usize = 4 + 4 + 8 + 4 * 5;

    pub fn to_block(&self) -> Vec<u8> {
        let mut buf = vec![0u8; LFS_BLOCK_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], CHECKPOINT_MAGIC);
        LittleEndian::write_u32(&mut buf[4..8], LFS_VERSION);
        LittleEndian::write_u64(&mut buf[8..16], self.sequence);
        LittleEndian::write_u32_into(
            &[
                self.log_cursor,
                self.next_inode_id,
                self.imap_head,
                self.imap_blocks,
                self.inode_count,
            ],
            &mut buf[16..Self::SIZE],
        );
        buf
    }

    pub fn from_block(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(LfsError::format("checkpoint", format!("{} bytes", buf.len())));
        }
        let magic = LittleEndian::read_u32(&buf[0..4]);
        if magic != CHECKPOINT_MAGIC {
            return Err(LfsError::format("checkpoint", format!("bad magic {:#X}", magic)));
        }
        let version = LittleEndian::read_u32(&buf[4..8]);
        if version != LFS_VERSION {
            return Err(LfsError::format("checkpoint", format!("version {}", version)));
        }
        let mut f = [0u32; 5];
        LittleEndian::read_u32_into(&buf[16..Self::SIZE], &mut f);
        Ok(Self {
            sequence: LittleEndian::read_u64(&buf[8..16]),
            log_cursor: f[0],
            next_inode_id: f[1],
            imap_head: f[2],
            imap_blocks: f[3],
            inode_count: f[4],
        })
    }

    /// Region this checkpoint belongs in; odd sequences go to A.
    pub fn region(&self, sb: &SuperblockDisk) -> u32 {
        if self.sequence % 2 == 1 {
            sb.checkpoint_a
        } else {
            sb.checkpoint_b
        }
    }
}

// -------------------- Indirect blocks --------------------

pub fn empty_pointer_table() -> Vec<u8> {
    let mut buf = vec![0u8; LFS_BLOCK_SIZE];
    LittleEndian::write_u32_into(&[INVALID_BLOCK_ADDRESS; POINTERS_PER_BLOCK], &mut buf);
    buf
}

pub fn read_pointer(table: &[u8], slot: usize) -> u32 {
    LittleEndian::read_u32(&table[slot * 4..slot * 4 + 4])
}

pub fn write_pointer(table: &mut [u8], slot: usize, addr: u32) {
    LittleEndian::write_u32(&mut table[slot * 4..slot * 4 + 4], addr);
}

/// Decodes every slot of an indirect block.
pub fn parse_pointer_table(table: &[u8]) -> Vec<u32> {
    let slots = (table.len() / 4).min(POINTERS_PER_BLOCK);
    let mut out = vec![0u32; slots];
    LittleEndian::read_u32_into(&table[..slots * 4], &mut out);
    out
}

/// A slot that holds no data: the sentinel, or the never-a-log-address 0.
pub fn is_unallocated(addr: u32) -> bool {
    addr == 0 || addr == INVALID_BLOCK_ADDRESS
}

// -------------------- Inode map blocks --------------------

/// One link of the persisted inode map chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapBlock {
    pub next: u32,
    pub records: Vec<Vec<u8>>,
}

impl ImapBlock {
    pub fn to_block(&self) -> Vec<u8> {
        let mut buf = vec![0u8; LFS_BLOCK_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], IMAP_MAGIC);
        LittleEndian::write_u32(&mut buf[4..8], self.next);
        LittleEndian::write_u32(&mut buf[8..12], self.records.len() as u32);
        for (i, record) in self.records.iter().take(IMAP_RECORDS_PER_BLOCK).enumerate() {
            let start = IMAP_HEADER_SIZE + i * INODE_RECORD_SIZE;
            let len = record.len().min(INODE_RECORD_SIZE);
            buf[start..start + len].copy_from_slice(&record[..len]);
        }
        buf
    }

    pub fn from_block(buf: &[u8]) -> Result<Self> {
        if buf.len() < IMAP_HEADER_SIZE {
            return Err(LfsError::format("imap block", format!("{} bytes", buf.len())));
        }
        let magic = LittleEndian::read_u32(&buf[0..4]);
        if magic != IMAP_MAGIC {
            return Err(LfsError::format("imap block", format!("bad magic {:#X}", magic)));
        }
        let next = LittleEndian::read_u32(&buf[4..8]);
        let count = LittleEndian::read_u32(&buf[8..12]) as usize;
        if count > IMAP_RECORDS_PER_BLOCK
            || IMAP_HEADER_SIZE + count * INODE_RECORD_SIZE > buf.len()
        {
            return Err(LfsError::format("imap block", format!("{} records", count)));
        }

        let records = (0..count)
            .map(|i| {
                let start = IMAP_HEADER_SIZE + i * INODE_RECORD_SIZE;
                buf[start..start + INODE_RECORD_SIZE].to_vec()
            })
            .collect();
        Ok(Self { next, records })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_fits_in_block_and_imap_holds_two() {
        assert_eq!(INODE_RECORD_SIZE, 413);
        assert_eq!(POINTERS_PER_BLOCK, 256);
        assert_eq!(IMAP_RECORDS_PER_BLOCK, 2);
        assert_eq!(MAX_FILE_BLOCKS, 356);
    }

    #[test]
    fn superblock_rejects_foreign_magic() {
        let mut block = SuperblockDisk::new(128, 16).unwrap().to_block();
        block[0] ^= 0xFF;
        assert!(matches!(
            SuperblockDisk::from_block(&block),
            Err(LfsError::Format { what: "superblock", .. })
        ));
    }

    #[test]
    fn superblock_drops_partial_trailing_segment() {
        let sb = SuperblockDisk::new(3 + 16 * 4 + 5, 16).unwrap();
        assert_eq!(sb.segment_count, 4);
        assert_eq!(sb.log_end(), 3 + 64);
        assert_eq!(SuperblockDisk::from_block(&sb.to_block()).unwrap(), sb);
    }

    fn patched(sb: &SuperblockDisk, field: usize, value: u32) -> Vec<u8> {
        let mut block = sb.to_block();
        LittleEndian::write_u32(&mut block[field * 4..field * 4 + 4], value);
        block
    }

    #[test]
    fn superblock_geometry_overflow_is_a_format_error() {
        let sb = SuperblockDisk::new(128, 16).unwrap();
        let mut block = patched(&sb, 4, 0x1_0000);
        LittleEndian::write_u32(&mut block[20..24], 0x10_0000);
        assert!(matches!(
            SuperblockDisk::from_block(&block),
            Err(LfsError::Format { what: "superblock", .. })
        ));
        assert!(SuperblockDisk::from_block(&patched(&sb, 5, 0)).is_err());
        assert!(SuperblockDisk::from_block(&patched(&sb, 4, 0)).is_err());
    }

    #[test]
    fn superblock_reserved_addresses_are_fixed() {
        let sb = SuperblockDisk::new(128, 16).unwrap();
        // log_start, checkpoint_a, checkpoint_b
        for (field, value) in [(6, 0), (6, 4), (7, 0), (7, 2), (8, 1), (8, 7)] {
            assert!(
                matches!(
                    SuperblockDisk::from_block(&patched(&sb, field, value)),
                    Err(LfsError::Format { what: "superblock", .. })
                ),
                "field {} = {} accepted",
                field,
                value
            );
        }
    }

    #[test]
    fn imap_reserve_rounds_up() {
        assert_eq!(imap_blocks_for(0), 0);
        assert_eq!(imap_blocks_for(1), 1);
        assert_eq!(imap_blocks_for(2), 1);
        assert_eq!(imap_blocks_for(5), 3);
    }

    #[test]
    fn superblock_needs_room_for_one_segment() {
        assert!(SuperblockDisk::new(10, 16).is_err());
        assert!(SuperblockDisk::new(100, 0).is_err());
    }

    #[test]
    fn checkpoint_regions_alternate() {
        let sb = SuperblockDisk::new(128, 16).unwrap();
        let mut cp = CheckpointDisk {
            sequence: 1,
            log_cursor: 9,
            next_inode_id: 4,
            imap_head: 8,
            imap_blocks: 1,
            inode_count: 2,
        };
        assert_eq!(cp.region(&sb), CHECKPOINT_A_ADDR);
        cp.sequence = 2;
        assert_eq!(cp.region(&sb), CHECKPOINT_B_ADDR);
        assert_eq!(CheckpointDisk::from_block(&cp.to_block()).unwrap(), cp);
    }

    #[test]
    fn zeroed_region_is_not_a_checkpoint() {
        assert!(CheckpointDisk::from_block(&[0u8; LFS_BLOCK_SIZE]).is_err());
    }

    #[test]
    fn fresh_pointer_table_is_all_sentinels() {
        let table = empty_pointer_table();
        assert!(parse_pointer_table(&table).iter().all(|&p| p == INVALID_BLOCK_ADDRESS));

        let mut table = table;
        write_pointer(&mut table, 255, 42);
        assert_eq!(read_pointer(&table, 255), 42);
        assert_eq!(read_pointer(&table, 254), INVALID_BLOCK_ADDRESS);
    }

    #[test]
    fn imap_block_rejects_overfull_count() {
        let mut block = ImapBlock { next: 0, records: vec![] }.to_block();
        LittleEndian::write_u32(&mut block[8..12], 3);
        assert!(ImapBlock::from_block(&block).is_err());
    }
}
