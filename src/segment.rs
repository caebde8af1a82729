// src/segment.rs
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::disk::BlockDevice;
use crate::error::{storage_fault, LfsError, Result};
use crate::layout::{SuperblockDisk, LFS_BLOCK_SIZE};

/// Write position of the log plus the blocks held back for the next
/// checkpoint.
#[derive(Debug)]
struct LogTail {
    next: u32,
    held: u32,
}

/// Append-only allocator over the log region of the device.
///
/// Addresses are handed out strictly in order from `log_start`. The segment a
/// block lands in is derived from its address; crossing a segment boundary needs
/// no extra bookkeeping beyond the usage counters.
///
/// The last `held` free blocks belong to the checkpoint. Data appends stop
/// short of them, so whatever was acknowledged can still be committed.
pub struct SegmentManager {
    device: Arc<dyn BlockDevice>,
    log_start: u32,
    log_end: u32,
    segment_blocks: u32,
    tail: Mutex<LogTail>,
    usage: Vec<AtomicU32>,
}

impl SegmentManager {
    /// Resumes the log at `cursor` (the first never-written address).
    pub fn new(device: Arc<dyn BlockDevice>, sb: &SuperblockDisk, cursor: u32) -> Result<Self> {
        let log_start = sb.log_start;
        let log_end = sb.log_end();
        if cursor < log_start || cursor > log_end {
            return Err(LfsError::format(
                "checkpoint",
                format!("log cursor {} outside [{}, {}]", cursor, log_start, log_end),
            ));
        }

        let usage = (0..sb.segment_count)
            .map(|seg| {
                let first = log_start + seg * sb.segment_blocks;
                let written = cursor.saturating_sub(first).min(sb.segment_blocks);
                AtomicU32::new(written)
            })
            .collect();

        Ok(Self {
            device,
            log_start,
            log_end,
            segment_blocks: sb.segment_blocks,
            tail: Mutex::new(LogTail { next: cursor, held: 0 }),
            usage,
        })
    }

    fn tail(&self) -> MutexGuard<'_, LogTail> {
        self.tail.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends one block and returns the address it landed at.
    pub fn write_to_new_block(&self, data: &[u8]) -> Result<u32> {
        let addr = self.reserve(false)?;
        self.put(addr, data)
    }

    /// Appends a checkpoint block; may dip into the held blocks.
    pub fn write_checkpoint_block(&self, data: &[u8]) -> Result<u32> {
        let addr = self.reserve(true)?;
        self.put(addr, data)
    }

    /// Raises the checkpoint hold to `blocks`, or fails with `NoSpace` if the
    /// log no longer has that many free blocks.
    pub fn hold_for_checkpoint(&self, blocks: u32) -> Result<()> {
        let mut tail = self.tail();
        if self.log_end - tail.next < blocks {
            return Err(LfsError::NoSpace("no room left to checkpoint a new inode"));
        }
        tail.held = tail.held.max(blocks);
        Ok(())
    }

    pub fn held_blocks(&self) -> u32 {
        self.tail().held
    }

    fn put(&self, addr: u32, data: &[u8]) -> Result<u32> {
        let mut block = vec![0u8; LFS_BLOCK_SIZE];
        let n = data.len().min(LFS_BLOCK_SIZE);
        block[..n].copy_from_slice(&data[..n]);

        self.device
            .write_block(addr, &block)
            .map_err(storage_fault(addr))?;
        debug!("log: wrote block {}", addr);
        Ok(addr)
    }

    /// Claims the next address. Device I/O happens after the lock is released.
    fn reserve(&self, for_checkpoint: bool) -> Result<u32> {
        let mut tail = self.tail();
        let addr = tail.next;
        if addr >= self.log_end {
            return Err(LfsError::NoSpace("every segment of the log is written"));
        }
        if !for_checkpoint && self.log_end - addr <= tail.held {
            return Err(LfsError::NoSpace("remaining log blocks are held for the checkpoint"));
        }
        tail.next += 1;

        let seg = (addr - self.log_start) / self.segment_blocks;
        self.usage[seg as usize].fetch_add(1, Ordering::Relaxed);
        if tail.next < self.log_end && (tail.next - self.log_start) % self.segment_blocks == 0 {
            debug!("log: segment {} full, rolling to segment {}", seg, seg + 1);
        }
        Ok(addr)
    }

    pub fn block_read(&self, addr: u32) -> Result<Vec<u8>> {
        if addr < self.log_start || addr >= self.cursor() {
            return Err(LfsError::unwritten(addr));
        }
        self.device.read_block(addr).map_err(storage_fault(addr))
    }

    pub fn cursor(&self) -> u32 {
        self.tail().next
    }

    pub fn segment_of(&self, addr: u32) -> Option<u32> {
        if addr < self.log_start || addr >= self.log_end {
            return None;
        }
        Some((addr - self.log_start) / self.segment_blocks)
    }

    /// Segment the next append goes to; `None` once the log is full.
    pub fn current_segment(&self) -> Option<u32> {
        self.segment_of(self.cursor())
    }

    /// Blocks written per segment, including superseded ones.
    pub fn segment_usage(&self) -> Vec<u32> {
        self.usage.iter().map(|u| u.load(Ordering::Relaxed)).collect()
    }

    pub fn free_blocks(&self) -> u32 {
        self.log_end - self.cursor()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::thread;

    use super::*;
    use crate::disk::MemDevice;
    use crate::layout::LOG_START;

    fn manager(segments: u32, segment_blocks: u32) -> SegmentManager {
        let total = LOG_START + segments * segment_blocks;
        let sb = SuperblockDisk::new(total, segment_blocks).unwrap();
        SegmentManager::new(Arc::new(MemDevice::new(total)), &sb, sb.log_start).unwrap()
    }

    #[test]
    fn appends_never_reuse_an_address() {
        let log = manager(4, 8);
        let mut seen = HashSet::new();
        for i in 0..32u8 {
            let addr = log.write_to_new_block(&[i]).unwrap();
            assert!(seen.insert(addr), "address {} returned twice", addr);
            assert_eq!(log.block_read(addr).unwrap()[0], i);
        }
    }

    #[test]
    fn rolls_across_segments_then_reports_full() {
        let log = manager(2, 4);
        let addrs: Vec<u32> = (0..8).map(|_| log.write_to_new_block(b"x").unwrap()).collect();
        assert_eq!(log.segment_of(addrs[3]), Some(0));
        assert_eq!(log.segment_of(addrs[4]), Some(1));
        assert_eq!(log.segment_usage(), vec![4, 4]);
        assert_eq!(log.current_segment(), None);

        assert!(matches!(log.write_to_new_block(b"y"), Err(LfsError::NoSpace(_))));
    }

    #[test]
    fn reading_unwritten_or_reserved_blocks_faults() {
        let log = manager(1, 8);
        let addr = log.write_to_new_block(b"data").unwrap();
        assert!(matches!(
            log.block_read(addr + 1),
            Err(LfsError::StorageFault { .. })
        ));
        assert!(matches!(log.block_read(0), Err(LfsError::StorageFault { addr: 0, .. })));
    }

    #[test]
    fn short_payload_is_zero_padded() {
        let log = manager(1, 4);
        let addr = log.write_to_new_block(b"abc").unwrap();
        let block = log.block_read(addr).unwrap();
        assert_eq!(block.len(), LFS_BLOCK_SIZE);
        assert!(block[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn concurrent_appenders_get_distinct_addresses() {
        let log = Arc::new(manager(8, 32));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    (0..32)
                        .map(|_| log.write_to_new_block(&[t as u8]).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for h in handles {
            for addr in h.join().unwrap() {
                assert!(all.insert(addr));
            }
        }
        assert_eq!(all.len(), 256);
        assert_eq!(log.free_blocks(), 0);
    }

    #[test]
    fn resume_recounts_usage_from_cursor() {
        let sb = SuperblockDisk::new(LOG_START + 3 * 4, 4).unwrap();
        let log = SegmentManager::new(Arc::new(MemDevice::new(sb.total_blocks)), &sb, LOG_START + 6)
            .unwrap();
        assert_eq!(log.segment_usage(), vec![4, 2, 0]);
        assert_eq!(log.current_segment(), Some(1));
    }

    #[test]
    fn held_blocks_are_left_to_checkpoints() {
        let log = manager(1, 4);
        log.hold_for_checkpoint(2).unwrap();
        log.write_to_new_block(b"a").unwrap();
        log.write_to_new_block(b"b").unwrap();
        assert!(matches!(log.write_to_new_block(b"c"), Err(LfsError::NoSpace(_))));

        log.write_checkpoint_block(b"imap").unwrap();
        log.write_checkpoint_block(b"imap").unwrap();
        assert_eq!(log.free_blocks(), 0);
        assert!(matches!(log.write_checkpoint_block(b"imap"), Err(LfsError::NoSpace(_))));
    }

    #[test]
    fn hold_is_refused_when_the_log_cannot_cover_it() {
        let log = manager(1, 4);
        for _ in 0..3 {
            log.write_to_new_block(b"x").unwrap();
        }
        assert!(matches!(log.hold_for_checkpoint(2), Err(LfsError::NoSpace(_))));
        assert_eq!(log.held_blocks(), 0);
        log.hold_for_checkpoint(1).unwrap();
        assert_eq!(log.held_blocks(), 1);
    }
}
