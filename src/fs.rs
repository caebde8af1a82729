use std::sync::{Arc, Mutex, PoisonError};

use byteorder::{ByteOrder, LittleEndian};
use log::{info, warn};

use crate::config::LfsConfig;
use crate::disk::{BlockDevice, FileDevice};
use crate::error::{storage_fault, LfsError, Result};
use crate::inode::Inode;
use crate::inode_map::{InodeIdPool, InodeMap};
use crate::layout::{
    imap_blocks_for, CheckpointDisk, ImapBlock, SuperblockDisk, IMAP_RECORDS_PER_BLOCK,
    LFS_BLOCK_SIZE, ROOT_INO, SUPERBLOCK_ADDR,
};
use crate::segment::SegmentManager;

// -----------------------------------------------------------------------------
// Mounted volume
// -----------------------------------------------------------------------------

/// A mounted log-structured volume.
///
/// Owns the log, the inode map and the id pool. It is `Sync`: share it behind
/// an `Arc` and call into it from any thread.
pub struct Lfs {
    device: Arc<dyn BlockDevice>,
    superblock: SuperblockDisk,
    pub(crate) segments: SegmentManager,
    pub(crate) inode_map: InodeMap,
    pub(crate) ids: InodeIdPool,
    /// Sequence number of the last checkpoint on disk.
    checkpoint_seq: Mutex<u64>,
}

impl Lfs {
    /// Lays out a fresh volume: superblock, root directory, first checkpoint.
    pub fn format(device: Arc<dyn BlockDevice>, segment_blocks: u32) -> Result<Self> {
        let superblock = SuperblockDisk::new(device.block_count(), segment_blocks)?;
        device
            .write_block(SUPERBLOCK_ADDR, &superblock.to_block())
            .map_err(storage_fault(SUPERBLOCK_ADDR))?;

        // stale checkpoints from an older image must not survive
        for region in [superblock.checkpoint_a, superblock.checkpoint_b] {
            device
                .write_block(region, &[0u8; LFS_BLOCK_SIZE])
                .map_err(storage_fault(region))?;
        }

        let segments = SegmentManager::new(Arc::clone(&device), &superblock, superblock.log_start)?;
        segments.hold_for_checkpoint(imap_blocks_for(ROOT_INO))?;
        let inode_map = InodeMap::new();
        inode_map.update(ROOT_INO, Inode::root().serialize());

        let lfs = Self {
            device,
            superblock,
            segments,
            inode_map,
            ids: InodeIdPool::fresh(),
            checkpoint_seq: Mutex::new(0),
        };
        lfs.checkpoint()?;

        info!(
            "lfs: formatted {} blocks, {} segments of {} blocks",
            superblock.total_blocks, superblock.segment_count, superblock.segment_blocks
        );
        Ok(lfs)
    }

    /// Mounts an existing volume from its newest valid checkpoint.
    pub fn mount(device: Arc<dyn BlockDevice>) -> Result<Self> {
        // 1. superblock
        let block = device
            .read_block(SUPERBLOCK_ADDR)
            .map_err(storage_fault(SUPERBLOCK_ADDR))?;
        let superblock = SuperblockDisk::from_block(&block)?;
        if superblock.total_blocks > device.block_count() {
            return Err(LfsError::format(
                "superblock",
                format!(
                    "image claims {} blocks, device has {}",
                    superblock.total_blocks,
                    device.block_count()
                ),
            ));
        }

        // 2. newest checkpoint
        let checkpoint = latest_checkpoint(device.as_ref(), &superblock)?;

        // 3. log cursor, then the inode map chain it covers
        let segments = SegmentManager::new(Arc::clone(&device), &superblock, checkpoint.log_cursor)?;
        let records = read_imap_chain(&segments, &checkpoint)?;
        let inode_map = InodeMap::from_records(records);

        if let Err(e) = segments.hold_for_checkpoint(imap_blocks_for(inode_map.len() as u32)) {
            warn!("lfs: {}; later checkpoints may fail", e);
        }

        let next_id = inode_map
            .max_id()
            .map_or(checkpoint.next_inode_id, |max| {
                checkpoint.next_inode_id.max(max.saturating_add(1))
            });

        info!(
            "lfs: mounted checkpoint {} ({} inodes, log cursor {})",
            checkpoint.sequence,
            inode_map.len(),
            checkpoint.log_cursor
        );

        Ok(Self {
            device,
            superblock,
            segments,
            inode_map,
            ids: InodeIdPool::starting_at(next_id),
            checkpoint_seq: Mutex::new(checkpoint.sequence),
        })
    }

    /// Opens the image named by `config`, formatting it first when allowed
    /// and the image carries no superblock.
    pub fn open(config: &LfsConfig) -> Result<Self> {
        let image = if config.image_path.exists() {
            FileDevice::open(&config.image_path)
        } else {
            FileDevice::create(&config.image_path, config.total_blocks)
        };
        let device: Arc<dyn BlockDevice> =
            Arc::new(image.map_err(storage_fault(SUPERBLOCK_ADDR))?);

        match Self::mount(Arc::clone(&device)) {
            Ok(lfs) => Ok(lfs),
            Err(LfsError::Format { what: "superblock", reason }) if config.format_if_missing => {
                info!("lfs: no usable superblock ({}), formatting", reason);
                Self::format(device, config.segment_blocks)
            }
            Err(e) => Err(e),
        }
    }

    /// Persists the inode map and the allocator state.
    ///
    /// The map is appended to the log as a chain of imap blocks; the checkpoint
    /// record pointing at it goes to the region the previous one did not use.
    /// Imap blocks come out of the hold that data appends leave alone.
    pub fn checkpoint(&self) -> Result<()> {
        let mut seq = self.checkpoint_seq.lock().unwrap_or_else(PoisonError::into_inner);

        let entries = self.inode_map.snapshot();
        let next_inode_id = self.ids.peek();

        // written tail first so each block knows its successor
        let chunks: Vec<&[(u32, Vec<u8>)]> = entries.chunks(IMAP_RECORDS_PER_BLOCK).collect();
        let mut head = 0;
        for chunk in chunks.iter().rev() {
            let block = ImapBlock {
                next: head,
                records: chunk.iter().map(|(_, record)| record.clone()).collect(),
            };
            head = self.segments.write_checkpoint_block(&block.to_block())?;
        }

        let checkpoint = CheckpointDisk {
            sequence: *seq + 1,
            log_cursor: self.segments.cursor(),
            next_inode_id,
            imap_head: head,
            imap_blocks: chunks.len() as u32,
            inode_count: entries.len() as u32,
        };

        let region = checkpoint.region(&self.superblock);
        self.device
            .write_block(region, &checkpoint.to_block())
            .map_err(storage_fault(region))?;
        self.device.flush().map_err(storage_fault(region))?;
        *seq = checkpoint.sequence;

        info!(
            "lfs: checkpoint {} -> block {} ({} inodes in {} imap blocks)",
            checkpoint.sequence, region, checkpoint.inode_count, checkpoint.imap_blocks
        );
        Ok(())
    }

    /// Final checkpoint; the volume can be mounted again afterwards.
    pub fn unmount(self) -> Result<()> {
        self.checkpoint()
    }

    // -------------------- Inodes --------------------

    pub fn create_inode(&self, is_directory: bool) -> Result<Inode> {
        Inode::create(self, is_directory)
    }

    /// Latest committed state of inode `id`.
    pub fn load_inode(&self, id: u32) -> Result<Inode> {
        Inode::deserialize(&self.inode_map.lookup(id)?)
    }

    /// Pushes `inode` to the map; pairs with writes made with the defer flag.
    pub fn store_inode(&self, inode: &Inode) {
        self.inode_map.update(inode.id(), inode.serialize());
    }

    pub fn root(&self) -> Result<Inode> {
        self.load_inode(ROOT_INO)
    }

    // -------------------- Accessors --------------------

    pub fn superblock(&self) -> &SuperblockDisk {
        &self.superblock
    }

    pub fn segments(&self) -> &SegmentManager {
        &self.segments
    }

    pub fn inode_map(&self) -> &InodeMap {
        &self.inode_map
    }

    pub fn next_inode_id(&self) -> u32 {
        self.ids.peek()
    }

    pub fn checkpoint_sequence(&self) -> u64 {
        *self.checkpoint_seq.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Picks the valid checkpoint with the highest sequence number.
fn latest_checkpoint(device: &dyn BlockDevice, sb: &SuperblockDisk) -> Result<CheckpointDisk> {
    let mut best: Option<CheckpointDisk> = None;
    for region in [sb.checkpoint_a, sb.checkpoint_b] {
        let block = device.read_block(region).map_err(storage_fault(region))?;
        match CheckpointDisk::from_block(&block) {
            Ok(cp) if cp.region(sb) != region => {
                warn!("lfs: checkpoint {} found in the wrong region {}", cp.sequence, region);
            }
            Ok(cp) => {
                if best.map_or(true, |b| cp.sequence > b.sequence) {
                    best = Some(cp);
                }
            }
            Err(e) => warn!("lfs: skipping checkpoint region {}: {}", region, e),
        }
    }
    best.ok_or_else(|| LfsError::format("checkpoint", "no valid checkpoint region"))
}

fn read_imap_chain(segments: &SegmentManager, cp: &CheckpointDisk) -> Result<Vec<(u32, Vec<u8>)>> {
    let mut records = Vec::with_capacity(cp.inode_count as usize);
    let mut addr = cp.imap_head;
    for _ in 0..cp.imap_blocks {
        if addr == 0 {
            return Err(LfsError::format("imap block", "chain ends early"));
        }
        let block = ImapBlock::from_block(&segments.block_read(addr)?)?;
        for record in block.records {
            let id = LittleEndian::read_u32(&record[0..4]);
            records.push((id, record));
        }
        addr = block.next;
    }
    if addr != 0 || records.len() != cp.inode_count as usize {
        return Err(LfsError::format(
            "imap block",
            format!(
                "chain holds {} records, checkpoint expects {}",
                records.len(),
                cp.inode_count
            ),
        ));
    }
    Ok(records)
}
