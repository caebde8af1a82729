/* The checker proper. Reads the superblock, every inode record, and every
indirect block a record points at, then validates addressing against the
written part of the log and the append-only rule that no physical block is
live twice. */

use std::collections::HashMap;

use super::{fsck_backend::FsckBackend, fsck_types::FsckReport};
use crate::inode::Inode;
use crate::layout::{
    is_unallocated, parse_pointer_table, SuperblockDisk, LFS_BLOCK_SIZE, LOG_START, MAX_FILE_SIZE,
    NUM_DIRECT_BLOCKS, ROOT_INO,
};

/// One live pointer: which inode, which logical block (or the indirect block).
#[derive(Debug, Clone, Copy)]
enum Owner {
    Data { ino: u32, block: usize },
    Indirect { ino: u32 },
}

impl std::fmt::Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Owner::Data { ino, block } => write!(f, "inode {} block {}", ino, block),
            Owner::Indirect { ino } => write!(f, "inode {} indirect block", ino),
        }
    }
}

fn check_superblock<B: FsckBackend>(backend: &B, report: &mut FsckReport) {
    let sb = backend.superblock();
    let cursor = backend.log_cursor();

    if sb.log_start < LOG_START {
        report.superblock_error(format!(
            "Superblock: log starts at {}, inside the reserved blocks",
            sb.log_start
        ));
    }
    if sb.log_end() > sb.total_blocks {
        report.superblock_error(format!(
            "Superblock: {} segments of {} blocks overrun {} blocks",
            sb.segment_count, sb.segment_blocks, sb.total_blocks
        ));
    }
    if cursor < sb.log_start || cursor > sb.log_end() {
        report.superblock_error(format!(
            "Superblock: log cursor {} outside [{}, {}]",
            cursor,
            sb.log_start,
            sb.log_end()
        ));
    } else if sb.log_end() - cursor < sb.segment_blocks {
        report.warnings.push(format!(
            "Log: only {} free blocks left, less than one segment",
            sb.log_end() - cursor
        ));
    }
}

fn in_log(sb: &SuperblockDisk, cursor: u32, addr: u32) -> bool {
    addr >= sb.log_start && addr < cursor
}

fn blocks_in(filesize: u32) -> usize {
    (filesize as usize + LFS_BLOCK_SIZE - 1) / LFS_BLOCK_SIZE
}

/// Validates one inode's pointers and records them in `owners`.
fn check_inode_blocks<B: FsckBackend>(
    backend: &B,
    inode: &Inode,
    owners: &mut Vec<(u32, Owner)>,
    report: &mut FsckReport,
) {
    let sb = backend.superblock();
    let cursor = backend.log_cursor();
    let ino = inode.id();
    let used = blocks_in(inode.filesize());

    // 1. direct pointers
    let mut pointers: Vec<(usize, u32)> = Vec::new();
    for (block, &addr) in inode.direct_blocks().iter().enumerate() {
        if addr != 0 {
            pointers.push((block, addr));
        } else if block < used {
            report.warnings.push(format!("Inode {}: hole at block {}", ino, block));
        }
    }

    // 2. indirect block and its slots
    let indirect = inode.indirect_block();
    if indirect == 0 {
        if used > NUM_DIRECT_BLOCKS {
            report.warnings.push(format!(
                "Inode {}: blocks {}..{} are holes (no indirect block)",
                ino, NUM_DIRECT_BLOCKS, used
            ));
        }
    } else if !in_log(&sb, cursor, indirect) {
        report.block_error(format!(
            "Inode {}: indirect block {} outside the written log",
            ino, indirect
        ));
    } else {
        owners.push((indirect, Owner::Indirect { ino }));
        match backend.read_block(indirect) {
            Ok(table) => {
                for (slot, addr) in parse_pointer_table(&table).into_iter().enumerate() {
                    let block = NUM_DIRECT_BLOCKS + slot;
                    if !is_unallocated(addr) {
                        pointers.push((block, addr));
                    } else if block < used {
                        report.warnings.push(format!("Inode {}: hole at block {}", ino, block));
                    }
                }
            }
            Err(e) => report.block_error(format!(
                "Inode {}: cannot read indirect block {}: {}",
                ino, indirect, e
            )),
        }
    }

    // 3. every data pointer lands in the written log and inside the file
    for (block, addr) in pointers {
        if !in_log(&sb, cursor, addr) {
            report.block_error(format!(
                "Inode {}: block {} points at {}, outside the written log",
                ino, block, addr
            ));
            continue;
        }
        if block >= used {
            report.inode_error(format!(
                "Inode {}: block {} allocated past filesize {}",
                ino,
                block,
                inode.filesize()
            ));
        }
        owners.push((addr, Owner::Data { ino, block }));
    }
}

fn check_inodes<B: FsckBackend>(backend: &B, report: &mut FsckReport) -> Vec<(u32, Owner)> {
    let next_id = backend.next_inode_id();
    let mut owners = Vec::new();
    let mut root_seen = false;

    for (key, record) in backend.inode_records() {
        report.inodes_checked += 1;

        let inode = match Inode::deserialize(&record) {
            Ok(i) => i,
            Err(e) => {
                report.inode_error(format!("Inode {}: unreadable record: {}", key, e));
                continue;
            }
        };

        if inode.id() != key {
            report.inode_error(format!(
                "Inode map entry {} holds the record of inode {}",
                key,
                inode.id()
            ));
        }
        if inode.id() == ROOT_INO {
            root_seen = true;
            if !inode.is_directory() {
                report.inode_error("Root inode is not a directory".into());
            }
        } else if inode.id() >= next_id {
            report.inode_error(format!(
                "Inode {}: id not below the allocator's next id {}",
                inode.id(),
                next_id
            ));
        }
        if inode.filesize() as u64 > MAX_FILE_SIZE {
            report.inode_error(format!(
                "Inode {}: filesize {} exceeds the maximum {}",
                inode.id(),
                inode.filesize(),
                MAX_FILE_SIZE
            ));
        }

        check_inode_blocks(backend, &inode, &mut owners, report);
    }

    if !root_seen {
        report.inode_error("Root inode missing from the inode map".into());
    }
    owners
}

/// Append-only rule: every live physical block has exactly one owner.
fn check_blocks_global(owners: &[(u32, Owner)], report: &mut FsckReport) {
    let mut seen: HashMap<u32, Owner> = HashMap::new();
    for &(addr, owner) in owners {
        if let Some(first) = seen.insert(addr, owner) {
            report.block_error(format!(
                "Block {} is live twice: {} and {}",
                addr, first, owner
            ));
        }
    }
    report.blocks_referenced = owners.len();
}

pub fn run_fsck<B: FsckBackend>(backend: &B) -> FsckReport {
    let mut report = FsckReport::new();

    // --- Step 1: superblock and log cursor ---
    check_superblock(backend, &mut report);

    // --- Step 2: inode records and their pointers ---
    let owners = check_inodes(backend, &mut report);

    // --- Step 3: no block shared between owners ---
    check_blocks_global(&owners, &mut report);

    log::info!(
        "fsck: {} inodes, {} live blocks, {} errors, {} warnings",
        report.inodes_checked,
        report.blocks_referenced,
        report.errors.len(),
        report.warnings.len()
    );
    report
}
