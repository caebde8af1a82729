mod error;
mod layout;
mod disk;
mod segment;
mod inode;
mod inode_map;
mod fs;
pub mod config;
pub mod ops;
pub mod fsck;

pub use crate::fs::Lfs;
pub use crate::error::{LfsError, Result};
pub use crate::disk::{BlockDevice, FileDevice, MemDevice};
pub use crate::segment::SegmentManager;
pub use crate::inode::Inode;
pub use crate::inode_map::{InodeIdPool, InodeMap};
pub use crate::layout::{
    SuperblockDisk,
    CheckpointDisk,
    LFS_BLOCK_SIZE,
    LFS_MAGIC,
    LFS_VERSION,
    NUM_DIRECT_BLOCKS,
    POINTERS_PER_BLOCK,
    INODE_RECORD_SIZE,
    INVALID_BLOCK_ADDRESS,
    MAX_FILE_SIZE,
    ROOT_INO,
};
