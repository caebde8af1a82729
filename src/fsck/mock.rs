/* Hand-built volume for checker tests: records and blocks are whatever the
test puts in, so broken images can be described directly. */

use std::collections::HashMap;

use super::fsck_backend::FsckBackend;
use crate::error::{LfsError, Result};
use crate::layout::SuperblockDisk;

pub struct MockBackend {
    pub superblock: SuperblockDisk,
    pub log_cursor: u32,
    pub next_inode_id: u32,
    pub records: Vec<(u32, Vec<u8>)>,
    pub blocks: HashMap<u32, Vec<u8>>,
}

impl FsckBackend for MockBackend {
    fn superblock(&self) -> SuperblockDisk {
        self.superblock
    }

    fn log_cursor(&self) -> u32 {
        self.log_cursor
    }

    fn next_inode_id(&self) -> u32 {
        self.next_inode_id
    }

    fn inode_records(&self) -> Vec<(u32, Vec<u8>)> {
        self.records.clone()
    }

    fn read_block(&self, addr: u32) -> Result<Vec<u8>> {
        self.blocks
            .get(&addr)
            .cloned()
            .ok_or_else(|| LfsError::unwritten(addr))
    }
}
