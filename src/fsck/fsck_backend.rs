/* What the checker needs to see of a volume. Implemented for a mounted
`Lfs`; tests plug in hand-built images. */

use crate::error::Result;
use crate::fs::Lfs;
use crate::layout::SuperblockDisk;

pub trait FsckBackend {
    fn superblock(&self) -> SuperblockDisk;
    /// First never-written log address.
    fn log_cursor(&self) -> u32;
    fn next_inode_id(&self) -> u32;
    /// Every `(id, record)` pair of the inode map.
    fn inode_records(&self) -> Vec<(u32, Vec<u8>)>;
    fn read_block(&self, addr: u32) -> Result<Vec<u8>>;
}

impl FsckBackend for Lfs {
    fn superblock(&self) -> SuperblockDisk {
        *Lfs::superblock(self)
    }

    fn log_cursor(&self) -> u32 {
        self.segments().cursor()
    }

    fn next_inode_id(&self) -> u32 {
        Lfs::next_inode_id(self)
    }

    fn inode_records(&self) -> Vec<(u32, Vec<u8>)> {
        self.inode_map().snapshot()
    }

    fn read_block(&self, addr: u32) -> Result<Vec<u8>> {
        self.segments().block_read(addr)
    }
}
