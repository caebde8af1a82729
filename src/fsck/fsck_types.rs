/* Result of a check. Errors mean the image breaks an invariant the mount
path relies on; warnings are legal but suspicious states (holes inside a
file, log nearly full). */

#[derive(Debug, Default)]
pub struct FsckReport {
    pub superblock_ok: bool,
    pub inodes_ok: bool,
    pub blocks_ok: bool,
    pub inodes_checked: usize,
    pub blocks_referenced: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl FsckReport {
    pub fn new() -> Self {
        Self {
            superblock_ok: true,
            inodes_ok: true,
            blocks_ok: true,
            ..Self::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub(crate) fn superblock_error(&mut self, msg: String) {
        self.superblock_ok = false;
        self.errors.push(msg);
    }

    pub(crate) fn inode_error(&mut self, msg: String) {
        self.inodes_ok = false;
        self.errors.push(msg);
    }

    pub(crate) fn block_error(&mut self, msg: String) {
        self.blocks_ok = false;
        self.errors.push(msg);
    }
}
