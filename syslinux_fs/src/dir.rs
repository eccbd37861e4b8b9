//! 目录读取器。

use syslinux_fs_core::{BlockDevice, DirCursor, DirEntry, Inode};

use crate::{Filesystem, Result};

/// 目录读取器，按驱动给出的顺序返回目录项
pub struct DirReader<'a, D: BlockDevice> {
    fs: &'a mut Filesystem<D>,
    dir: Inode,
    cursor: DirCursor,
    done: bool,
}

impl<'a, D: BlockDevice> DirReader<'a, D> {
    pub(crate) fn new(fs: &'a mut Filesystem<D>, dir: Inode) -> Self {
        Self {
            fs,
            dir,
            cursor: DirCursor::default(),
            done: false,
        }
    }

    pub fn inode(&self) -> &Inode {
        &self.dir
    }

    /// 当前位置（驱动定义的目录偏移）
    pub fn offset(&self) -> u64 {
        self.cursor.offset
    }

    /// 下一个目录项，目录结束时返回 `None`
    pub fn next_entry(&mut self) -> Result<Option<DirEntry>> {
        if self.done {
            return Ok(None);
        }
        let entry = self.fs.readdir(&mut self.dir, &mut self.cursor)?;
        self.done = entry.is_none();
        Ok(entry)
    }

    /// 回到目录开头
    pub fn rewind(&mut self) {
        self.cursor = DirCursor::default();
        self.done = false;
    }
}

impl<D: BlockDevice> Iterator for DirReader<'_, D> {
    type Item = Result<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
