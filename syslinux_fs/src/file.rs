//! 打开的普通文件。

use alloc::vec;
use alloc::vec::Vec;

use syslinux_fs_core::{BlockDevice, Inode, OpenFile};

use crate::{Error, ErrorKind, Filesystem, Result};

/// 单次 `read_to_end` 请求的最大扇区数
const READ_CHUNK_SECTORS: u32 = 64;

/// 文件定位方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u64),
    End(i64),
    Current(i64),
}

/// 打开的文件句柄
///
/// 持有文件系统的可变借用；读取位置以字节计，`getfssec` 要求位置按扇区对齐。
pub struct File<'a, D: BlockDevice> {
    fs: &'a mut Filesystem<D>,
    inner: OpenFile,
    pos: u64,
}

impl<'a, D: BlockDevice> File<'a, D> {
    pub(crate) fn new(fs: &'a mut Filesystem<D>, inode: Inode) -> Self {
        Self {
            fs,
            inner: OpenFile::new(inode),
            pos: 0,
        }
    }

    pub fn inode(&self) -> &Inode {
        &self.inner.inode
    }

    /// 文件长度（字节）
    pub fn size(&self) -> u64 {
        self.inner.inode.size
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// 从当前位置按扇区读取
    ///
    /// # 参数
    ///
    /// * `buf` - 目标缓冲区，至少容纳 `sectors` 个扇区
    /// * `sectors` - 请求的扇区数
    ///
    /// # 返回
    ///
    /// 读取的字节数，以及文件是否还有剩余数据
    pub fn getfssec(&mut self, buf: &mut [u8], sectors: u32) -> Result<(usize, bool)> {
        self.inner.offset = self.pos;
        let (n, more) = self.fs.getfssec(&mut self.inner, buf, sectors)?;
        self.pos += n as u64;
        Ok((n, more))
    }

    /// 按字节读取，位置不必对齐
    ///
    /// 对齐的整扇区部分直接读入 `buf`，首尾不足一个扇区的部分经过一个扇区大小的中转缓冲。
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let size = self.size();
        if self.pos >= size || buf.is_empty() {
            return Ok(0);
        }
        let shift = self.fs.sector_shift();
        let sector = 1usize << shift;
        let want = buf.len().min((size - self.pos) as usize);
        let mut bounce: Vec<u8> = Vec::new();
        let mut done = 0;

        while done < want {
            let in_sector = (self.pos & (sector as u64 - 1)) as usize;
            self.inner.offset = self.pos - in_sector as u64;
            let remaining = want - done;

            if in_sector == 0 && remaining >= sector {
                let sectors = (remaining >> shift).min(u32::MAX as usize) as u32;
                let end = done + ((sectors as usize) << shift);
                let (n, _) = self.fs.getfssec(&mut self.inner, &mut buf[done..end], sectors)?;
                if n == 0 {
                    break;
                }
                done += n;
                self.pos += n as u64;
            } else {
                if bounce.is_empty() {
                    bounce = vec![0u8; sector];
                }
                let (n, _) = self.fs.getfssec(&mut self.inner, &mut bounce, 1)?;
                if n <= in_sector {
                    break;
                }
                let take = (n - in_sector).min(remaining);
                buf[done..done + take].copy_from_slice(&bounce[in_sector..in_sector + take]);
                done += take;
                self.pos += take as u64;
            }
        }
        Ok(done)
    }

    /// 从当前位置读到文件末尾，追加到 `out`
    pub fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        let start = out.len();
        let sector = 1usize << self.fs.sector_shift();
        let mut chunk = vec![0u8; sector * READ_CHUNK_SECTORS as usize];
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        Ok(out.len() - start)
    }

    /// 设置读取位置，允许越过文件末尾（之后的读取返回 0）
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let (base, delta) = match pos {
            SeekFrom::Start(off) => {
                self.pos = off;
                return Ok(off);
            }
            SeekFrom::End(delta) => (self.size(), delta),
            SeekFrom::Current(delta) => (self.pos, delta),
        };
        self.pos = base
            .checked_add_signed(delta)
            .ok_or(Error::new(ErrorKind::InvalidInput, "seek to a negative position"))?;
        Ok(self.pos)
    }
}
