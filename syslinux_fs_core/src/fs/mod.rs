//! 驱动操作表
//!
//! 每个驱动实现同一组操作：取根 inode、按名查找、读目录、计算下一个
//! extent、读符号链接。文件读取默认走通用的 `generic_getfssec`。

mod getfssec;
mod mangle;

use alloc::string::String;
use alloc::vec::Vec;

use crate::block::BlockDevice;
use crate::cache::BlockCache;
use crate::error::{Error, ErrorKind, Result};
use crate::types::{DirCursor, DirEntry, Extent, Inode};

pub use getfssec::{generic_getfssec, resident_getfssec};
pub use mangle::{generic_mangle_name, vfat_mangle_name};

/// 一个打开的文件
///
/// 除读取位置外，还缓存当前和下一个 extent，顺序读取时无需反复查询块映射。
#[derive(Debug, Clone)]
pub struct OpenFile {
    pub inode: Inode,
    /// 字节偏移
    pub offset: u64,
    pub this_extent: Extent,
    pub next_extent: Extent,
}

impl OpenFile {
    pub fn new(inode: Inode) -> Self {
        Self {
            inode,
            offset: 0,
            this_extent: Extent::EMPTY,
            next_extent: Extent::EMPTY,
        }
    }
}

/// 文件系统驱动接口
///
/// 所有方法都显式接收块缓存，驱动实例本身只保存挂载时算出的几何参数。
pub trait FsOps {
    /// 驱动名
    fn name(&self) -> &'static str;

    /// 缓存块大小的 log2
    fn block_shift(&self) -> u32;

    /// 卷 UUID
    fn uuid(&self) -> Option<[u8; 16]> {
        None
    }

    /// 根目录 inode
    fn iget_root<D: BlockDevice>(&self, cache: &mut BlockCache<D>) -> Result<Inode>;

    /// 在目录 `parent` 中查找 `name`
    ///
    /// # 返回
    ///
    /// 找到返回 `Some(inode)`；目录中不存在该名字返回 `None`
    fn iget<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        name: &[u8],
        parent: &Inode,
    ) -> Result<Option<Inode>>;

    /// 从 `cursor` 处读取下一个目录项，目录结束时返回 `None`
    fn readdir<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        dir: &mut Inode,
        cursor: &mut DirCursor,
    ) -> Result<Option<DirEntry>>;

    /// 计算从逻辑扇区 `lstart` 开始的 extent
    ///
    /// # 返回
    ///
    /// `None` 表示该位置没有映射
    fn next_extent<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        inode: &mut Inode,
        lstart: u64,
    ) -> Result<Option<Extent>>;

    /// 读取符号链接目标
    fn readlink<D: BlockDevice>(&self, _cache: &mut BlockCache<D>, _inode: &Inode) -> Result<Vec<u8>> {
        Err(Error::new(
            ErrorKind::Unsupported,
            "symlinks not supported by this filesystem",
        ))
    }

    /// 按扇区读取文件数据
    ///
    /// # 参数
    ///
    /// * `file` - 打开的文件，偏移必须按扇区对齐
    /// * `buf` - 目标缓冲区
    /// * `sectors` - 请求的扇区数
    ///
    /// # 返回
    ///
    /// 读取的字节数，以及文件是否还有剩余数据
    fn getfssec<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        file: &mut OpenFile,
        buf: &mut [u8],
        sectors: u32,
    ) -> Result<(usize, bool)>
    where
        Self: Sized,
    {
        generic_getfssec(self, cache, file, buf, sectors)
    }

    /// 路径规范化
    fn mangle_name(&self, src: &str) -> String {
        generic_mangle_name(src)
    }
}
