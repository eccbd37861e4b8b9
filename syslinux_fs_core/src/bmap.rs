//! N 级间接块映射
//!
//! ext2 与 UFS 使用相同形状的块指针树：12 个直接指针，之后依次是一级、
//! 二级、三级间接块。两者只在指针宽度、指针单位与块的换算、以及相邻块
//! 指针的步长上不同，这里用参数统一处理。

use byteorder::{ByteOrder, LittleEndian};

use crate::block::BlockDevice;
use crate::cache::BlockCache;
use crate::consts::{NR_BLOCK_POINTERS, NR_DIRECT_BLOCKS};
use crate::error::{Error, ErrorKind, Result};

/// 一段连续映射
///
/// `addr` 为 0 表示空洞，此时 `nblocks` 是连续空洞的块数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRun {
    pub addr: u64,
    pub nblocks: u64,
}

/// 从起始指针开始统计连续块的数量
///
/// 相邻指针之间恰好相差 `stride` 时视为物理连续；起始指针为 0 时统计连续的空洞。
///
/// # 参数
///
/// * `ptrs` - 从目标块开始的指针序列
/// * `stride` - 相邻块指针的差值（ext2 为 1，UFS 为每块片段数）
pub fn scan_set_nblocks<I>(ptrs: I, stride: u64) -> BlockRun
where
    I: IntoIterator<Item = u64>,
{
    let mut iter = ptrs.into_iter();
    let addr = match iter.next() {
        Some(addr) => addr,
        None => return BlockRun { addr: 0, nblocks: 0 },
    };
    let skip = if addr != 0 { stride } else { 0 };
    let mut next = addr.wrapping_add(skip);
    let mut nblocks = 1;
    for ptr in iter {
        if ptr != next {
            break;
        }
        nblocks += 1;
        next = next.wrapping_add(skip);
    }
    BlockRun { addr, nblocks }
}

/// 块指针树的几何参数
#[derive(Debug, Clone, Copy)]
pub struct IndirectMap {
    /// 文件系统块大小的 log2（与缓存块大小一致）
    block_shift: u32,
    /// 指针宽度的 log2：2 表示 32 位指针，3 表示 64 位指针
    addr_shift: u32,
    /// 指针值右移该位数得到缓存块号（UFS 指针以片段为单位）
    ptr_block_shift: u32,
    /// 相邻块的指针差值
    stride: u64,
}

impl IndirectMap {
    pub fn new(block_shift: u32, addr_shift: u32, ptr_block_shift: u32, stride: u64) -> Self {
        Self {
            block_shift,
            addr_shift,
            ptr_block_shift,
            stride,
        }
    }

    /// 每个间接块包含指针数的 log2
    fn shift(&self) -> u32 {
        self.block_shift - self.addr_shift
    }

    fn read_ptr(&self, data: &[u8], index: usize) -> u64 {
        let off = index << self.addr_shift;
        if self.addr_shift == 3 {
            LittleEndian::read_u64(&data[off..])
        } else {
            LittleEndian::read_u32(&data[off..]) as u64
        }
    }

    /// 将文件内逻辑块映射为物理块
    ///
    /// # 参数
    ///
    /// * `cache` - 块缓存
    /// * `ptrs` - inode 中的 15 个块指针（已规范化为 64 位）
    /// * `block` - 文件内逻辑块号
    ///
    /// # 返回
    ///
    /// 物理地址（指针单位）和从该块开始的连续块数；超出三级间接范围是错误
    pub fn map<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        ptrs: &[u64; NR_BLOCK_POINTERS],
        block: u64,
    ) -> Result<BlockRun> {
        let shift = self.shift();
        let direct = NR_DIRECT_BLOCKS as u64;

        if block < direct {
            let rest = ptrs[block as usize..NR_DIRECT_BLOCKS].iter().copied();
            return Ok(scan_set_nblocks(rest, self.stride));
        }

        let mut rel = block - direct;
        for levels in 1..=3u32 {
            let span = 1u64 << (levels * shift);
            if rel < span {
                let start = ptrs[NR_DIRECT_BLOCKS + levels as usize - 1];
                return self.map_indirect(cache, start, rel, levels);
            }
            rel -= span;
        }

        Err(Error::new(
            ErrorKind::InvalidInput,
            "block beyond triple indirect range",
        ))
    }

    /// 沿间接块下降 `levels` 层
    fn map_indirect<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        mut start: u64,
        block: u64,
        levels: u32,
    ) -> Result<BlockRun> {
        let shift = self.shift();
        let addr_count = 1u64 << shift;

        let mut rest = levels;
        loop {
            rest -= 1;
            if start == 0 {
                // 整棵子树都是空洞
                let span = addr_count << (rest * shift);
                return Ok(BlockRun {
                    addr: 0,
                    nblocks: span - (block & (span - 1)),
                });
            }
            let data = cache.get(start >> self.ptr_block_shift)?;
            let index = ((block >> (rest * shift)) & (addr_count - 1)) as usize;
            if rest == 0 {
                let ptrs = (index..addr_count as usize).map(|i| self.read_ptr(&data, i));
                return Ok(scan_set_nblocks(ptrs, self.stride));
            }
            start = self.read_ptr(&data, index);
        }
    }
}
