//! Extent 树解析和块映射

use byteorder::{ByteOrder, LittleEndian};
use log::error;

use crate::{
    block::BlockDevice,
    bmap::BlockRun,
    cache::BlockCache,
    error::{Error, ErrorKind, Result},
};

/// extent 头部魔数
pub const EXT4_EXT_MAGIC: u16 = 0xF30A;

/// 头部和每个表项的大小
const ENTRY_SIZE: usize = 12;

/// 超过该长度的 extent 为未初始化 extent
const EXT_INIT_MAX_LEN: u16 = 1 << 15;

/// extent 树的最大深度
const MAX_DEPTH: u16 = 5;

/// extent 节点头部
#[derive(Debug, Clone, Copy)]
struct ExtentHeader {
    magic: u16,
    entries: u16,
    depth: u16,
}

impl ExtentHeader {
    fn parse(node: &[u8]) -> Result<Self> {
        let header = Self {
            magic: LittleEndian::read_u16(&node[0..]),
            entries: LittleEndian::read_u16(&node[2..]),
            depth: LittleEndian::read_u16(&node[6..]),
        };
        if header.magic != EXT4_EXT_MAGIC {
            error!("ext4 extent header magic {:#x}", header.magic);
            return Err(Error::new(ErrorKind::Corrupted, "bad extent header magic"));
        }
        if header.depth > MAX_DEPTH {
            return Err(Error::new(ErrorKind::Corrupted, "extent tree too deep"));
        }
        if ENTRY_SIZE * (header.entries as usize + 1) > node.len() {
            return Err(Error::new(ErrorKind::Corrupted, "extent node data too short"));
        }
        Ok(header)
    }

    fn entry<'a>(&self, node: &'a [u8], i: usize) -> &'a [u8] {
        let off = ENTRY_SIZE * (i + 1);
        &node[off..off + ENTRY_SIZE]
    }

    /// 最后一个起始块不大于 `block` 的表项
    fn predecessor(&self, node: &[u8], block: u32) -> Option<usize> {
        (0..self.entries as usize)
            .take_while(|&i| LittleEndian::read_u32(self.entry(node, i)) <= block)
            .last()
    }
}

/// 在 extent 树中查找逻辑块
///
/// # 参数
///
/// * `cache` - 块缓存
/// * `root` - inode 中 `i_block` 的 60 字节（树根）
/// * `block` - 文件内逻辑块号
///
/// # 返回
///
/// 物理块号和从该块开始的连续块数；不在任何 extent 中时返回空洞，
/// 其长度延伸到下一个 extent 的起点
pub fn map_extent<D: BlockDevice>(
    cache: &mut BlockCache<D>,
    root: &[u8],
    block: u32,
) -> Result<BlockRun> {
    let mut node = alloc::vec::Vec::from(root);
    let mut header = ExtentHeader::parse(&node)?;

    // 索引节点：取最后一个起始块不大于目标的索引向下
    while header.depth > 0 {
        let i = match header.predecessor(&node, block) {
            Some(i) => i,
            None => {
                return Ok(BlockRun { addr: 0, nblocks: 1 });
            }
        };
        let idx = header.entry(&node, i);
        let leaf = ((LittleEndian::read_u16(&idx[8..]) as u64) << 32)
            | LittleEndian::read_u32(&idx[4..]) as u64;

        let depth = header.depth;
        node = cache.get(leaf)?.to_vec();
        header = ExtentHeader::parse(&node)?;
        if header.depth != depth - 1 {
            return Err(Error::new(ErrorKind::Corrupted, "extent tree depth mismatch"));
        }
    }

    let next_start = |from: usize| {
        (from..header.entries as usize)
            .map(|i| LittleEndian::read_u32(header.entry(&node, i)))
            .find(|&start| start > block)
    };

    let i = match header.predecessor(&node, block) {
        Some(i) => i,
        None => {
            let gap = next_start(0).map_or(1, |start| (start - block) as u64);
            return Ok(BlockRun { addr: 0, nblocks: gap });
        }
    };

    let ext = header.entry(&node, i);
    let ee_block = LittleEndian::read_u32(&ext[0..]);
    let raw_len = LittleEndian::read_u16(&ext[4..]);
    let start = ((LittleEndian::read_u16(&ext[6..]) as u64) << 32)
        | LittleEndian::read_u32(&ext[8..]) as u64;

    let (len, initialized) = if raw_len > EXT_INIT_MAX_LEN {
        (raw_len - EXT_INIT_MAX_LEN, false)
    } else {
        (raw_len, true)
    };

    let delta = block - ee_block;
    if delta >= len as u32 {
        // 落在两个 extent 之间
        let gap = next_start(i + 1).map_or(1, |start| (start - block) as u64);
        return Ok(BlockRun { addr: 0, nblocks: gap });
    }

    let nblocks = (len as u32 - delta) as u64;
    if !initialized {
        return Ok(BlockRun { addr: 0, nblocks });
    }
    Ok(BlockRun {
        addr: start + delta as u64,
        nblocks,
    })
}
