//! B 树的查找和顺序遍历

use core::cmp::Ordering;

use alloc::vec;
use alloc::vec::Vec;

use byteorder::{ByteOrder, LittleEndian};
use log::error;

use crate::block::BlockDevice;
use crate::cache::BlockCache;
use crate::error::{Error, ErrorKind, Result};

use super::chunk::ChunkMap;
use super::items::{Key, KEY_SIZE};

/// 节点头大小
pub const HEADER_SIZE: usize = 101;
/// 叶子中 item 描述符的大小
const ITEM_SIZE: usize = KEY_SIZE + 8;
/// 内部节点中子节点指针的大小
const KEY_PTR_SIZE: usize = KEY_SIZE + 16;

pub const BTRFS_MAX_LEVEL: u8 = 8;

fn corrupt(message: &'static str) -> Error {
    error!("btrfs: {}", message);
    Error::new(ErrorKind::Corrupted, message)
}

/// 二分查找：命中返回 `Ok(位置)`，否则返回 `Err(插入点)`
fn bin_search<F>(n: usize, mut cmp: F) -> core::result::Result<usize, usize>
where
    F: FnMut(usize) -> Ordering,
{
    let (mut low, mut high) = (0, n);
    while low < high {
        let mid = (low + high) / 2;
        match cmp(mid) {
            Ordering::Less => low = mid + 1,
            Ordering::Greater => high = mid,
            Ordering::Equal => return Ok(mid),
        }
    }
    Err(low)
}

/// 命中的位置，或者前一个位置（没有更小的键时为 0）
fn predecessor(found: core::result::Result<usize, usize>) -> usize {
    match found {
        Ok(slot) => slot,
        Err(slot) => slot.saturating_sub(1),
    }
}

/// 一个已读入内存的树节点
#[derive(Debug, Clone)]
pub struct Node {
    buf: Vec<u8>,
}

impl Node {
    pub fn level(&self) -> u8 {
        self.buf[100]
    }

    pub fn nritems(&self) -> usize {
        LittleEndian::read_u32(&self.buf[96..]) as usize
    }

    pub fn bytenr(&self) -> u64 {
        LittleEndian::read_u64(&self.buf[48..])
    }

    fn entry_size(&self) -> usize {
        if self.level() == 0 {
            ITEM_SIZE
        } else {
            KEY_PTR_SIZE
        }
    }

    /// 第 `i` 项的键（叶子和内部节点的键都在项的开头）
    pub fn key(&self, i: usize) -> Key {
        Key::parse(&self.buf[HEADER_SIZE + i * self.entry_size()..])
    }

    /// 内部节点第 `i` 个子节点的逻辑地址
    pub fn blockptr(&self, i: usize) -> u64 {
        LittleEndian::read_u64(&self.buf[HEADER_SIZE + i * KEY_PTR_SIZE + KEY_SIZE..])
    }

    /// 叶子第 `i` 个 item 的数据
    pub fn item_data(&self, i: usize) -> Result<&[u8]> {
        let desc = HEADER_SIZE + i * ITEM_SIZE + KEY_SIZE;
        let offset = LittleEndian::read_u32(&self.buf[desc..]) as usize;
        let size = LittleEndian::read_u32(&self.buf[desc + 4..]) as usize;
        let start = HEADER_SIZE + offset;
        self.buf
            .get(start..start + size)
            .ok_or_else(|| corrupt("item data beyond leaf"))
    }

    fn search(&self, key: &Key) -> core::result::Result<usize, usize> {
        bin_search(self.nritems(), |i| self.key(i).cmp(key))
    }
}

/// 树遍历位置：从根到叶子每层一个节点及其当前槽位
#[derive(Debug, Clone)]
pub struct Cursor {
    frames: Vec<(Node, usize)>,
}

impl Cursor {
    /// 当前 item
    ///
    /// 空树或遍历结束时返回 `None`
    pub fn item(&self) -> Result<Option<(Key, &[u8])>> {
        let (leaf, slot) = match self.frames.last() {
            Some(frame) => frame,
            None => return Ok(None),
        };
        if *slot >= leaf.nritems() {
            return Ok(None);
        }
        Ok(Some((leaf.key(*slot), leaf.item_data(*slot)?)))
    }

    /// 当前 item 的键
    pub fn key(&self) -> Option<Key> {
        let (leaf, slot) = self.frames.last()?;
        (*slot < leaf.nritems()).then(|| leaf.key(*slot))
    }
}

/// 读取某棵 B 树所需的上下文
#[derive(Debug, Clone)]
pub struct TreeReader {
    pub chunks: ChunkMap,
    pub nodesize: usize,
    pub fsid: [u8; 16],
}

impl TreeReader {
    /// 逻辑地址转换为物理字节地址
    pub fn logical_physical(&self, logical: u64) -> Result<u64> {
        self.chunks
            .map(logical)
            .map(|(physical, _)| physical)
            .ok_or_else(|| corrupt("logical address not covered by any chunk"))
    }

    /// 读取并检查一个节点
    pub fn read_node<D: BlockDevice>(&self, cache: &mut BlockCache<D>, logical: u64) -> Result<Node> {
        let (physical, avail) = self
            .chunks
            .map(logical)
            .ok_or_else(|| corrupt("tree block not covered by any chunk"))?;
        if avail < self.nodesize as u64 {
            return Err(corrupt("tree block crosses chunk end"));
        }
        let mut buf = vec![0u8; self.nodesize];
        cache.read_bytes(physical, &mut buf)?;
        let node = Node { buf };

        if node.buf[32..48] != self.fsid {
            return Err(corrupt("tree block fsid mismatch"));
        }
        if node.bytenr() != logical {
            return Err(corrupt("tree block bytenr mismatch"));
        }
        if node.level() >= BTRFS_MAX_LEVEL {
            return Err(corrupt("tree block level too high"));
        }
        if HEADER_SIZE + node.nritems() * node.entry_size() > self.nodesize {
            return Err(corrupt("too many items in tree block"));
        }
        Ok(node)
    }

    /// 从 `root` 下降查找 `key`
    ///
    /// 内部节点选最后一个不大于 `key` 的子节点；叶子中停在等于 `key` 的项，
    /// 没有时停在它的前一项。
    ///
    /// # 返回
    ///
    /// 遍历位置，以及是否精确命中
    pub fn search<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        root: u64,
        key: &Key,
    ) -> Result<(Cursor, bool)> {
        let mut frames = Vec::new();
        let mut logical = root;
        let mut expect: Option<u8> = None;
        loop {
            let node = self.read_node(cache, logical)?;
            if expect.is_some_and(|level| level != node.level()) {
                return Err(corrupt("unexpected tree block level"));
            }
            let found = node.search(key);
            let slot = predecessor(found);
            if node.level() == 0 {
                frames.push((node, slot));
                return Ok((Cursor { frames }, found.is_ok()));
            }
            if node.nritems() == 0 {
                return Err(corrupt("empty internal tree block"));
            }
            logical = node.blockptr(slot);
            expect = Some(node.level() - 1);
            frames.push((node, slot));
        }
    }

    /// 定位到第一个不小于 `key` 的 item
    pub fn seek<D: BlockDevice>(&self, cache: &mut BlockCache<D>, root: u64, key: &Key) -> Result<Cursor> {
        let (mut cursor, exact) = self.search(cache, root, key)?;
        if !exact && cursor.key().is_some_and(|k| k < *key) {
            self.next(cache, &mut cursor)?;
        }
        Ok(cursor)
    }

    /// 前进到下一个 item
    ///
    /// 当前叶子用完时向上找到还有右兄弟的一层，再沿最左路径下降到下一片叶子。
    ///
    /// # 返回
    ///
    /// 没有更多 item 时返回 `false`
    pub fn next<D: BlockDevice>(&self, cache: &mut BlockCache<D>, cursor: &mut Cursor) -> Result<bool> {
        loop {
            let depth = cursor.frames.len();
            if depth == 0 {
                return Ok(false);
            }
            {
                let (leaf, slot) = &mut cursor.frames[depth - 1];
                if *slot + 1 < leaf.nritems() {
                    *slot += 1;
                    return Ok(true);
                }
            }

            // 找到还有下一个子节点的层
            let mut level = depth - 1;
            let resume = loop {
                if level == 0 {
                    break None;
                }
                level -= 1;
                let (node, slot) = &mut cursor.frames[level];
                if *slot + 1 < node.nritems() {
                    *slot += 1;
                    break Some(level);
                }
            };
            let level = match resume {
                Some(level) => level,
                None => {
                    let (leaf, slot) = &mut cursor.frames[depth - 1];
                    *slot = leaf.nritems();
                    return Ok(false);
                }
            };

            cursor.frames.truncate(level + 1);
            loop {
                let (node, slot) = &cursor.frames[cursor.frames.len() - 1];
                if node.level() == 0 {
                    break;
                }
                let child = self.read_node(cache, node.blockptr(*slot))?;
                if child.level() + 1 != node.level() {
                    return Err(corrupt("unexpected tree block level"));
                }
                cursor.frames.push((child, 0));
            }

            let (leaf, _) = &cursor.frames[cursor.frames.len() - 1];
            if leaf.nritems() > 0 {
                return Ok(true);
            }
            // 空叶子：继续向后找
        }
    }
}
