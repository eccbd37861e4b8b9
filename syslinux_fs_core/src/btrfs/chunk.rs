//! 逻辑地址到物理地址的 chunk 映射表

use alloc::vec::Vec;

use crate::error::{Error, ErrorKind, Result};

/// 映射表容量
pub const MAX_CHUNK_ENTRIES: usize = 256;

/// 一个 chunk 的映射（只使用第一个 stripe）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkMapItem {
    pub logical: u64,
    pub length: u64,
    pub devid: u64,
    pub physical: u64,
}

impl ChunkMapItem {
    fn end(&self) -> u64 {
        self.logical.saturating_add(self.length)
    }
}

/// 按逻辑地址排序、互不重叠的 chunk 表
#[derive(Debug, Clone, Default)]
pub struct ChunkMap {
    items: Vec<ChunkMapItem>,
}

impl ChunkMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[ChunkMapItem] {
        &self.items
    }

    /// 插入一个映射
    ///
    /// 起始地址相同的映射视为已存在（superblock 中的 system chunk 会在 chunk
    /// 树里再出现一次）。与相邻项重叠视为损坏，表满返回 `NoSpace`。
    pub fn insert(&mut self, item: ChunkMapItem) -> Result<()> {
        if item.length == 0 {
            return Err(Error::new(ErrorKind::Corrupted, "zero length chunk"));
        }
        let slot = match self.items.binary_search_by_key(&item.logical, |m| m.logical) {
            Ok(_) => return Ok(()),
            Err(slot) => slot,
        };
        let overlaps_prev = slot > 0 && self.items[slot - 1].end() > item.logical;
        let overlaps_next = self
            .items
            .get(slot)
            .is_some_and(|next| item.end() > next.logical);
        if overlaps_prev || overlaps_next {
            return Err(Error::new(ErrorKind::Corrupted, "overlapping btrfs chunks"));
        }
        if self.items.len() == MAX_CHUNK_ENTRIES {
            return Err(Error::new(ErrorKind::NoSpace, "too many btrfs chunks"));
        }
        self.items.insert(slot, item);
        Ok(())
    }

    /// 逻辑地址转换为物理地址
    ///
    /// # 返回
    ///
    /// 物理地址和该 chunk 中从此处起剩余的字节数；落在空隙中返回 `None`
    pub fn map(&self, logical: u64) -> Option<(u64, u64)> {
        let slot = match self.items.binary_search_by_key(&logical, |m| m.logical) {
            Ok(slot) => slot,
            Err(0) => return None,
            Err(slot) => slot - 1,
        };
        let item = &self.items[slot];
        if logical >= item.end() {
            return None;
        }
        let delta = logical - item.logical;
        Some((item.physical + delta, item.length - delta))
    }
}
