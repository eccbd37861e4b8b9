//! 块缓存
//!
//! 固定容量、按块号索引的缓存。未命中时从设备按需读取一个完整的文件系统块，
//! 返回不可变的共享快照。被锁定的块永远不会被淘汰。

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use log::debug;

use crate::block::{BlockDev, BlockDevice};
use crate::error::{Error, ErrorKind, Result};

/// 缓存槽
struct CacheSlot {
    /// 块号
    block: u64,
    /// 块内容快照
    data: Arc<[u8]>,
    /// 是否锁定（不可淘汰）
    locked: bool,
    /// 最近一次访问的时间戳
    last_used: u64,
}

/// 块缓存
///
/// 同一个块号最多只有一份缓存副本；淘汰策略为未锁定槽中的 LRU。
pub struct BlockCache<D> {
    bdev: BlockDev<D>,
    block_shift: u32,
    capacity: usize,
    slots: Vec<CacheSlot>,
    tick: u64,
    hits: u64,
    misses: u64,
}

impl<D: BlockDevice> BlockCache<D> {
    /// 创建块缓存
    ///
    /// # 参数
    ///
    /// * `bdev` - 块设备包装器
    /// * `capacity` - 缓存块数（至少 2）
    pub fn new(bdev: BlockDev<D>, capacity: usize) -> Result<Self> {
        if capacity < 2 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "cache needs at least two blocks",
            ));
        }
        let block_shift = bdev.sector_shift();
        Ok(Self {
            bdev,
            block_shift,
            capacity,
            slots: Vec::with_capacity(capacity),
            tick: 0,
            hits: 0,
            misses: 0,
        })
    }

    /// 以新的块大小重置缓存
    ///
    /// 丢弃所有缓存槽（包括已锁定的块）。块大小不能小于扇区大小。
    pub fn init(&mut self, block_shift: u32) -> Result<()> {
        if block_shift < self.bdev.sector_shift() || block_shift > 16 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "unsupported cache block size",
            ));
        }
        debug!("cache init: block size {}", 1u32 << block_shift);
        self.block_shift = block_shift;
        self.slots.clear();
        Ok(())
    }

    pub fn block_shift(&self) -> u32 {
        self.block_shift
    }

    pub fn block_size(&self) -> usize {
        1 << self.block_shift
    }

    pub fn sector_shift(&self) -> u32 {
        self.bdev.sector_shift()
    }

    /// 底层块设备（用于绕过缓存的整段扇区读取）
    pub fn bdev(&self) -> &BlockDev<D> {
        &self.bdev
    }

    pub fn bdev_mut(&mut self) -> &mut BlockDev<D> {
        &mut self.bdev
    }

    pub fn into_bdev(self) -> BlockDev<D> {
        self.bdev
    }

    /// 命中次数
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// 未命中次数
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// 当前缓存的块数
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn position(&self, block: u64) -> Option<usize> {
        self.slots.iter().position(|slot| slot.block == block)
    }

    /// 选出可以复用的槽位：有空位时追加，否则淘汰最久未用的未锁定块
    fn free_slot(&mut self) -> Result<Option<usize>> {
        if self.slots.len() < self.capacity {
            return Ok(None);
        }
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.locked)
            .min_by_key(|(_, slot)| slot.last_used)
            .map(|(i, _)| Some(i))
            .ok_or(Error::new(ErrorKind::NoSpace, "all cache blocks are locked"))
    }

    fn store(&mut self, block: u64, data: Arc<[u8]>, locked: bool) -> Result<()> {
        let last_used = self.next_tick();
        let slot = CacheSlot {
            block,
            data,
            locked,
            last_used,
        };
        match self.free_slot()? {
            Some(i) => self.slots[i] = slot,
            None => self.slots.push(slot),
        }
        Ok(())
    }

    /// 获取一个块
    ///
    /// # 参数
    ///
    /// * `block` - 以当前块大小为单位的块号
    ///
    /// # 返回
    ///
    /// 块内容的只读快照；设备读失败时原样返回错误
    pub fn get(&mut self, block: u64) -> Result<Arc<[u8]>> {
        if let Some(i) = self.position(block) {
            let tick = self.next_tick();
            let slot = &mut self.slots[i];
            slot.last_used = tick;
            self.hits += 1;
            return Ok(slot.data.clone());
        }

        self.misses += 1;
        let per_block = self.block_shift - self.bdev.sector_shift();
        let mut buf = vec![0u8; self.block_size()];
        self.bdev
            .read_sectors(block << per_block, 1 << per_block, &mut buf)?;

        let data: Arc<[u8]> = buf.into();
        self.store(block, data.clone(), false)?;
        Ok(data)
    }

    /// 锁定一个块，使其不会被淘汰
    pub fn lock(&mut self, block: u64) -> Result<()> {
        if self.position(block).is_none() {
            self.get(block)?;
        }
        if let Some(i) = self.position(block) {
            self.slots[i].locked = true;
        }
        Ok(())
    }

    /// 安装一个全零并锁定的块
    ///
    /// 块号 0 常被当作空洞指针使用，将其固定为全零可以让空洞读出零。
    pub fn insert_zeroed(&mut self, block: u64) -> Result<()> {
        let data: Arc<[u8]> = vec![0u8; self.block_size()].into();
        match self.position(block) {
            Some(i) => {
                let slot = &mut self.slots[i];
                slot.data = data;
                slot.locked = true;
                Ok(())
            }
            None => self.store(block, data, true),
        }
    }

    /// 通过缓存读取任意字节范围
    ///
    /// # 参数
    ///
    /// * `offset` - 分区内字节偏移
    /// * `buf` - 目标缓冲区
    pub fn read_bytes(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mask = self.block_size() as u64 - 1;
        let mut done = 0;
        while done < buf.len() {
            let pos = offset + done as u64;
            let block = self.get(pos >> self.block_shift)?;
            let start = (pos & mask) as usize;
            let n = (block.len() - start).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&block[start..start + n]);
            done += n;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingDevice {
        sectors: u64,
        reads: u64,
    }

    impl BlockDevice for CountingDevice {
        fn total_sectors(&self) -> u64 {
            self.sectors
        }

        fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
            self.reads += 1;
            for (i, chunk) in buf.chunks_mut(512).take(count as usize).enumerate() {
                chunk.fill((lba + i as u64) as u8);
            }
            Ok(count as usize * 512)
        }
    }

    fn cache(capacity: usize) -> BlockCache<CountingDevice> {
        let dev = CountingDevice {
            sectors: 256,
            reads: 0,
        };
        BlockCache::new(BlockDev::new(dev).unwrap(), capacity).unwrap()
    }

    #[test]
    fn test_hit_returns_same_snapshot() {
        let mut cache = cache(4);
        cache.init(10).unwrap();
        let a = cache.get(3).unwrap();
        let b = cache.get(3).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.len(), 1024);
        assert_eq!(a[0], 6);
        assert_eq!(a[512], 7);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.bdev().device().reads, 1);
    }

    #[test]
    fn test_lru_eviction_keeps_locked_blocks() {
        let mut cache = cache(2);
        cache.insert_zeroed(0).unwrap();
        cache.get(1).unwrap();
        cache.get(2).unwrap();
        cache.get(3).unwrap();
        assert_eq!(cache.len(), 2);

        let zero = cache.get(0).unwrap();
        assert!(zero.iter().all(|&b| b == 0));
        assert_eq!(cache.bdev().device().reads, 3);
    }

    #[test]
    fn test_all_locked_is_no_space() {
        let mut cache = cache(2);
        cache.lock(1).unwrap();
        cache.lock(2).unwrap();
        let err = cache.get(3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoSpace);
    }

    #[test]
    fn test_read_bytes_spans_blocks() {
        let mut cache = cache(4);
        let mut buf = [0u8; 8];
        cache.read_bytes(508, &mut buf).unwrap();
        assert_eq!(buf, [0, 0, 0, 0, 1, 1, 1, 1]);
    }

    #[test]
    fn test_init_rejects_small_blocks() {
        let mut cache = cache(4);
        assert!(cache.init(8).is_err());
        assert!(cache.init(12).is_ok());
        assert_eq!(cache.block_size(), 4096);
    }
}
