//! 扇区 I/O 操作实现

use super::{BlockDev, BlockDevice};
use crate::error::{Error, ErrorKind, Result};
use alloc::vec;

impl<D: BlockDevice> BlockDev<D> {
    /// 读取连续扇区
    ///
    /// 不经过块缓存，直接向设备发出一次读请求。
    ///
    /// # 参数
    ///
    /// * `lba` - 分区内的起始扇区号
    /// * `count` - 扇区数
    /// * `buf` - 目标缓冲区（大小至少为 count * sector_size）
    ///
    /// # 返回
    ///
    /// 成功返回读取的字节数；设备返回的字节数不足视为 I/O 错误
    pub fn read_sectors(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
        let len = (count as usize) << self.sector_shift();

        if buf.len() < len {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "buffer too small for sectors",
            ));
        }
        if count == 0 {
            return Ok(0);
        }
        if lba + count as u64 > self.total_sectors() {
            return Err(Error::new(ErrorKind::Io, "read beyond end of device"));
        }

        let pba = self.logical_to_physical(lba);
        self.inc_read_count();
        let n = self.device_mut().read_blocks(pba, count, &mut buf[..len])?;
        if n < len {
            return Err(Error::new(ErrorKind::Io, "short read from device"));
        }
        Ok(len)
    }

    /// 读取字节
    ///
    /// 从任意字节偏移读取，自动处理跨扇区情况。
    ///
    /// # 参数
    ///
    /// * `offset` - 分区内字节偏移量
    /// * `buf` - 目标缓冲区
    ///
    /// # 返回
    ///
    /// 成功返回读取的字节数
    ///
    /// # 示例
    ///
    /// ```rust,ignore
    /// let mut buf = vec![0u8; 1024];
    /// block_dev.read_bytes(1024, &mut buf)?;
    /// ```
    pub fn read_bytes(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let len = buf.len();
        if len == 0 {
            return Ok(0);
        }
        let shift = self.sector_shift();
        let sector_size = 1u64 << shift;

        // 计算起始扇区和扇区内偏移
        let start = offset >> shift;
        let head = (offset & (sector_size - 1)) as usize;
        let count = (head as u64 + len as u64).div_ceil(sector_size);

        let mut temp = vec![0u8; (count << shift) as usize];
        self.read_sectors(start, count as u32, &mut temp)?;

        buf.copy_from_slice(&temp[head..head + len]);
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    struct VecDevice(Vec<u8>);

    impl BlockDevice for VecDevice {
        fn total_sectors(&self) -> u64 {
            self.0.len() as u64 / 512
        }

        fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
            let start = lba as usize * 512;
            let len = count as usize * 512;
            buf[..len].copy_from_slice(&self.0[start..start + len]);
            Ok(len)
        }
    }

    fn pattern_device(sectors: usize) -> BlockDev<VecDevice> {
        let data = (0..sectors * 512).map(|i| (i % 251) as u8).collect();
        BlockDev::new(VecDevice(data)).unwrap()
    }

    #[test]
    fn test_read_bytes_across_sectors() {
        let mut bdev = pattern_device(4);
        let mut buf = [0u8; 600];
        bdev.read_bytes(500, &mut buf).unwrap();
        for (i, b) in buf.iter().enumerate() {
            assert_eq!(*b, ((500 + i) % 251) as u8);
        }
        assert_eq!(bdev.read_count(), 1);
    }

    #[test]
    fn test_partition_offset() {
        let mut bdev = pattern_device(4);
        bdev.set_partition_offset(1024).unwrap();
        assert_eq!(bdev.total_sectors(), 2);

        let mut buf = [0u8; 512];
        bdev.read_sectors(0, 1, &mut buf).unwrap();
        assert_eq!(buf[0], (1024 % 251) as u8);

        assert!(bdev.set_partition_offset(100).is_err());
    }

    #[test]
    fn test_read_past_end_fails() {
        let mut bdev = pattern_device(2);
        let mut buf = [0u8; 1024];
        let err = bdev.read_sectors(1, 2, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
