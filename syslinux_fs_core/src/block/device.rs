//! 块设备核心类型

use crate::error::{Error, ErrorKind, Result};

/// 块设备接口
///
/// 实现此 trait 以提供底层扇区读取。所有驱动都是只读的，
/// 因此这里没有写接口。
///
/// # 示例
///
/// ```rust,ignore
/// use syslinux_fs_core::{BlockDevice, Result};
///
/// struct MyDevice {
///     // ...
/// }
///
/// impl BlockDevice for MyDevice {
///     fn total_sectors(&self) -> u64 {
///         1000000
///     }
///
///     fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
///         // 实现扇区读取
///         Ok(count as usize * self.sector_size() as usize)
///     }
/// }
/// ```
pub trait BlockDevice {
    /// 物理扇区大小（通常 512）
    fn sector_size(&self) -> u32 {
        512
    }

    /// 总扇区数
    fn total_sectors(&self) -> u64;

    /// 读取扇区
    ///
    /// # 参数
    ///
    /// * `lba` - 逻辑块地址（以扇区为单位）
    /// * `count` - 要读取的扇区数
    /// * `buf` - 目标缓冲区（大小至少为 count * sector_size）
    ///
    /// # 返回
    ///
    /// 成功返回实际读取的字节数
    fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize>;
}

/// 块设备包装器
///
/// 在设备之上处理分区偏移和扇区换算，并统计读取次数。
pub struct BlockDev<D> {
    /// 底层设备
    device: D,
    /// 扇区大小的 log2
    sector_shift: u32,
    /// 分区偏移（字节，必须按扇区对齐）
    partition_offset: u64,
    /// 读取次数
    read_count: u64,
}

impl<D: BlockDevice> BlockDev<D> {
    /// 创建新的块设备包装器
    ///
    /// 扇区大小必须是不小于 512 的 2 的幂。
    pub fn new(device: D) -> Result<Self> {
        let sector_size = device.sector_size();
        if sector_size < 512 || !sector_size.is_power_of_two() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "sector size must be a power of two >= 512",
            ));
        }
        Ok(Self {
            device,
            sector_shift: sector_size.trailing_zeros(),
            partition_offset: 0,
            read_count: 0,
        })
    }

    /// 获取底层设备的引用
    pub fn device(&self) -> &D {
        &self.device
    }

    /// 获取底层设备的可变引用
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// 取回底层设备
    pub fn into_inner(self) -> D {
        self.device
    }

    /// 获取物理扇区大小
    pub fn sector_size(&self) -> u32 {
        1 << self.sector_shift
    }

    pub fn sector_shift(&self) -> u32 {
        self.sector_shift
    }

    /// 分区内可见的总扇区数
    pub fn total_sectors(&self) -> u64 {
        self.device
            .total_sectors()
            .saturating_sub(self.partition_offset >> self.sector_shift)
    }

    /// 获取读取次数
    pub fn read_count(&self) -> u64 {
        self.read_count
    }

    /// 设置分区偏移
    ///
    /// # 参数
    ///
    /// * `offset` - 分区起始偏移（字节）
    pub fn set_partition_offset(&mut self, offset: u64) -> Result<()> {
        if offset & ((1 << self.sector_shift) - 1) != 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "partition offset not sector aligned",
            ));
        }
        self.partition_offset = offset;
        Ok(())
    }

    /// 获取分区偏移
    pub fn partition_offset(&self) -> u64 {
        self.partition_offset
    }

    /// 将分区内扇区号转换为设备扇区号
    pub(super) fn logical_to_physical(&self, lba: u64) -> u64 {
        lba + (self.partition_offset >> self.sector_shift)
    }

    /// 增加读计数
    pub(super) fn inc_read_count(&mut self) {
        self.read_count += 1;
    }
}
