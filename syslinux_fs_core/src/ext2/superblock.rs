//! Superblock 读取和验证

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::{
    block::{BlockDev, BlockDevice},
    error::{Error, ErrorKind, Result},
};

/// Superblock 位置（从分区开始的字节偏移）
pub const SUPERBLOCK_OFFSET: u64 = 1024;

/// Superblock 大小
pub const SUPERBLOCK_SIZE: usize = 1024;

/// ext2/3/4 魔数
pub const EXT2_SUPER_MAGIC: u16 = 0xEF53;

/// 旧版本（revision 0）的固定 inode 大小
const GOOD_OLD_INODE_SIZE: u16 = 128;

/// 32 位块组描述符大小
const MIN_DESC_SIZE: u16 = 32;

bitflags::bitflags! {
    /// 不兼容特性
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IncompatFeatures: u32 {
        const FILETYPE = 0x0002;
        const RECOVER = 0x0004;
        const JOURNAL_DEV = 0x0008;
        const META_BG = 0x0010;
        const EXTENTS = 0x0040;
        const BIT64 = 0x0080;
        const FLEX_BG = 0x0200;
        const INLINE_DATA = 0x8000;
    }
}

/// 解析后的 superblock
#[derive(Debug, Clone)]
pub struct Superblock {
    pub inodes_count: u32,
    pub blocks_count: u64,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub magic: u16,
    pub rev_level: u32,
    pub inode_size: u16,
    pub feature_incompat: IncompatFeatures,
    pub uuid: [u8; 16],
    pub volume_name: [u8; 16],
    pub desc_size: u16,
}

impl Superblock {
    /// 从 1024 字节的原始数据解析
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < SUPERBLOCK_SIZE {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "superblock buffer too short",
            ));
        }

        let magic = LittleEndian::read_u16(&buf[56..]);
        if magic != EXT2_SUPER_MAGIC {
            return Err(Error::new(ErrorKind::BadMagic, "not an ext2/3/4 filesystem"));
        }

        let rev_level = LittleEndian::read_u32(&buf[76..]);
        let inode_size = if rev_level == 0 {
            GOOD_OLD_INODE_SIZE
        } else {
            LittleEndian::read_u16(&buf[88..])
        };
        let feature_incompat =
            IncompatFeatures::from_bits_retain(LittleEndian::read_u32(&buf[96..]));

        let mut blocks_count = LittleEndian::read_u32(&buf[4..]) as u64;
        let mut desc_size = MIN_DESC_SIZE;
        if feature_incompat.contains(IncompatFeatures::BIT64) {
            blocks_count |= (LittleEndian::read_u32(&buf[336..]) as u64) << 32;
            desc_size = LittleEndian::read_u16(&buf[254..]).max(MIN_DESC_SIZE);
        }

        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&buf[104..120]);
        let mut volume_name = [0u8; 16];
        volume_name.copy_from_slice(&buf[120..136]);

        Ok(Self {
            inodes_count: LittleEndian::read_u32(&buf[0..]),
            blocks_count,
            first_data_block: LittleEndian::read_u32(&buf[20..]),
            log_block_size: LittleEndian::read_u32(&buf[24..]),
            blocks_per_group: LittleEndian::read_u32(&buf[32..]),
            inodes_per_group: LittleEndian::read_u32(&buf[40..]),
            magic,
            rev_level,
            inode_size,
            feature_incompat,
            uuid,
            volume_name,
            desc_size,
        })
    }

    /// 从块设备加载 superblock
    pub fn load<D: BlockDevice>(bdev: &mut BlockDev<D>) -> Result<Self> {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        bdev.read_bytes(SUPERBLOCK_OFFSET, &mut buf)?;
        let sb = Self::parse(&buf)?;
        debug!(
            "ext2 superblock: {} blocks, log block size {}, {} inodes/group",
            sb.blocks_count, sb.log_block_size, sb.inodes_per_group
        );
        Ok(sb)
    }

    /// 块大小的 log2
    pub fn block_shift(&self) -> u32 {
        self.log_block_size + 10
    }

    /// 块组数量
    pub fn group_count(&self) -> u64 {
        (self.blocks_count - self.first_data_block as u64).div_ceil(self.blocks_per_group as u64)
    }

    /// 检查几何参数是否自洽
    pub fn validate(&self) -> Result<()> {
        if self.log_block_size > 6 {
            return Err(Error::new(ErrorKind::Unsupported, "ext2 block size too large"));
        }
        if self.blocks_per_group == 0 || self.inodes_per_group == 0 {
            return Err(Error::new(ErrorKind::Corrupted, "zero blocks or inodes per group"));
        }
        if self.inode_size < GOOD_OLD_INODE_SIZE
            || !self.inode_size.is_power_of_two()
            || (self.inode_size as u64) > (1u64 << self.block_shift())
        {
            return Err(Error::new(ErrorKind::Corrupted, "bad inode size"));
        }
        if !self.desc_size.is_power_of_two()
            || (self.desc_size as u64) > (1u64 << self.block_shift())
        {
            return Err(Error::new(ErrorKind::Corrupted, "bad group descriptor size"));
        }
        if (self.first_data_block as u64) >= self.blocks_count {
            return Err(Error::new(ErrorKind::Corrupted, "first data block beyond end"));
        }
        Ok(())
    }
}
