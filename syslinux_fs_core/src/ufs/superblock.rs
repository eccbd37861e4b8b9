//! UFS1/UFS2 superblock

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::block::{BlockDev, BlockDevice};
use crate::consts::FRAGMENTS_PER_BLK;
use crate::error::{Error, ErrorKind, Result};

/// 依次探测的 superblock 位置（字节）
pub const SUPERBLOCK_OFFSETS: [u64; 3] = [8192, 65536, 262144];

/// Superblock 结构大小
pub const SUPERBLOCK_SIZE: usize = 1536;

pub const UFS1_SUPER_MAGIC: u32 = 0x0001_1954;
pub const UFS2_SUPER_MAGIC: u32 = 0x1954_0119;

/// 魔数所在偏移
const MAGIC_OFFSET: usize = 1372;

/// UFS 版本
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UfsType {
    /// 32 位块指针，128 字节 inode
    Ufs1,
    /// 64 位块指针，256 字节 inode
    Ufs2,
}

impl UfsType {
    fn from_magic(magic: u32) -> Option<Self> {
        match magic {
            UFS1_SUPER_MAGIC => Some(UfsType::Ufs1),
            UFS2_SUPER_MAGIC => Some(UfsType::Ufs2),
            _ => None,
        }
    }

    /// 块指针宽度的 log2
    pub fn addr_shift(self) -> u32 {
        match self {
            UfsType::Ufs1 => 2,
            UfsType::Ufs2 => 3,
        }
    }

    pub fn inode_size(self) -> u32 {
        match self {
            UfsType::Ufs1 => 128,
            UfsType::Ufs2 => 256,
        }
    }
}

/// 解析后的 superblock
///
/// 带 `frag` 的字段以片段为单位，块指针也以片段为单位。
#[derive(Debug, Clone)]
pub struct Superblock {
    pub kind: UfsType,
    /// inode 表在柱面组内的片段偏移
    pub iblkno: u32,
    /// UFS1 柱面组错位参数
    pub cgoffset: u32,
    pub cgmask: u32,
    pub ncg: u32,
    pub block_size: u32,
    pub frag_size: u32,
    pub block_shift: u32,
    /// 块号与片段号之间的位移
    pub frag_shift: u32,
    pub inodes_per_cg: u32,
    pub frags_per_cg: u32,
    /// 内联符号链接的最大长度
    pub maxlen_isymlink: u32,
}

impl Superblock {
    /// 从原始字节解析
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < SUPERBLOCK_SIZE {
            return Err(Error::new(ErrorKind::InvalidInput, "superblock buffer too short"));
        }
        let kind = UfsType::from_magic(LittleEndian::read_u32(&buf[MAGIC_OFFSET..]))
            .ok_or(Error::new(ErrorKind::BadMagic, "not a UFS filesystem"))?;

        Ok(Self {
            kind,
            iblkno: LittleEndian::read_u32(&buf[16..]),
            cgoffset: LittleEndian::read_u32(&buf[24..]),
            cgmask: LittleEndian::read_u32(&buf[28..]),
            ncg: LittleEndian::read_u32(&buf[44..]),
            block_size: LittleEndian::read_u32(&buf[48..]),
            frag_size: LittleEndian::read_u32(&buf[52..]),
            block_shift: LittleEndian::read_u32(&buf[80..]),
            frag_shift: LittleEndian::read_u32(&buf[96..]),
            inodes_per_cg: LittleEndian::read_u32(&buf[184..]),
            frags_per_cg: LittleEndian::read_u32(&buf[188..]),
            maxlen_isymlink: LittleEndian::read_u32(&buf[1320..]),
        })
    }

    /// 依次探测三个固定位置，两种魔数都接受，第一个匹配的胜出
    pub fn probe<D: BlockDevice>(bdev: &mut BlockDev<D>) -> Result<Self> {
        let dev_bytes = bdev.total_sectors() << bdev.sector_shift();
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        for offset in SUPERBLOCK_OFFSETS {
            if offset + SUPERBLOCK_SIZE as u64 > dev_bytes {
                break;
            }
            bdev.read_bytes(offset, &mut buf)?;
            match Self::parse(&buf) {
                Ok(sb) => {
                    debug!(
                        "{:?} superblock at {}: block size {}, {} groups",
                        sb.kind, offset, sb.block_size, sb.ncg
                    );
                    return Ok(sb);
                }
                Err(e) if e.kind() == ErrorKind::BadMagic => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::new(ErrorKind::BadMagic, "no UFS superblock found"))
    }

    /// 检查几何参数是否自洽
    pub fn validate(&self) -> Result<()> {
        // 先限制位移量，再参与移位运算
        if self.block_shift > 16
            || !self.block_size.is_power_of_two()
            || self.block_size != 1 << self.block_shift
        {
            return Err(Error::new(ErrorKind::Corrupted, "bad UFS block size"));
        }
        if (1u64 << self.frag_shift.min(63)) > FRAGMENTS_PER_BLK
            || self.frag_size != self.block_size >> self.frag_shift
        {
            return Err(Error::new(ErrorKind::Corrupted, "bad UFS fragment size"));
        }
        if self.ncg == 0 || self.inodes_per_cg == 0 || self.frags_per_cg == 0 {
            return Err(Error::new(ErrorKind::Corrupted, "empty UFS cylinder group"));
        }
        Ok(())
    }

    /// 片段大小的 log2
    pub fn frag_byte_shift(&self) -> u32 {
        self.block_shift - self.frag_shift
    }

    /// 柱面组 `cg` 的 inode 表起始片段
    ///
    /// UFS1 的柱面组元数据按 `cgoffset * (cg & !cgmask)` 错开。
    pub fn inode_table(&self, cg: u32) -> u64 {
        let mut frag = cg as u64 * self.frags_per_cg as u64 + self.iblkno as u64;
        if self.kind == UfsType::Ufs1 {
            frag += self.cgoffset as u64 * (cg & !self.cgmask) as u64;
        }
        frag
    }
}
