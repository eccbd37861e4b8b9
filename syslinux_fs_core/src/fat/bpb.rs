//! BIOS 参数块（BPB）

use byteorder::{ByteOrder, LittleEndian};
use log::error;

use crate::error::{Error, ErrorKind, Result};

/// 少于该簇数的卷为 FAT12
pub const FAT12_MAX_CLUSTERS: u32 = 4085;
/// 少于该簇数的卷为 FAT16
pub const FAT16_MAX_CLUSTERS: u32 = 65525;
/// FAT32 可用簇数上限
pub const FAT32_MAX_CLUSTERS: u32 = 0x0fff_fff4;

/// FAT 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl FatType {
    /// 由数据区簇数决定 FAT 类型
    pub fn from_clusters(clusters: u32) -> Self {
        if clusters < FAT12_MAX_CLUSTERS {
            FatType::Fat12
        } else if clusters < FAT16_MAX_CLUSTERS {
            FatType::Fat16
        } else {
            FatType::Fat32
        }
    }

    /// 不小于该值的表项表示链结束（或坏簇）
    pub fn eoc_threshold(self) -> u32 {
        match self {
            FatType::Fat12 => 0x0ff0,
            FatType::Fat16 => 0xfff0,
            FatType::Fat32 => 0x0fff_fff0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FatType::Fat12 => "FAT12",
            FatType::Fat16 => "FAT16",
            FatType::Fat32 => "FAT32",
        }
    }
}

/// 引导扇区中与挂载相关的字段
#[derive(Debug, Clone)]
pub struct Bpb {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fats: u8,
    pub root_entries: u16,
    pub total_sectors: u32,
    /// 每个 FAT 的扇区数（16 位字段为 0 时取 FAT32 字段）
    pub fat_size: u32,
    /// FAT32 扩展标志：bit 7 置位时只有 `ext_flags & 0xf` 号 FAT 有效
    pub ext_flags: u16,
    pub root_cluster: u32,
    pub serial: u32,
    pub label: [u8; 11],
}

impl Bpb {
    /// 解析引导扇区
    ///
    /// 只做最基本的合法性检查：保留扇区数和 FAT 个数不能为 0，
    /// 扇区大小和每簇扇区数必须是 2 的幂。
    pub fn parse(sector: &[u8]) -> Result<Self> {
        if sector.len() < 512 {
            return Err(Error::new(ErrorKind::InvalidInput, "boot sector too short"));
        }

        let bytes_per_sector = LittleEndian::read_u16(&sector[11..]);
        let sectors_per_cluster = sector[13];
        let reserved_sectors = LittleEndian::read_u16(&sector[14..]);
        let fats = sector[16];

        if reserved_sectors == 0 || fats == 0 {
            return Err(Error::new(ErrorKind::BadMagic, "not a FAT boot sector"));
        }
        if !bytes_per_sector.is_power_of_two()
            || bytes_per_sector < 512
            || !sectors_per_cluster.is_power_of_two()
        {
            error!(
                "FAT: bad geometry, sector size {}, cluster {}",
                bytes_per_sector, sectors_per_cluster
            );
            return Err(Error::new(ErrorKind::BadMagic, "bad FAT geometry"));
        }

        let fat_size16 = LittleEndian::read_u16(&sector[22..]) as u32;
        let total16 = LittleEndian::read_u16(&sector[19..]) as u32;
        let fat32 = fat_size16 == 0;

        let fat_size = if fat32 {
            LittleEndian::read_u32(&sector[36..])
        } else {
            fat_size16
        };
        let total_sectors = if total16 != 0 {
            total16
        } else {
            LittleEndian::read_u32(&sector[32..])
        };

        // 卷序列号和卷标在 FAT32 扩展 BPB 中后移了 28 字节
        let ext = if fat32 { 64 } else { 36 };
        let mut label = [0u8; 11];
        label.copy_from_slice(&sector[ext + 7..ext + 18]);

        Ok(Self {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            fats,
            root_entries: LittleEndian::read_u16(&sector[17..]),
            total_sectors,
            fat_size,
            ext_flags: if fat32 { LittleEndian::read_u16(&sector[40..]) } else { 0 },
            root_cluster: if fat32 { LittleEndian::read_u32(&sector[44..]) } else { 0 },
            serial: LittleEndian::read_u32(&sector[ext + 3..]),
            label,
        })
    }
}
