//! NTFS 引导扇区

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, ErrorKind, Result};

/// 可接受的 OEM 名
const OEM_NAMES: [&[u8; 8]; 3] = [b"NTFS    ", b"MSWIN4.0", b"MSWIN4.1"];

/// 引导扇区
#[derive(Debug, Clone)]
pub struct BootSector {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub total_sectors: u64,
    pub mft_lcn: u64,
    pub mft_mirr_lcn: u64,
    /// 正数为每记录簇数，负数 `-n` 表示记录大小为 `2^n` 字节
    pub clusters_per_mft_record: i8,
    pub clusters_per_index_record: i8,
    pub serial: u64,
}

impl BootSector {
    /// 解析并校验引导扇区
    ///
    /// NTFS 要求若干 FAT 遗留字段（保留扇区数、FAT 个数、根目录项数等）为零，
    /// OEM 名必须是已知的几种之一。
    pub fn parse(sector: &[u8]) -> Result<Self> {
        if sector.len() < 512 {
            return Err(Error::new(ErrorKind::InvalidInput, "boot sector too short"));
        }
        if !OEM_NAMES.iter().any(|oem| &sector[3..11] == *oem) {
            return Err(Error::new(ErrorKind::BadMagic, "not an NTFS boot sector"));
        }

        let zero_fields = LittleEndian::read_u16(&sector[14..]) == 0
            && sector[16..19].iter().all(|&b| b == 0)
            && LittleEndian::read_u16(&sector[19..]) == 0
            && LittleEndian::read_u16(&sector[22..]) == 0
            && LittleEndian::read_u32(&sector[32..]) == 0;
        if !zero_fields {
            return Err(Error::new(ErrorKind::BadMagic, "NTFS reserved fields not zero"));
        }

        let bs = Self {
            bytes_per_sector: LittleEndian::read_u16(&sector[11..]),
            sectors_per_cluster: sector[13],
            total_sectors: LittleEndian::read_u64(&sector[40..]),
            mft_lcn: LittleEndian::read_u64(&sector[48..]),
            mft_mirr_lcn: LittleEndian::read_u64(&sector[56..]),
            clusters_per_mft_record: sector[64] as i8,
            clusters_per_index_record: sector[68] as i8,
            serial: LittleEndian::read_u64(&sector[72..]),
        };
        if !bs.bytes_per_sector.is_power_of_two()
            || bs.bytes_per_sector < 512
            || !bs.sectors_per_cluster.is_power_of_two()
        {
            return Err(Error::new(ErrorKind::BadMagic, "bad NTFS geometry"));
        }
        Ok(bs)
    }

    /// 簇大小的 log2（字节）
    pub fn cluster_byte_shift(&self) -> u32 {
        self.bytes_per_sector.trailing_zeros() + self.sectors_per_cluster.trailing_zeros()
    }

    fn record_shift(&self, clusters: i8) -> Result<u32> {
        let shift = if clusters < 0 {
            clusters.unsigned_abs() as u32
        } else if clusters > 0 && (clusters as u8).is_power_of_two() {
            self.cluster_byte_shift() + (clusters as u8).trailing_zeros()
        } else {
            return Err(Error::new(ErrorKind::BadMagic, "bad NTFS record size"));
        };
        if !(9..=16).contains(&shift) {
            return Err(Error::new(ErrorKind::Unsupported, "NTFS record size out of range"));
        }
        Ok(shift)
    }

    /// MFT 记录大小的 log2
    pub fn mft_record_shift(&self) -> Result<u32> {
        self.record_shift(self.clusters_per_mft_record)
    }

    /// 索引块大小的 log2
    pub fn index_record_shift(&self) -> Result<u32> {
        self.record_shift(self.clusters_per_index_record)
    }
}
