//! btrfs superblock 和它的镜像

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};

use crate::block::{BlockDev, BlockDevice};
use crate::error::{Error, ErrorKind, Result};

use super::chunk::ChunkMap;
use super::items::{parse_chunk, Key, KEY_SIZE};

pub const BTRFS_SUPER_INFO_OFFSET: u64 = 64 * 1024;
pub const BTRFS_SUPER_INFO_SIZE: usize = 4096;
pub const BTRFS_SUPER_MIRROR_MAX: u32 = 3;
const BTRFS_SUPER_MIRROR_SHIFT: u32 = 12;

pub const BTRFS_MAGIC: &[u8; 8] = b"_BHRfS_M";

/// 镜像工具生成的只含元数据的镜像，chunk 树不可信
pub const BTRFS_SUPER_FLAG_METADUMP: u64 = 1 << 33;

const CSUM_SIZE: usize = 32;
const SYS_CHUNK_ARRAY_OFFSET: usize = 811;
const SYS_CHUNK_ARRAY_SIZE: usize = 2048;

/// 第 `mirror` 个 superblock 副本的位置
pub fn sb_offset(mirror: u32) -> u64 {
    if mirror == 0 {
        BTRFS_SUPER_INFO_OFFSET
    } else {
        (16 * 1024) << (BTRFS_SUPER_MIRROR_SHIFT * mirror)
    }
}

/// 解析后的 superblock
#[derive(Debug, Clone)]
pub struct SuperBlock {
    pub fsid: [u8; 16],
    pub bytenr: u64,
    pub flags: u64,
    pub generation: u64,
    /// 根树（tree root）逻辑地址
    pub root: u64,
    pub chunk_root: u64,
    pub num_devices: u64,
    pub sectorsize: u32,
    pub nodesize: u32,
    sys_chunk_array: [u8; SYS_CHUNK_ARRAY_SIZE],
    sys_chunk_array_size: usize,
}

impl SuperBlock {
    /// 解析并校验一个 superblock 副本
    ///
    /// 魔数不对是 `BadMagic`；校验和不对或字段不自洽是 `Corrupted`。
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < BTRFS_SUPER_INFO_SIZE {
            return Err(Error::new(ErrorKind::InvalidInput, "superblock buffer too short"));
        }
        if &buf[64..72] != BTRFS_MAGIC {
            return Err(Error::new(ErrorKind::BadMagic, "not a btrfs filesystem"));
        }
        let csum = crc32c::crc32c(&buf[CSUM_SIZE..BTRFS_SUPER_INFO_SIZE]);
        if LittleEndian::read_u32(&buf[0..]) != csum {
            return Err(Error::new(ErrorKind::Corrupted, "btrfs superblock checksum mismatch"));
        }

        let sys_chunk_array_size = LittleEndian::read_u32(&buf[160..]) as usize;
        if sys_chunk_array_size > SYS_CHUNK_ARRAY_SIZE {
            return Err(Error::new(ErrorKind::Corrupted, "btrfs sys chunk array too large"));
        }
        let mut fsid = [0u8; 16];
        fsid.copy_from_slice(&buf[32..48]);
        let mut sys_chunk_array = [0u8; SYS_CHUNK_ARRAY_SIZE];
        sys_chunk_array.copy_from_slice(
            &buf[SYS_CHUNK_ARRAY_OFFSET..SYS_CHUNK_ARRAY_OFFSET + SYS_CHUNK_ARRAY_SIZE],
        );

        let sb = Self {
            fsid,
            bytenr: LittleEndian::read_u64(&buf[48..]),
            flags: LittleEndian::read_u64(&buf[56..]),
            generation: LittleEndian::read_u64(&buf[72..]),
            root: LittleEndian::read_u64(&buf[80..]),
            chunk_root: LittleEndian::read_u64(&buf[88..]),
            num_devices: LittleEndian::read_u64(&buf[136..]),
            sectorsize: LittleEndian::read_u32(&buf[144..]),
            nodesize: LittleEndian::read_u32(&buf[148..]),
            sys_chunk_array,
            sys_chunk_array_size,
        };
        if !sb.nodesize.is_power_of_two() || !(4096..=65536).contains(&sb.nodesize) {
            return Err(Error::new(ErrorKind::Corrupted, "bad btrfs node size"));
        }
        Ok(sb)
    }

    /// 读取所有镜像，选出最新的一个
    ///
    /// 只接受写在自己位置上（`bytenr` 相符）、与第一个有效副本 fsid 相同的副本，
    /// 其中 `generation` 最大者胜出。超出设备末尾的镜像直接跳过。
    pub fn load<D: BlockDevice>(bdev: &mut BlockDev<D>) -> Result<Self> {
        let dev_bytes = bdev.total_sectors() << bdev.sector_shift();
        let mut buf = [0u8; BTRFS_SUPER_INFO_SIZE];
        let mut best: Option<SuperBlock> = None;
        let mut last_err = Error::new(ErrorKind::BadMagic, "not a btrfs filesystem");

        for mirror in 0..BTRFS_SUPER_MIRROR_MAX {
            let offset = sb_offset(mirror);
            if offset + BTRFS_SUPER_INFO_SIZE as u64 > dev_bytes {
                break;
            }
            bdev.read_bytes(offset, &mut buf)?;
            let sb = match Self::parse(&buf) {
                Ok(sb) if sb.bytenr == offset => sb,
                Ok(_) => {
                    warn!("btrfs: superblock mirror {} has wrong bytenr", mirror);
                    continue;
                }
                Err(e) => {
                    if e.kind() != ErrorKind::BadMagic {
                        warn!("btrfs: superblock mirror {}: {}", mirror, e);
                    }
                    last_err = e;
                    continue;
                }
            };
            let newer = match &best {
                Some(b) if b.fsid != sb.fsid => {
                    warn!("btrfs: superblock mirror {} belongs to another filesystem", mirror);
                    false
                }
                Some(b) => sb.generation > b.generation,
                None => true,
            };
            if newer {
                best = Some(sb);
            }
        }

        let sb = best.ok_or(last_err)?;
        debug!(
            "btrfs superblock: generation {}, node size {}, {} devices",
            sb.generation, sb.nodesize, sb.num_devices
        );
        Ok(sb)
    }

    pub fn is_metadump(&self) -> bool {
        self.flags & BTRFS_SUPER_FLAG_METADUMP != 0
    }

    /// 解析 superblock 内嵌的 system chunk 数组
    pub fn sys_chunks(&self) -> Result<ChunkMap> {
        let array = &self.sys_chunk_array[..self.sys_chunk_array_size];
        let mut map = ChunkMap::new();
        let mut cur = 0;
        while cur < array.len() {
            if cur + KEY_SIZE > array.len() {
                return Err(Error::new(ErrorKind::Corrupted, "truncated btrfs sys chunk array"));
            }
            let key = Key::parse(&array[cur..]);
            cur += KEY_SIZE;
            let (item, size) = parse_chunk(key.offset, &array[cur..])?;
            map.insert(item)?;
            cur += size;
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    /// 构造一个带一个 system chunk、校验和正确的 superblock
    fn raw_superblock(bytenr: u64, generation: u64) -> Vec<u8> {
        let mut buf = vec![0u8; BTRFS_SUPER_INFO_SIZE];
        buf[32..48].copy_from_slice(&[0x42; 16]);
        LittleEndian::write_u64(&mut buf[48..], bytenr);
        buf[64..72].copy_from_slice(BTRFS_MAGIC);
        LittleEndian::write_u64(&mut buf[72..], generation);
        LittleEndian::write_u64(&mut buf[136..], 1);
        LittleEndian::write_u32(&mut buf[144..], 4096);
        LittleEndian::write_u32(&mut buf[148..], 4096);

        // key (256, CHUNK_ITEM, 0x100000) + chunk 头 + 一个 stripe
        let array = &mut buf[SYS_CHUNK_ARRAY_OFFSET..];
        LittleEndian::write_u64(&mut array[0..], 256);
        array[8] = 228;
        LittleEndian::write_u64(&mut array[9..], 0x10_0000);
        let chunk = &mut array[KEY_SIZE..];
        LittleEndian::write_u64(&mut chunk[0..], 0x40_0000);
        LittleEndian::write_u16(&mut chunk[44..], 1);
        LittleEndian::write_u64(&mut chunk[48..], 1);
        LittleEndian::write_u64(&mut chunk[56..], 0x10_0000);
        LittleEndian::write_u32(&mut buf[160..], (KEY_SIZE + 80) as u32);

        let csum = crc32c::crc32c(&buf[CSUM_SIZE..]);
        LittleEndian::write_u32(&mut buf[0..], csum);
        buf
    }

    #[test]
    fn test_mirror_offsets() {
        assert_eq!(sb_offset(0), 64 * 1024);
        assert_eq!(sb_offset(1), 64 * 1024 * 1024);
        assert_eq!(sb_offset(2), 256 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_parse_and_sys_chunks() {
        let sb = SuperBlock::parse(&raw_superblock(BTRFS_SUPER_INFO_OFFSET, 7)).unwrap();
        assert_eq!(sb.generation, 7);
        assert!(!sb.is_metadump());
        let map = sb.sys_chunks().unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.map(0x10_2000), Some((0x10_2000, 0x3F_E000)));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut buf = raw_superblock(BTRFS_SUPER_INFO_OFFSET, 7);
        buf[100] ^= 1;
        let err = SuperBlock::parse(&buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupted);
    }

    #[test]
    fn test_bad_magic() {
        let mut buf = raw_superblock(BTRFS_SUPER_INFO_OFFSET, 7);
        buf[64] = b'x';
        assert_eq!(SuperBlock::parse(&buf).unwrap_err().kind(), ErrorKind::BadMagic);
    }
}
