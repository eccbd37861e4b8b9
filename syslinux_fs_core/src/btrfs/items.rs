//! B 树键和各类 item 的解析

use core::cmp::Ordering;

use alloc::vec::Vec;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, ErrorKind, Result};
use crate::types::InodeType;

use super::chunk::ChunkMapItem;

pub const BTRFS_INODE_ITEM_KEY: u8 = 1;
pub const BTRFS_DIR_ITEM_KEY: u8 = 84;
pub const BTRFS_DIR_INDEX_KEY: u8 = 96;
pub const BTRFS_EXTENT_DATA_KEY: u8 = 108;
pub const BTRFS_ROOT_ITEM_KEY: u8 = 132;
pub const BTRFS_ROOT_REF_KEY: u8 = 156;
pub const BTRFS_CHUNK_ITEM_KEY: u8 = 228;

pub const BTRFS_FS_TREE_OBJECTID: u64 = 5;
pub const BTRFS_FIRST_CHUNK_TREE_OBJECTID: u64 = 256;
/// 子卷根目录的 objectid
pub const BTRFS_FIRST_FREE_OBJECTID: u64 = 256;

pub const BTRFS_FILE_EXTENT_INLINE: u8 = 0;
pub const BTRFS_FILE_EXTENT_REG: u8 = 1;
pub const BTRFS_FILE_EXTENT_PREALLOC: u8 = 2;

/// 磁盘上的键大小
pub const KEY_SIZE: usize = 17;

fn short() -> Error {
    Error::new(ErrorKind::Corrupted, "btrfs item too short")
}

/// B 树键，按 (objectid, type, offset) 排序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    pub objectid: u64,
    pub item_type: u8,
    pub offset: u64,
}

impl Key {
    pub const fn new(objectid: u64, item_type: u8, offset: u64) -> Self {
        Self {
            objectid,
            item_type,
            offset,
        }
    }

    pub fn parse(buf: &[u8]) -> Self {
        Self {
            objectid: LittleEndian::read_u64(buf),
            item_type: buf[8],
            offset: LittleEndian::read_u64(&buf[9..]),
        }
    }

    /// 忽略 offset 比较，用来判断是否还在同一类 item 中
    pub fn cmp_type(&self, other: &Key) -> Ordering {
        (self.objectid, self.item_type).cmp(&(other.objectid, other.item_type))
    }
}

/// 目录项名字哈希
pub fn name_hash(name: &[u8]) -> u64 {
    !crc32c::crc32c_append(1, name) as u64
}

/// 目录项中的文件类型转换为通用类型
pub fn ft_to_type(ft: u8) -> InodeType {
    match ft {
        1 => InodeType::RegularFile,
        2 => InodeType::Directory,
        3 => InodeType::CharDevice,
        4 => InodeType::BlockDevice,
        5 => InodeType::Fifo,
        6 => InodeType::Socket,
        7 => InodeType::Symlink,
        _ => InodeType::Unknown,
    }
}

/// 解析 chunk item
///
/// 只取第一个 stripe；`num_stripes` 为 0 或 item 长度不足视为损坏。
///
/// # 返回
///
/// 映射项和 item 的总长度
pub fn parse_chunk(logical: u64, buf: &[u8]) -> Result<(ChunkMapItem, usize)> {
    const CHUNK_HEADER: usize = 48;
    const STRIPE_SIZE: usize = 32;
    if buf.len() < CHUNK_HEADER + STRIPE_SIZE {
        return Err(short());
    }
    let num_stripes = LittleEndian::read_u16(&buf[44..]) as usize;
    let size = CHUNK_HEADER + STRIPE_SIZE * num_stripes;
    if num_stripes == 0 || size > buf.len() {
        return Err(Error::new(ErrorKind::Corrupted, "bad btrfs chunk stripes"));
    }
    let item = ChunkMapItem {
        logical,
        length: LittleEndian::read_u64(&buf[0..]),
        devid: LittleEndian::read_u64(&buf[CHUNK_HEADER..]),
        physical: LittleEndian::read_u64(&buf[CHUNK_HEADER + 8..]),
    };
    Ok((item, size))
}

/// inode item 中用到的字段
#[derive(Debug, Clone, Copy)]
pub struct InodeItem {
    pub size: u64,
    pub mode: u32,
    pub atime: u64,
    pub ctime: u64,
    pub mtime: u64,
}

impl InodeItem {
    pub const SIZE: usize = 160;

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(short());
        }
        Ok(Self {
            size: LittleEndian::read_u64(&buf[16..]),
            mode: LittleEndian::read_u32(&buf[52..]),
            atime: LittleEndian::read_u64(&buf[112..]),
            ctime: LittleEndian::read_u64(&buf[124..]),
            mtime: LittleEndian::read_u64(&buf[136..]),
        })
    }
}

/// root item：子卷 B 树根的位置
#[derive(Debug, Clone, Copy)]
pub struct RootItem {
    pub root_dirid: u64,
    pub bytenr: u64,
    pub level: u8,
}

impl RootItem {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 239 {
            return Err(short());
        }
        Ok(Self {
            root_dirid: LittleEndian::read_u64(&buf[168..]),
            bytenr: LittleEndian::read_u64(&buf[176..]),
            level: buf[238],
        })
    }
}

/// root ref 中的子卷名
pub fn root_ref_name(buf: &[u8]) -> Result<&[u8]> {
    if buf.len() < 18 {
        return Err(short());
    }
    let len = LittleEndian::read_u16(&buf[16..]) as usize;
    buf.get(18..18 + len).ok_or_else(short)
}

/// 一个目录项（DIR_ITEM 或 DIR_INDEX）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirItem<'a> {
    pub location: Key,
    pub file_type: u8,
    pub name: &'a [u8],
}

const DIR_ITEM_HEADER: usize = 30;

/// 解析 item 中紧挨着存放的全部目录项（名字哈希冲突时一个 item 中有多项）
pub fn parse_dir_items(buf: &[u8]) -> Result<Vec<DirItem<'_>>> {
    let mut items = Vec::new();
    let mut off = 0;
    while off < buf.len() {
        let rest = &buf[off..];
        if rest.len() < DIR_ITEM_HEADER {
            return Err(short());
        }
        let data_len = LittleEndian::read_u16(&rest[25..]) as usize;
        let name_len = LittleEndian::read_u16(&rest[27..]) as usize;
        let total = DIR_ITEM_HEADER + name_len + data_len;
        if total > rest.len() {
            return Err(short());
        }
        items.push(DirItem {
            location: Key::parse(rest),
            file_type: rest[29],
            name: &rest[DIR_ITEM_HEADER..DIR_ITEM_HEADER + name_len],
        });
        off += total;
    }
    Ok(items)
}

/// 文件数据 extent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileExtent<'a> {
    Inline {
        /// 压缩或加密过
        encoded: bool,
        data: &'a [u8],
    },
    Regular {
        encoded: bool,
        prealloc: bool,
        disk_bytenr: u64,
        /// extent 内的起始偏移
        offset: u64,
        num_bytes: u64,
    },
}

impl<'a> FileExtent<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < 21 {
            return Err(short());
        }
        let encoded = buf[16] != 0 || buf[17] != 0 || LittleEndian::read_u16(&buf[18..]) != 0;
        match buf[20] {
            BTRFS_FILE_EXTENT_INLINE => Ok(FileExtent::Inline {
                encoded,
                data: &buf[21..],
            }),
            kind @ (BTRFS_FILE_EXTENT_REG | BTRFS_FILE_EXTENT_PREALLOC) => {
                if buf.len() < 53 {
                    return Err(short());
                }
                Ok(FileExtent::Regular {
                    encoded,
                    prealloc: kind == BTRFS_FILE_EXTENT_PREALLOC,
                    disk_bytenr: LittleEndian::read_u64(&buf[21..]),
                    offset: LittleEndian::read_u64(&buf[37..]),
                    num_bytes: LittleEndian::read_u64(&buf[45..]),
                })
            }
            _ => Err(Error::new(ErrorKind::Corrupted, "unknown btrfs extent type")),
        }
    }
}
