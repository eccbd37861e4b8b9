//! MFT 记录、更新序列修正和属性记录

use alloc::vec::Vec;

use byteorder::{ByteOrder, LittleEndian};
use log::error;

use super::runlist::{parse_runs, Run};
use crate::error::{Error, ErrorKind, Result};

/// MFT 记录魔数 "FILE"
pub const NTFS_MAGIC_FILE: u32 = 0x454C_4946;
/// 索引块魔数 "INDX"
pub const NTFS_MAGIC_INDX: u32 = 0x5844_4E49;

/// 更新序列的步长，与设备扇区大小无关
pub const FIXUP_STRIDE: usize = 512;

/// 属性类型
pub const AT_STANDARD_INFORMATION: u32 = 0x10;
pub const AT_ATTR_LIST: u32 = 0x20;
pub const AT_FILENAME: u32 = 0x30;
pub const AT_VOL_INFO: u32 = 0x70;
pub const AT_DATA: u32 = 0x80;
pub const AT_INDEX_ROOT: u32 = 0x90;
pub const AT_INDEX_ALLOCATION: u32 = 0xA0;
pub const AT_END: u32 = 0xFFFF_FFFF;

bitflags::bitflags! {
    /// MFT 记录标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RecordFlags: u16 {
        const IN_USE = 0x0001;
        const IS_DIRECTORY = 0x0002;
    }

    /// 属性标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AttrFlags: u16 {
        const COMPRESSED = 0x00FF;
        const ENCRYPTED = 0x4000;
        const SPARSE = 0x8000;
    }
}

/// 应用更新序列修正
///
/// 记录每 512 字节的最后两个字节在写盘时被替换成了更新序列号（USN），
/// 原值保存在更新序列数组中。这里逐段校验尾部等于 USN 后换回原值；
/// 任何一段不等都说明记录被撕裂，返回损坏错误，缓冲区内容不再可信。
pub fn apply_fixups(buf: &mut [u8]) -> Result<()> {
    if buf.len() < 8 {
        return Err(Error::new(ErrorKind::Corrupted, "NTFS record too short"));
    }
    let usa_ofs = LittleEndian::read_u16(&buf[4..]) as usize;
    let usa_count = LittleEndian::read_u16(&buf[6..]) as usize;
    if usa_count == 0
        || usa_ofs + 2 * usa_count > buf.len()
        || (usa_count - 1) * FIXUP_STRIDE > buf.len()
    {
        return Err(Error::new(ErrorKind::Corrupted, "bad NTFS update sequence array"));
    }

    let usn = LittleEndian::read_u16(&buf[usa_ofs..]);
    for i in 1..usa_count {
        let tail = i * FIXUP_STRIDE - 2;
        if LittleEndian::read_u16(&buf[tail..]) != usn {
            error!("NTFS fixup mismatch in stride {}", i - 1);
            return Err(Error::new(ErrorKind::Corrupted, "NTFS fixup mismatch"));
        }
        let saved = LittleEndian::read_u16(&buf[usa_ofs + 2 * i..]);
        LittleEndian::write_u16(&mut buf[tail..], saved);
    }
    Ok(())
}

/// 属性内容
#[derive(Debug, Clone)]
pub enum AttrValue {
    /// 常驻属性：值直接存放在记录中
    Resident(Vec<u8>),
    /// 非常驻属性：值存放在数据运行描述的簇中
    NonResident {
        runs: Vec<Run>,
        lowest_vcn: u64,
        allocated_size: u64,
        data_size: u64,
        initialized_size: u64,
    },
}

/// 解析后的属性记录
#[derive(Debug, Clone)]
pub struct Attr {
    pub kind: u32,
    pub flags: AttrFlags,
    pub name_len: u8,
    pub value: AttrValue,
}

impl Attr {
    /// 解析一个属性记录
    fn parse(raw: &[u8]) -> Result<Self> {
        let bad = || Error::new(ErrorKind::Corrupted, "NTFS attribute out of bounds");
        let kind = LittleEndian::read_u32(raw);
        let non_resident = raw[8] != 0;
        let name_len = raw[9];
        let flags = AttrFlags::from_bits_retain(LittleEndian::read_u16(&raw[12..]));

        let value = if non_resident {
            if raw.len() < 64 {
                return Err(bad());
            }
            let lowest_vcn = LittleEndian::read_u64(&raw[16..]);
            let pairs = LittleEndian::read_u16(&raw[32..]) as usize;
            if pairs > raw.len() {
                return Err(bad());
            }
            AttrValue::NonResident {
                runs: parse_runs(&raw[pairs..], lowest_vcn)?,
                lowest_vcn,
                allocated_size: LittleEndian::read_u64(&raw[40..]),
                data_size: LittleEndian::read_u64(&raw[48..]),
                initialized_size: LittleEndian::read_u64(&raw[56..]),
            }
        } else {
            if raw.len() < 24 {
                return Err(bad());
            }
            let len = LittleEndian::read_u32(&raw[16..]) as usize;
            let off = LittleEndian::read_u16(&raw[20..]) as usize;
            let value = raw.get(off..off + len).ok_or_else(bad)?;
            AttrValue::Resident(value.to_vec())
        };

        Ok(Self {
            kind,
            flags,
            name_len,
            value,
        })
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.value, AttrValue::Resident(_))
    }

    /// 属性值的字节长度（非常驻属性取 `data_size`）
    pub fn data_size(&self) -> u64 {
        match &self.value {
            AttrValue::Resident(v) => v.len() as u64,
            AttrValue::NonResident { data_size, .. } => *data_size,
        }
    }
}

/// 已经过修正的 MFT 记录
#[derive(Debug, Clone)]
pub struct MftRecord {
    buf: Vec<u8>,
}

impl MftRecord {
    /// 校验魔数并应用修正
    pub fn from_raw(mut buf: Vec<u8>) -> Result<Self> {
        if buf.len() < 48 || LittleEndian::read_u32(&buf) != NTFS_MAGIC_FILE {
            return Err(Error::new(ErrorKind::Corrupted, "bad MFT record magic"));
        }
        apply_fixups(&mut buf)?;
        let rec = Self { buf };
        if rec.attrs_offset() >= rec.used_len() {
            return Err(Error::new(ErrorKind::Corrupted, "bad MFT record layout"));
        }
        Ok(rec)
    }

    pub fn seq_no(&self) -> u16 {
        LittleEndian::read_u16(&self.buf[16..])
    }

    fn attrs_offset(&self) -> usize {
        LittleEndian::read_u16(&self.buf[20..]) as usize
    }

    pub fn flags(&self) -> RecordFlags {
        RecordFlags::from_bits_retain(LittleEndian::read_u16(&self.buf[22..]))
    }

    /// 记录中已使用的字节数（不超过缓冲区）
    fn used_len(&self) -> usize {
        (LittleEndian::read_u32(&self.buf[24..]) as usize).min(self.buf.len())
    }

    pub fn bytes_allocated(&self) -> u32 {
        LittleEndian::read_u32(&self.buf[28..])
    }

    /// 记录自身的编号；只有 3.1 及以后的卷才写入该字段
    pub fn record_no(&self) -> u32 {
        LittleEndian::read_u32(&self.buf[44..])
    }

    pub fn is_dir(&self) -> bool {
        self.flags().contains(RecordFlags::IS_DIRECTORY)
    }

    /// 依次解析记录中的属性，直到 `AT_END`
    pub fn attrs(&self) -> Result<Vec<Attr>> {
        let end = self.used_len();
        let mut off = self.attrs_offset();
        let mut attrs = Vec::new();
        loop {
            if off + 8 > end {
                return Err(Error::new(ErrorKind::Corrupted, "MFT record missing AT_END"));
            }
            let kind = LittleEndian::read_u32(&self.buf[off..]);
            if kind == AT_END {
                return Ok(attrs);
            }
            let len = LittleEndian::read_u32(&self.buf[off + 4..]) as usize;
            if len < 16 || off + len > end {
                return Err(Error::new(ErrorKind::Corrupted, "NTFS attribute out of bounds"));
            }
            attrs.push(Attr::parse(&self.buf[off..off + len])?);
            off += len;
        }
    }

    /// 查找记录内指定类型的第一个属性；`$DATA` 只匹配无名数据流
    pub fn find_attr(&self, kind: u32) -> Result<Option<Attr>> {
        Ok(self
            .attrs()?
            .into_iter()
            .find(|a| a.kind == kind && (kind != AT_DATA || a.name_len == 0)))
    }
}

/// `$ATTRIBUTE_LIST` 中的一项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrListEntry {
    pub kind: u32,
    pub name_len: u8,
    pub lowest_vcn: u64,
    /// 属性所在的 MFT 记录号
    pub record: u64,
}

/// 解析 `$ATTRIBUTE_LIST` 的值
pub fn parse_attr_list(data: &[u8]) -> Result<Vec<AttrListEntry>> {
    let mut entries = Vec::new();
    let mut off = 0;
    while off + 26 <= data.len() {
        let len = LittleEndian::read_u16(&data[off + 4..]) as usize;
        if len < 26 || off + len > data.len() {
            return Err(Error::new(ErrorKind::Corrupted, "bad NTFS attribute list entry"));
        }
        entries.push(AttrListEntry {
            kind: LittleEndian::read_u32(&data[off..]),
            name_len: data[off + 6],
            lowest_vcn: LittleEndian::read_u64(&data[off + 8..]),
            record: LittleEndian::read_u64(&data[off + 16..]) & 0x0000_FFFF_FFFF_FFFF,
        });
        off += len;
    }
    Ok(entries)
}
