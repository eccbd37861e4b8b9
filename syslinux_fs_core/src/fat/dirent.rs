//! FAT 目录项和 VFAT 长文件名

use alloc::string::String;
use alloc::vec::Vec;

use byteorder::{ByteOrder, LittleEndian};

use crate::codepage::Codepage;

/// 目录项大小
pub const DIR_ENTRY_SIZE: usize = 32;

/// 长文件名目录项的属性值
pub const ATTR_LONG_NAME: u8 = 0x0f;

/// 已删除目录项的首字节
pub const DELETED_MARK: u8 = 0xe5;

/// 每个长文件名目录项容纳的 UTF-16 单元数
pub const LFN_CHARS: usize = 13;

/// 一个长文件名最多跨越的目录项数
pub const LFN_MAX_SLOTS: usize = 20;

/// 短文件名主名为小写
const LCASE_BASE: u8 = 0x08;
/// 短文件名扩展名为小写
const LCASE_EXT: u8 = 0x10;

bitflags::bitflags! {
    /// 目录项属性
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FatAttr: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
    }
}

/// 8.3 短目录项
#[derive(Debug, Clone, Copy)]
pub struct ShortEntry {
    pub name: [u8; 11],
    pub attr: FatAttr,
    pub lcase: u8,
    pub first_cluster: u32,
    pub file_size: u32,
    pub c_date: u16,
    pub c_time: u16,
    pub a_date: u16,
    pub w_date: u16,
    pub w_time: u16,
}

impl ShortEntry {
    pub fn parse(raw: &[u8]) -> Self {
        let mut name = [0u8; 11];
        name.copy_from_slice(&raw[..11]);
        let hi = LittleEndian::read_u16(&raw[20..]) as u32;
        let lo = LittleEndian::read_u16(&raw[26..]) as u32;
        Self {
            name,
            attr: FatAttr::from_bits_retain(raw[11]),
            lcase: raw[12],
            first_cluster: (hi << 16) | lo,
            file_size: LittleEndian::read_u32(&raw[28..]),
            c_time: LittleEndian::read_u16(&raw[14..]),
            c_date: LittleEndian::read_u16(&raw[16..]),
            a_date: LittleEndian::read_u16(&raw[18..]),
            w_time: LittleEndian::read_u16(&raw[22..]),
            w_date: LittleEndian::read_u16(&raw[24..]),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.attr.contains(FatAttr::DIRECTORY)
    }

    /// 还原为可显示的文件名，按 `lcase` 标志转小写
    pub fn display_name(&self, cp: &Codepage) -> String {
        let mut out = String::with_capacity(12);
        let push = |out: &mut String, c: u8, lower: bool| {
            let c = if lower { cp.to_lower(c) } else { c };
            out.extend(char::from_u32(cp.to_unicode(c) as u32));
        };

        for (i, &c) in self.name[..8].iter().enumerate() {
            if c == b' ' {
                break;
            }
            // 0x05 占位表示首字节实际为 0xe5
            let c = if i == 0 && c == 0x05 { DELETED_MARK } else { c };
            push(&mut out, c, self.lcase & LCASE_BASE != 0);
        }
        if self.name[8] != b' ' {
            out.push('.');
            for &c in self.name[8..].iter().take_while(|&&c| c != b' ') {
                push(&mut out, c, self.lcase & LCASE_EXT != 0);
            }
        }
        out
    }
}

/// 短文件名校验和，长文件名目录项用它绑定所属的短目录项
pub fn lfn_checksum(name: &[u8; 11]) -> u8 {
    name.iter()
        .fold(0u8, |sum, &c| (((sum & 1) << 7) | (sum >> 1)).wrapping_add(c))
}

/// 把路径分量转换为 11 字节的 8.3 名
///
/// `.` 和 `..` 原样保留；遇到空白或 `/` 停止；第一个 `.` 之后的内容进入扩展名。
pub fn mangle_dos_name(src: &[u8], cp: &Codepage) -> [u8; 11] {
    let mut out = [b' '; 11];
    if src == b"." || src == b".." {
        out[..src.len()].copy_from_slice(src);
        return out;
    }

    let mut i = 0;
    for &c in src {
        if i >= 11 || c <= b' ' || c == b'/' {
            break;
        }
        if c == b'.' {
            i = 8;
            continue;
        }
        let mut c = cp.to_upper(c);
        if i == 0 && c == DELETED_MARK {
            c = 0x05;
        }
        out[i] = c;
        i += 1;
    }
    out
}

/// 长文件名目录项
#[derive(Debug, Clone, Copy)]
pub struct LongEntry {
    pub id: u8,
    pub checksum: u8,
    pub chars: [u16; LFN_CHARS],
}

impl LongEntry {
    pub fn parse(raw: &[u8]) -> Self {
        let mut chars = [0u16; LFN_CHARS];
        let fields: [(usize, usize); 3] = [(1, 5), (14, 6), (28, 2)];
        let mut n = 0;
        for (off, count) in fields {
            for k in 0..count {
                chars[n] = LittleEndian::read_u16(&raw[off + 2 * k..]);
                n += 1;
            }
        }
        Self {
            id: raw[0],
            checksum: raw[13],
            chars,
        }
    }
}

/// 长文件名拼装器
///
/// 长文件名目录项按逆序存放在短目录项之前：第一项的 `id` 带 0x40 标志，
/// 之后各项的序号严格递减到 1，并且携带同一个校验和。任何不连续都会丢弃
/// 已拼装的内容。缓冲区属于单次目录扫描，不能跨扫描共享。
pub struct LongName {
    units: [u16; LFN_CHARS * LFN_MAX_SLOTS],
    len: usize,
    next: u8,
    csum: u8,
    complete: bool,
}

impl LongName {
    pub fn new() -> Self {
        Self {
            units: [0; LFN_CHARS * LFN_MAX_SLOTS],
            len: 0,
            next: 0,
            csum: 0,
            complete: false,
        }
    }

    pub fn reset(&mut self) {
        self.next = 0;
        self.complete = false;
    }

    /// 加入一个长文件名目录项
    pub fn feed(&mut self, entry: &LongEntry) {
        let seq = entry.id & 0x3f;
        if entry.id & 0x40 != 0 {
            if seq == 0 || seq as usize > LFN_MAX_SLOTS {
                self.reset();
                return;
            }
            self.units.fill(0);
            self.csum = entry.checksum;
            self.len = seq as usize * LFN_CHARS;
            self.complete = false;
        } else if self.next == 0 || entry.id != self.next || entry.checksum != self.csum {
            self.reset();
            return;
        }

        let slot = seq as usize - 1;
        self.units[slot * LFN_CHARS..(slot + 1) * LFN_CHARS].copy_from_slice(&entry.chars);
        self.next = seq - 1;
        self.complete = self.next == 0;
    }

    /// 遇到短目录项时取出拼装好的长文件名
    ///
    /// # 返回
    ///
    /// 序列完整且校验和与短文件名一致时返回名字的 UTF-16 单元（不含结尾的 0 和填充）
    pub fn finish(&mut self, short: &[u8; 11]) -> Option<&[u16]> {
        let ok = self.complete && lfn_checksum(short) == self.csum;
        self.reset();
        if !ok {
            return None;
        }
        let units = &self.units[..self.len];
        let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
        // 结尾的 0 之后只能是 0xffff 填充
        if units[end..].iter().skip(1).any(|&u| u != 0xffff) {
            return None;
        }
        Some(&units[..end])
    }
}

impl Default for LongName {
    fn default() -> Self {
        Self::new()
    }
}

/// 把查询名转换为 UTF-16 单元
///
/// 合法的 UTF-8 按字符编码；否则把每个字节当作代码页字符。
pub fn query_units(name: &[u8], cp: &Codepage) -> Vec<u16> {
    match core::str::from_utf8(name) {
        Ok(s) => s.encode_utf16().collect(),
        Err(_) => name.iter().map(|&c| cp.to_unicode(c)).collect(),
    }
}

/// 长文件名比较，忽略代码页内字符的大小写
pub fn match_longname(query: &[u16], long: &[u16], cp: &Codepage) -> bool {
    query.len() == long.len()
        && query.iter().zip(long).all(|(&q, &u)| {
            q == u || cp.from_unicode(q).is_some_and(|c| cp.matches(c, u))
        })
}
