//! `$I30` 目录索引

use alloc::vec::Vec;

use byteorder::{ByteOrder, LittleEndian};
use log::error;

use crate::codepage::Codepage;
use crate::error::{Error, ErrorKind, Result};

/// 索引项头部大小
const ENTRY_HEADER: usize = 16;
/// `$FILE_NAME` 键中文件名之前的字节数
const FILENAME_HEADER: usize = 66;

/// INDEX_ROOT 值中索引头的位置
pub const ROOT_HEADER_OFFSET: usize = 16;
/// INDX 块中索引头的位置
pub const BLOCK_HEADER_OFFSET: usize = 24;

/// `file_attrs` 中表示“目录”的位
pub const FILE_ATTR_DIRECTORY: u32 = 0x1000_0000;

bitflags::bitflags! {
    /// 索引项标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IndexEntryFlags: u16 {
        /// 带有子节点指针
        const NODE = 0x0001;
        /// 节点中的最后一项，没有键
        const END = 0x0002;
    }
}

/// 文件名命名空间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameSpace {
    Posix,
    Win32,
    Dos,
    Win32AndDos,
}

impl From<u8> for NameSpace {
    fn from(value: u8) -> Self {
        match value {
            0 => NameSpace::Posix,
            1 => NameSpace::Win32,
            2 => NameSpace::Dos,
            _ => NameSpace::Win32AndDos,
        }
    }
}

/// 一个带文件名键的索引项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// 指向的 MFT 记录号
    pub mft_no: u64,
    pub file_attrs: u32,
    pub namespace: NameSpace,
    pub name: Vec<u16>,
}

impl IndexEntry {
    pub fn is_dir(&self) -> bool {
        self.file_attrs & FILE_ATTR_DIRECTORY != 0
    }

    /// readdir 是否应该列出该项：隐藏 `.`、`$` 开头的名字和 DOS 短名
    pub fn is_listed(&self) -> bool {
        self.namespace != NameSpace::Dos
            && !matches!(self.name.first(), Some(&u) if u == b'.' as u16 || u == b'$' as u16)
    }
}

/// 一个索引节点（INDEX_ROOT 或一个 INDX 块）中的全部项
#[derive(Debug, Clone, Default)]
pub struct IndexNode {
    pub entries: Vec<IndexEntry>,
    /// 结束项带有子节点指针，说明还有内容在 `$INDEX_ALLOCATION` 中
    pub has_child: bool,
}

/// 解析索引头之后的索引项
///
/// # 参数
///
/// * `buf` - 包含索引头的缓冲区
/// * `header` - 索引头在缓冲区中的偏移
///
/// 每个索引项都必须完整落在索引头声明的长度内，越界视为损坏。
pub fn parse_node(buf: &[u8], header: usize) -> Result<IndexNode> {
    let corrupt = || {
        error!("NTFS index entry exceeds node bounds");
        Error::new(ErrorKind::Corrupted, "NTFS index entry out of bounds")
    };
    if header + 16 > buf.len() {
        return Err(corrupt());
    }
    let entries_offset = LittleEndian::read_u32(&buf[header..]) as usize;
    let index_len = LittleEndian::read_u32(&buf[header + 4..]) as usize;
    let end = header + index_len;
    if end > buf.len() {
        return Err(corrupt());
    }

    let mut node = IndexNode::default();
    let mut off = header + entries_offset;
    loop {
        if off + ENTRY_HEADER > end {
            return Err(corrupt());
        }
        let len = LittleEndian::read_u16(&buf[off + 8..]) as usize;
        let key_len = LittleEndian::read_u16(&buf[off + 10..]) as usize;
        let flags = IndexEntryFlags::from_bits_retain(LittleEndian::read_u16(&buf[off + 12..]));
        if len < ENTRY_HEADER || off + len > end {
            return Err(corrupt());
        }
        if flags.contains(IndexEntryFlags::END) {
            node.has_child = flags.contains(IndexEntryFlags::NODE);
            return Ok(node);
        }

        let key = &buf[off + ENTRY_HEADER..off + len];
        if key_len < FILENAME_HEADER || key_len > key.len() {
            return Err(corrupt());
        }
        let name_len = key[64] as usize;
        if FILENAME_HEADER + 2 * name_len > key_len {
            return Err(corrupt());
        }
        let name = key[FILENAME_HEADER..FILENAME_HEADER + 2 * name_len]
            .chunks_exact(2)
            .map(LittleEndian::read_u16)
            .collect();

        node.entries.push(IndexEntry {
            mft_no: LittleEndian::read_u64(&buf[off..]) & 0x0000_FFFF_FFFF_FFFF,
            file_attrs: LittleEndian::read_u32(&key[56..]),
            namespace: NameSpace::from(key[65]),
            name,
        });
        off += len;
    }
}

/// 文件名比较器
///
/// 把索引项中的 UTF-16 文件名逐个单元转换为代码页字节后与查询名比较。
/// 转换结果用一个单项缓存记住，文件名中常见的重复字符无需反复查表。
/// 代码页中没有的单元直接判为不匹配。
pub struct NameMatcher {
    cp: &'static Codepage,
    last: Option<(u16, Option<u8>)>,
}

impl NameMatcher {
    pub fn new(cp: &'static Codepage) -> Self {
        Self { cp, last: None }
    }

    fn to_cp(&mut self, u: u16) -> Option<u8> {
        match self.last {
            Some((cached, c)) if cached == u => c,
            _ => {
                let c = self.cp.from_unicode(u);
                self.last = Some((u, c));
                c
            }
        }
    }

    /// POSIX 命名空间区分大小写，其余命名空间不区分
    pub fn matches(&mut self, query: &[u8], entry: &IndexEntry) -> bool {
        if query.len() != entry.name.len() {
            return false;
        }
        let exact = entry.namespace == NameSpace::Posix;
        for (&q, &u) in query.iter().zip(&entry.name) {
            let c = match self.to_cp(u) {
                Some(c) => c,
                None => return false,
            };
            let same = if exact {
                c == q
            } else {
                self.cp.to_lower(c) == self.cp.to_lower(q)
            };
            if !same {
                return false;
            }
        }
        true
    }
}
