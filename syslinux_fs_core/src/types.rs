//! 通用数据类型：inode、extent、目录项

use alloc::string::String;

use crate::btrfs::BtrfsInode;
use crate::consts::S_IFMT;
use crate::ext2::Ext2Inode;
use crate::fat::FatInode;
use crate::ntfs::NtfsInode;
use crate::ufs::UfsInode;

/// Inode 类型
///
/// 取值与 POSIX `DT_*` 常量一致，因此可以直接由 `(mode & S_IFMT) >> 12` 得到。
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InodeType {
    Unknown = 0,
    Fifo = 1,
    CharDevice = 2,
    Directory = 4,
    BlockDevice = 6,
    RegularFile = 8,
    Symlink = 10,
    Socket = 12,
    Whiteout = 14,
}

impl From<u8> for InodeType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Fifo,
            2 => Self::CharDevice,
            4 => Self::Directory,
            6 => Self::BlockDevice,
            8 => Self::RegularFile,
            10 => Self::Symlink,
            12 => Self::Socket,
            14 => Self::Whiteout,
            _ => Self::Unknown,
        }
    }
}

impl InodeType {
    /// 由 POSIX mode 字段得到类型
    pub fn from_mode(mode: u32) -> Self {
        Self::from(((mode & S_IFMT) >> 12) as u8)
    }
}

/// 文件系统对象
///
/// 由 `iget`/`iget_root` 创建，之后只读。驱动私有的块映射信息保存在 `data` 中。
#[derive(Debug, Clone)]
pub struct Inode {
    /// 文件系统内的标识（inode 号、首簇号、MFT 记录号或 objectid）
    pub ino: u64,
    pub mode: InodeType,
    /// 字节长度
    pub size: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub data: InodeData,
}

impl Inode {
    pub fn is_dir(&self) -> bool {
        self.mode == InodeType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.mode == InodeType::RegularFile
    }

    pub fn is_symlink(&self) -> bool {
        self.mode == InodeType::Symlink
    }
}

/// 各驱动的 inode 私有数据
#[derive(Debug, Clone)]
pub enum InodeData {
    Ext2(Ext2Inode),
    Fat(FatInode),
    Ntfs(NtfsInode),
    Ufs(UfsInode),
    Btrfs(BtrfsInode),
}

/// extent 的物理起点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pstart {
    /// 设备扇区号
    Sector(u64),
    /// 空洞，读出全零
    Zero,
}

impl Pstart {
    /// 前进 `sectors` 个扇区；空洞保持不变
    pub fn advance(self, sectors: u64) -> Self {
        match self {
            Pstart::Sector(s) => Pstart::Sector(s + sectors),
            Pstart::Zero => Pstart::Zero,
        }
    }
}

/// 逻辑扇区区间到物理扇区区间的映射，单位均为扇区
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub lstart: u64,
    pub pstart: Pstart,
    pub len: u64,
}

impl Extent {
    pub const EMPTY: Extent = Extent {
        lstart: 0,
        pstart: Pstart::Zero,
        len: 0,
    };

    /// 是否覆盖逻辑扇区 `lsector`
    pub fn contains(&self, lsector: u64) -> bool {
        self.len != 0 && lsector >= self.lstart && lsector - self.lstart < self.len
    }
}

/// 目录项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    /// 读取此项之后的目录位置
    pub offset: u64,
    pub kind: InodeType,
    pub name: String,
}

/// 目录遍历位置
///
/// `offset` 的含义由驱动决定（字节偏移、索引号等）；`block` 只有 NTFS
/// 使用，记录当前所在的 INDX 块。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirCursor {
    pub offset: u64,
    pub block: Option<u64>,
}
