//! 通用常量定义

/// 默认扇区大小的 log2（512 字节）
pub const SECTOR_SHIFT: u32 = 9;

/// 默认块缓存容量（块数）
pub const DEFAULT_CACHE_BLOCKS: usize = 64;

/// 单次路径解析允许跟随的符号链接数
pub const MAX_SYMLINK_CNT: u32 = 20;

/// 符号链接展开后的路径长度上限（含剩余路径）
pub const MAX_SYMLINK_BUF: usize = 4096;

/// 块指针数组长度（12 个直接块 + 一级/二级/三级间接块）
pub const NR_BLOCK_POINTERS: usize = 15;

/// 直接块数量
pub const NR_DIRECT_BLOCKS: usize = 12;

/// UFS 每个块最多包含的片段数
pub const FRAGMENTS_PER_BLK: u64 = 8;

/// POSIX 文件类型位掩码
pub const S_IFMT: u32 = 0o170000;
