//! ext2/3/4 只读驱动
//!
//! 支持传统的间接块映射和 ext4 extent 树。日志不会被重放。

mod extent;
mod superblock;

pub use extent::{map_extent, EXT4_EXT_MAGIC};
pub use superblock::{IncompatFeatures, Superblock, EXT2_SUPER_MAGIC, SUPERBLOCK_OFFSET};

use alloc::string::String;
use alloc::vec::Vec;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::block::BlockDevice;
use crate::bmap::{BlockRun, IndirectMap};
use crate::cache::BlockCache;
use crate::consts::NR_BLOCK_POINTERS;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::FsOps;
use crate::types::{DirCursor, DirEntry, Extent, Inode, InodeData, InodeType, Pstart};

/// 根目录 inode 号
pub const EXT2_ROOT_INO: u64 = 2;

/// 目录项头部大小（inode + rec_len + name_len + file_type）
const DIR_ENTRY_HEADER: usize = 8;

bitflags::bitflags! {
    /// inode 标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InodeFlags: u32 {
        const INDEX = 0x0000_1000;
        const EXTENTS = 0x0008_0000;
        const INLINE_DATA = 0x1000_0000;
    }
}

/// ext2 inode 私有数据
#[derive(Debug, Clone)]
pub struct Ext2Inode {
    /// `i_block` 原始内容：15 个块指针或 extent 树根
    pub i_block: [u8; 60],
    pub flags: InodeFlags,
    pub file_acl: u64,
    /// 以 512 字节为单位的占用块数
    pub sectors: u64,
}

impl Ext2Inode {
    /// 把 `i_block` 解释为 15 个块指针
    fn block_pointers(&self) -> [u64; NR_BLOCK_POINTERS] {
        let mut ptrs = [0u64; NR_BLOCK_POINTERS];
        for (i, ptr) in ptrs.iter_mut().enumerate() {
            *ptr = LittleEndian::read_u32(&self.i_block[i * 4..]) as u64;
        }
        ptrs
    }
}

fn pvt(inode: &Inode) -> Result<&Ext2Inode> {
    match &inode.data {
        InodeData::Ext2(pvt) => Ok(pvt),
        _ => Err(Error::new(ErrorKind::InvalidInput, "inode is not an ext2 inode")),
    }
}

/// 目录项中的文件类型转换为通用类型
fn cvt_type(file_type: u8) -> InodeType {
    const TYPES: [InodeType; 8] = [
        InodeType::Unknown,
        InodeType::RegularFile,
        InodeType::Directory,
        InodeType::CharDevice,
        InodeType::BlockDevice,
        InodeType::Fifo,
        InodeType::Socket,
        InodeType::Symlink,
    ];
    TYPES
        .get(file_type as usize)
        .copied()
        .unwrap_or(InodeType::Unknown)
}

/// 原始目录项
struct RawDirEntry<'a> {
    inode: u32,
    rec_len: usize,
    file_type: u8,
    name: &'a [u8],
}

impl<'a> RawDirEntry<'a> {
    /// 解析 `data` 开头的目录项；记录越过 `limit` 时返回 `None`
    fn parse(data: &'a [u8], limit: usize) -> Option<Self> {
        if limit < DIR_ENTRY_HEADER || data.len() < DIR_ENTRY_HEADER {
            return None;
        }
        let rec_len = LittleEndian::read_u16(&data[4..]) as usize;
        let name_len = data[6] as usize;
        if rec_len < DIR_ENTRY_HEADER || rec_len > limit || DIR_ENTRY_HEADER + name_len > rec_len {
            return None;
        }
        Some(Self {
            inode: LittleEndian::read_u32(data),
            rec_len,
            file_type: data[7],
            name: &data[DIR_ENTRY_HEADER..DIR_ENTRY_HEADER + name_len],
        })
    }
}

/// ext2/3/4 文件系统实例
pub struct Ext2Fs {
    sb: Superblock,
    block_shift: u32,
    sector_shift: u32,
    inodes_per_block: u32,
    /// 每个块组的 inode 表起始块
    inode_tables: Vec<u64>,
    indirect: IndirectMap,
}

impl Ext2Fs {
    /// 挂载
    ///
    /// 读取 1024 字节处的 superblock 并校验魔数，读入全部块组描述符，
    /// 然后以文件系统块大小初始化缓存，并把块 0 固定为全零。
    pub fn mount<D: BlockDevice>(cache: &mut BlockCache<D>) -> Result<Self> {
        let sb = Superblock::load(cache.bdev_mut())?;
        sb.validate()?;

        let block_shift = sb.block_shift();
        let sector_shift = cache.sector_shift();
        if block_shift < sector_shift {
            return Err(Error::new(
                ErrorKind::Unsupported,
                "ext2 block smaller than device sector",
            ));
        }
        cache.init(block_shift)?;

        let block_size = 1u64 << block_shift;
        let desc_size = sb.desc_size as u64;
        let desc_per_block = block_size / desc_size;
        let groups = sb.group_count();
        let wide = sb.feature_incompat.contains(IncompatFeatures::BIT64) && desc_size >= 64;

        let mut inode_tables = Vec::with_capacity(groups as usize);
        for group in 0..groups {
            let block = sb.first_data_block as u64 + 1 + group / desc_per_block;
            let off = ((group % desc_per_block) * desc_size) as usize;
            let data = cache.get(block)?;
            let desc = &data[off..off + desc_size as usize];
            let mut table = LittleEndian::read_u32(&desc[8..]) as u64;
            if wide {
                table |= (LittleEndian::read_u32(&desc[40..]) as u64) << 32;
            }
            inode_tables.push(table);
        }

        cache.insert_zeroed(0)?;

        debug!(
            "ext2 mounted: block size {}, {} groups, inode size {}",
            block_size, groups, sb.inode_size
        );

        Ok(Self {
            inodes_per_block: (block_size / sb.inode_size as u64) as u32,
            indirect: IndirectMap::new(block_shift, 2, 0, 1),
            block_shift,
            sector_shift,
            inode_tables,
            sb,
        })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    fn block_size(&self) -> usize {
        1 << self.block_shift
    }

    /// 按 inode 号读取 inode
    pub fn iget_by_inr<D: BlockDevice>(&self, cache: &mut BlockCache<D>, inr: u64) -> Result<Inode> {
        if inr == 0 || inr > self.sb.inodes_count as u64 {
            return Err(Error::new(ErrorKind::Corrupted, "inode number out of range"));
        }
        let index = inr - 1;
        let ipg = self.sb.inodes_per_group as u64;
        let group = (index / ipg) as usize;
        let offset = index % ipg;
        let table = *self
            .inode_tables
            .get(group)
            .ok_or(Error::new(ErrorKind::Corrupted, "inode group out of range"))?;

        let block = table + offset / self.inodes_per_block as u64;
        let off = (offset % self.inodes_per_block as u64) as usize * self.sb.inode_size as usize;
        let data = cache.get(block)?;
        let raw = &data[off..off + 128];

        let mode = LittleEndian::read_u16(&raw[0..]);
        let size = LittleEndian::read_u32(&raw[4..]) as u64
            | (LittleEndian::read_u32(&raw[108..]) as u64) << 32;
        let file_acl = LittleEndian::read_u32(&raw[104..]) as u64
            | (LittleEndian::read_u16(&raw[118..]) as u64) << 32;
        let sectors = LittleEndian::read_u32(&raw[28..]) as u64
            | (LittleEndian::read_u16(&raw[116..]) as u64) << 32;
        let mut i_block = [0u8; 60];
        i_block.copy_from_slice(&raw[40..100]);

        Ok(Inode {
            ino: inr,
            mode: InodeType::from_mode(mode as u32),
            size,
            atime: LittleEndian::read_u32(&raw[8..]) as u64,
            ctime: LittleEndian::read_u32(&raw[12..]) as u64,
            mtime: LittleEndian::read_u32(&raw[16..]) as u64,
            data: InodeData::Ext2(Ext2Inode {
                i_block,
                flags: InodeFlags::from_bits_retain(LittleEndian::read_u32(&raw[32..])),
                file_acl,
                sectors,
            }),
        })
    }

    /// 逻辑块到物理块
    pub fn bmap<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        inode: &Inode,
        block: u64,
    ) -> Result<BlockRun> {
        let pvt = pvt(inode)?;
        if pvt.flags.contains(InodeFlags::INLINE_DATA) {
            return Err(Error::new(ErrorKind::Unsupported, "ext4 inline data"));
        }
        if pvt.flags.contains(InodeFlags::EXTENTS) {
            let block = u32::try_from(block)
                .map_err(|_| Error::new(ErrorKind::InvalidInput, "block beyond extent range"))?;
            map_extent(cache, &pvt.i_block, block)
        } else {
            self.indirect.map(cache, &pvt.block_pointers(), block)
        }
    }

    /// 读取文件的第 `lblock` 块（空洞映射到全零的块 0）
    fn get_block<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        inode: &Inode,
        lblock: u64,
    ) -> Result<alloc::sync::Arc<[u8]>> {
        let run = self.bmap(cache, inode, lblock)?;
        cache.get(run.addr)
    }

    /// 在目录中查找名字完全相同的目录项
    fn find_entry<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        dir: &Inode,
        name: &[u8],
    ) -> Result<Option<u32>> {
        let block_size = self.block_size() as u64;
        let mut index = 0;
        let mut pos = 0u64;

        while pos < dir.size {
            let data = self.get_block(cache, dir, index)?;
            let max = block_size.min(dir.size - pos) as usize;
            let mut off = 0;
            while off + DIR_ENTRY_HEADER < max {
                let de = match RawDirEntry::parse(&data[off..], max - off) {
                    Some(de) => de,
                    None => break,
                };
                if de.inode != 0 && de.name == name {
                    return Ok(Some(de.inode));
                }
                off += de.rec_len;
            }
            index += 1;
            pos += block_size;
        }
        Ok(None)
    }
}

impl FsOps for Ext2Fs {
    fn name(&self) -> &'static str {
        "ext2"
    }

    fn block_shift(&self) -> u32 {
        self.block_shift
    }

    fn uuid(&self) -> Option<[u8; 16]> {
        Some(self.sb.uuid)
    }

    fn iget_root<D: BlockDevice>(&self, cache: &mut BlockCache<D>) -> Result<Inode> {
        self.iget_by_inr(cache, EXT2_ROOT_INO)
    }

    fn iget<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        name: &[u8],
        parent: &Inode,
    ) -> Result<Option<Inode>> {
        match self.find_entry(cache, parent, name)? {
            Some(inr) => self.iget_by_inr(cache, inr as u64).map(Some),
            None => Ok(None),
        }
    }

    fn readdir<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        dir: &mut Inode,
        cursor: &mut DirCursor,
    ) -> Result<Option<DirEntry>> {
        let mask = self.block_size() as u64 - 1;
        while cursor.offset < dir.size {
            let data = self.get_block(cache, dir, cursor.offset >> self.block_shift)?;
            let off = (cursor.offset & mask) as usize;
            let de = RawDirEntry::parse(&data[off..], data.len() - off)
                .ok_or(Error::new(ErrorKind::Corrupted, "bad ext2 directory entry"))?;

            cursor.offset += de.rec_len as u64;
            if de.inode == 0 {
                continue;
            }
            return Ok(Some(DirEntry {
                ino: de.inode as u64,
                offset: cursor.offset,
                kind: cvt_type(de.file_type),
                name: String::from_utf8_lossy(de.name).into_owned(),
            }));
        }
        Ok(None)
    }

    fn next_extent<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        inode: &mut Inode,
        lstart: u64,
    ) -> Result<Option<Extent>> {
        let blktosec = self.block_shift - self.sector_shift;
        let blkmask = (1u64 << blktosec) - 1;

        let run = self.bmap(cache, inode, lstart >> blktosec)?;
        let pstart = if run.addr == 0 {
            Pstart::Zero
        } else {
            Pstart::Sector((run.addr << blktosec) | (lstart & blkmask))
        };
        Ok(Some(Extent {
            lstart,
            pstart,
            len: (run.nblocks << blktosec) - (lstart & blkmask),
        }))
    }

    fn readlink<D: BlockDevice>(&self, cache: &mut BlockCache<D>, inode: &Inode) -> Result<Vec<u8>> {
        let pvt = pvt(inode)?;
        let size = inode.size as usize;
        if size > self.block_size() {
            return Err(Error::new(ErrorKind::Corrupted, "symlink longer than a block"));
        }

        let sec_per_block = (self.block_size() >> 9) as u64;
        let fast = (if pvt.file_acl != 0 { sec_per_block } else { 0 }) == pvt.sectors;
        if fast {
            if size > pvt.i_block.len() {
                return Err(Error::new(ErrorKind::Corrupted, "fast symlink too long"));
            }
            return Ok(pvt.i_block[..size].to_vec());
        }

        let data = self.get_block(cache, inode, 0)?;
        Ok(data[..size].to_vec())
    }
}
