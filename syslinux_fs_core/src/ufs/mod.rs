//! UFS1/UFS2 只读驱动
//!
//! 两个版本的块指针在加载 inode 时统一扩展为 64 位，之后共用同一套块映射。
//! 块指针以片段为单位，一个块跨若干个连续片段。

mod superblock;

pub use superblock::{
    Superblock, UfsType, SUPERBLOCK_OFFSETS, UFS1_SUPER_MAGIC, UFS2_SUPER_MAGIC,
};

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};

use crate::block::BlockDevice;
use crate::bmap::{BlockRun, IndirectMap};
use crate::cache::BlockCache;
use crate::consts::NR_BLOCK_POINTERS;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::FsOps;
use crate::types::{DirCursor, DirEntry, Extent, Inode, InodeData, InodeType, Pstart};

/// 根目录 inode 号
pub const UFS_ROOT_INODE: u64 = 2;

/// 目录项头部大小（inode + reclen + type + namlen）
const DIR_ENTRY_HEADER: usize = 8;

/// UFS inode 私有数据
#[derive(Debug, Clone)]
pub struct UfsInode {
    /// 12 个直接指针和三个间接指针，已扩展为 64 位
    pub ptrs: [u64; NR_BLOCK_POINTERS],
    pub kind: UfsType,
}

impl UfsInode {
    /// 指针区的原始字节（内联符号链接存放在这里）
    fn raw_ptr_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NR_BLOCK_POINTERS * 8);
        for ptr in &self.ptrs {
            match self.kind {
                UfsType::Ufs1 => out.extend_from_slice(&(*ptr as u32).to_le_bytes()),
                UfsType::Ufs2 => out.extend_from_slice(&ptr.to_le_bytes()),
            }
        }
        out
    }
}

fn pvt(inode: &Inode) -> Result<&UfsInode> {
    match &inode.data {
        InodeData::Ufs(pvt) => Ok(pvt),
        _ => Err(Error::new(ErrorKind::InvalidInput, "inode is not a UFS inode")),
    }
}

/// 原始目录项
struct RawDirEntry<'a> {
    inode: u32,
    reclen: usize,
    file_type: u8,
    name: &'a [u8],
}

impl<'a> RawDirEntry<'a> {
    fn parse(data: &'a [u8], limit: usize) -> Option<Self> {
        if limit < DIR_ENTRY_HEADER || data.len() < DIR_ENTRY_HEADER {
            return None;
        }
        let reclen = LittleEndian::read_u16(&data[4..]) as usize;
        let namlen = data[7] as usize;
        if reclen < DIR_ENTRY_HEADER || reclen > limit || DIR_ENTRY_HEADER + namlen > reclen {
            return None;
        }
        Some(Self {
            inode: LittleEndian::read_u32(data),
            reclen,
            file_type: data[6],
            name: &data[DIR_ENTRY_HEADER..DIR_ENTRY_HEADER + namlen],
        })
    }
}

/// UFS 文件系统实例
pub struct UfsFs {
    sb: Superblock,
    block_shift: u32,
    sector_shift: u32,
    indirect: IndirectMap,
}

impl UfsFs {
    /// 挂载
    ///
    /// 以块大小初始化缓存后把块 0 固定为全零：空洞指针为 0，读到的正是零块。
    pub fn mount<D: BlockDevice>(cache: &mut BlockCache<D>) -> Result<Self> {
        let sb = Superblock::probe(cache.bdev_mut())?;
        sb.validate()?;

        let sector_shift = cache.sector_shift();
        if sb.frag_byte_shift() < sector_shift {
            return Err(Error::new(
                ErrorKind::Unsupported,
                "UFS fragment smaller than device sector",
            ));
        }
        cache.init(sb.block_shift)?;
        cache.insert_zeroed(0)?;

        debug!(
            "{:?} mounted: block size {}, fragment size {}, {} inodes/group",
            sb.kind, sb.block_size, sb.frag_size, sb.inodes_per_cg
        );

        Ok(Self {
            indirect: IndirectMap::new(
                sb.block_shift,
                sb.kind.addr_shift(),
                sb.frag_shift,
                1 << sb.frag_shift,
            ),
            block_shift: sb.block_shift,
            sector_shift,
            sb,
        })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    pub fn kind(&self) -> UfsType {
        self.sb.kind
    }

    fn block_size(&self) -> usize {
        1 << self.block_shift
    }

    /// 按 inode 号读取 inode
    pub fn iget_by_inr<D: BlockDevice>(&self, cache: &mut BlockCache<D>, inr: u64) -> Result<Inode> {
        let ipg = self.sb.inodes_per_cg as u64;
        let cg = inr / ipg;
        if cg >= self.sb.ncg as u64 {
            return Err(Error::new(ErrorKind::Corrupted, "inode group out of range"));
        }
        let table = self.sb.inode_table(cg as u32) << self.sb.frag_byte_shift();
        let isize = self.sb.kind.inode_size() as usize;
        let mut raw = [0u8; 256];
        let raw = &mut raw[..isize];
        cache.read_bytes(table + (inr % ipg) * isize as u64, raw)?;

        let mode = LittleEndian::read_u16(&raw[0..]);
        let mut ptrs = [0u64; NR_BLOCK_POINTERS];
        let (size, atime, mtime, ctime) = match self.sb.kind {
            UfsType::Ufs1 => {
                for (i, ptr) in ptrs.iter_mut().enumerate() {
                    *ptr = LittleEndian::read_u32(&raw[40 + i * 4..]) as u64;
                }
                (
                    LittleEndian::read_u64(&raw[8..]),
                    LittleEndian::read_u32(&raw[16..]) as u64,
                    LittleEndian::read_u32(&raw[24..]) as u64,
                    LittleEndian::read_u32(&raw[32..]) as u64,
                )
            }
            UfsType::Ufs2 => {
                for (i, ptr) in ptrs.iter_mut().enumerate() {
                    *ptr = LittleEndian::read_u64(&raw[112 + i * 8..]);
                }
                (
                    LittleEndian::read_u64(&raw[16..]),
                    LittleEndian::read_u64(&raw[32..]),
                    LittleEndian::read_u64(&raw[40..]),
                    LittleEndian::read_u64(&raw[48..]),
                )
            }
        };

        Ok(Inode {
            ino: inr,
            mode: InodeType::from_mode(mode as u32),
            size,
            atime,
            mtime,
            ctime,
            data: InodeData::Ufs(UfsInode {
                ptrs,
                kind: self.sb.kind,
            }),
        })
    }

    /// 逻辑块到片段地址
    pub fn bmap<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        inode: &Inode,
        block: u64,
    ) -> Result<BlockRun> {
        self.indirect.map(cache, &pvt(inode)?.ptrs, block)
    }

    /// 读取文件的第 `lblock` 块
    ///
    /// # 返回
    ///
    /// 缓存块和数据在块内的起始偏移；片段地址不一定按块对齐
    fn get_block<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        inode: &Inode,
        lblock: u64,
    ) -> Result<(Arc<[u8]>, usize)> {
        let frag = self.bmap(cache, inode, lblock)?.addr;
        let byte = frag << self.sb.frag_byte_shift();
        let data = cache.get(frag >> self.sb.frag_shift)?;
        Ok((data, (byte & (self.block_size() as u64 - 1)) as usize))
    }

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
            let (data, base) = self.get_block(cache, dir, index)?;
            let data = &data[base..];
            let max = block_size.min(dir.size - pos).min(data.len() as u64) as usize;
            let mut off = 0;
            while off + DIR_ENTRY_HEADER < max {
                let de = match RawDirEntry::parse(&data[off..], max - off) {
                    Some(de) => de,
                    None => break,
                };
                if de.inode != 0 && de.name == name {
                    return Ok(Some(de.inode));
                }
                off += de.reclen;
            }
            index += 1;
            pos += block_size;
        }
        Ok(None)
    }
}

impl FsOps for UfsFs {
    fn name(&self) -> &'static str {
        "ufs"
    }

    fn block_shift(&self) -> u32 {
        self.block_shift
    }

    fn iget_root<D: BlockDevice>(&self, cache: &mut BlockCache<D>) -> Result<Inode> {
        self.iget_by_inr(cache, UFS_ROOT_INODE)
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
            let (data, base) = self.get_block(cache, dir, cursor.offset >> self.block_shift)?;
            let off = base + (cursor.offset & mask) as usize;
            let de = RawDirEntry::parse(&data[off..], data.len() - off)
                .ok_or(Error::new(ErrorKind::Corrupted, "bad UFS directory entry"))?;

            cursor.offset += de.reclen as u64;
            if de.inode == 0 {
                continue;
            }
            return Ok(Some(DirEntry {
                ino: de.inode as u64,
                offset: cursor.offset,
                kind: InodeType::from(de.file_type & 0x0f),
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
        let fragtosec = self.sb.frag_byte_shift() - self.sector_shift;

        let run = self.bmap(cache, inode, lstart >> blktosec)?;
        let pstart = if run.addr == 0 {
            Pstart::Zero
        } else {
            Pstart::Sector((run.addr << fragtosec) + (lstart & blkmask))
        };
        Ok(Some(Extent {
            lstart,
            pstart,
            len: (run.nblocks << blktosec) - (lstart & blkmask),
        }))
    }

    /// 短链接内联在块指针区，长链接存放在第一个数据块
    fn readlink<D: BlockDevice>(&self, cache: &mut BlockCache<D>, inode: &Inode) -> Result<Vec<u8>> {
        let pvt = pvt(inode)?;
        let size = inode.size as usize;
        if size > self.block_size() {
            return Err(Error::new(ErrorKind::Corrupted, "symlink longer than a block"));
        }

        let ptr_bytes = NR_BLOCK_POINTERS << self.sb.kind.addr_shift();
        let inline_max = match self.sb.maxlen_isymlink as usize {
            0 => ptr_bytes,
            n => {
                if n > ptr_bytes {
                    warn!("UFS: inline symlink limit {} exceeds pointer area", n);
                }
                n.min(ptr_bytes)
            }
        };
        if size < inline_max {
            return Ok(pvt.raw_ptr_bytes()[..size].to_vec());
        }

        let (data, base) = self.get_block(cache, inode, 0)?;
        data.get(base..base + size)
            .map(|link| link.to_vec())
            .ok_or(Error::new(ErrorKind::Corrupted, "symlink crosses block end"))
    }
}
