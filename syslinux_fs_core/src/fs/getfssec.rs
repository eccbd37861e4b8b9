//! 通用的按扇区读文件实现

use log::trace;

use super::{FsOps, OpenFile};
use crate::block::BlockDevice;
use crate::cache::BlockCache;
use crate::error::{Error, ErrorKind, Result};
use crate::types::{Extent, Pstart};

/// 读取文件的若干扇区
///
/// 请求会被截断到文件剩余的扇区数。物理上相邻的 extent 合并成一次设备读，
/// 空洞 extent 直接填零。文件最后一个扇区中超出文件长度的字节不计入返回值。
///
/// # 参数
///
/// * `fs` - 提供 `next_extent` 的驱动
/// * `cache` - 块缓存（扇区读取直接走设备）
/// * `file` - 打开的文件
/// * `buf` - 目标缓冲区
/// * `sectors` - 请求的扇区数
///
/// # 返回
///
/// `(读取的字节数, 是否还有剩余数据)`
pub fn generic_getfssec<F, D>(
    fs: &F,
    cache: &mut BlockCache<D>,
    file: &mut OpenFile,
    buf: &mut [u8],
    sectors: u32,
) -> Result<(usize, bool)>
where
    F: FsOps + ?Sized,
    D: BlockDevice,
{
    let shift = cache.sector_shift();
    let sector_mask = (1u64 << shift) - 1;
    let size = file.inode.size;

    if file.offset & sector_mask != 0 {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "file offset not sector aligned",
        ));
    }
    if file.offset >= size {
        return Ok((0, false));
    }

    let bytes_left = size - file.offset;
    let sectors_left = bytes_left.div_ceil(1 << shift);
    let mut sectors = (sectors as u64).min(sectors_left);
    let need = (sectors << shift) as usize;
    if buf.len() < need {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "buffer too small for requested sectors",
        ));
    }

    let lsector = file.offset >> shift;
    if !file.this_extent.contains(lsector) {
        file.this_extent = file.next_extent;
    }
    if file.this_extent.contains(lsector) {
        let delta = lsector - file.this_extent.lstart;
        let ext = &mut file.this_extent;
        ext.lstart = lsector;
        ext.len -= delta;
        ext.pstart = ext.pstart.advance(delta);
    } else {
        file.this_extent = Extent {
            lstart: lsector,
            pstart: Pstart::Zero,
            len: 0,
        };
    }

    let mut done = 0usize;
    while sectors > 0 {
        while sectors > file.this_extent.len {
            let want = file.this_extent.lstart + file.this_extent.len;
            if file.next_extent.len == 0 || file.next_extent.lstart != want {
                file.next_extent = match fs.next_extent(cache, &mut file.inode, want)? {
                    Some(ext) if ext.len > 0 => Extent { lstart: want, ..ext },
                    _ => Extent {
                        lstart: want,
                        ..Extent::EMPTY
                    },
                };
            }

            if file.this_extent.len == 0 {
                if file.next_extent.len == 0 {
                    return Err(Error::new(
                        ErrorKind::Corrupted,
                        "file sector has no mapping",
                    ));
                }
                file.this_extent = file.next_extent;
            } else if file.next_extent.len != 0
                && file.next_extent.pstart == file.this_extent.pstart.advance(file.this_extent.len)
            {
                file.this_extent.len += file.next_extent.len;
            } else {
                break;
            }
        }

        let chunk = sectors.min(file.this_extent.len);
        let len = (chunk << shift) as usize;
        let out = &mut buf[done..done + len];
        match file.this_extent.pstart {
            Pstart::Zero => out.fill(0),
            Pstart::Sector(start) => {
                trace!("getfssec: {} sectors at {}", chunk, start);
                cache.bdev_mut().read_sectors(start, chunk as u32, out)?;
            }
        }

        let ext = &mut file.this_extent;
        ext.pstart = ext.pstart.advance(chunk);
        ext.lstart += chunk;
        ext.len -= chunk;
        sectors -= chunk;
        done += len;
    }

    let bytes_read = (done as u64).min(bytes_left);
    file.offset += bytes_read;
    Ok((bytes_read as usize, bytes_read < bytes_left))
}

/// 从内存中的文件内容读取若干扇区
///
/// 用于数据直接存放在元数据中的文件（NTFS 常驻数据、btrfs 内联 extent）。
/// 最后一个扇区中文件末尾之后的部分填零。`offset` 是文件的读取位置。
pub fn resident_getfssec(
    data: &[u8],
    sector_shift: u32,
    offset: &mut u64,
    buf: &mut [u8],
    sectors: u32,
) -> Result<(usize, bool)> {
    if *offset & ((1 << sector_shift) - 1) != 0 {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "file offset not sector aligned",
        ));
    }
    let size = data.len() as u64;
    if *offset >= size {
        return Ok((0, false));
    }
    let n = (((sectors as u64) << sector_shift).min(size - *offset)) as usize;
    let padded = (n as u64).next_multiple_of(1 << sector_shift) as usize;
    if buf.len() < padded {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "buffer too small for requested sectors",
        ));
    }
    let start = *offset as usize;
    buf[..n].copy_from_slice(&data[start..start + n]);
    buf[n..padded].fill(0);
    *offset += n as u64;
    Ok((n, *offset < size))
}
