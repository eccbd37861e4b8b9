//! 数据运行（mapping pairs）解码

use alloc::vec::Vec;

use crate::block::BlockDevice;
use crate::cache::BlockCache;
use crate::error::{Error, ErrorKind, Result};

/// 一段连续的簇
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    /// 起始虚拟簇号
    pub vcn: u64,
    /// 起始逻辑簇号；稀疏段为 `None`
    pub lcn: Option<u64>,
    /// 簇数
    pub len: u64,
}

impl Run {
    pub fn end(&self) -> u64 {
        self.vcn + self.len
    }

    pub fn contains(&self, vcn: u64) -> bool {
        vcn >= self.vcn && vcn < self.end()
    }
}

/// 读取 `bytes` 个字节组成的小端整数，`signed` 时按最高位符号扩展
fn read_var(bytes: &[u8], signed: bool) -> i64 {
    let mut value: i64 = match bytes.last() {
        Some(&b) if signed && b & 0x80 != 0 => -1,
        _ => 0,
    };
    for &b in bytes.iter().rev() {
        value = (value << 8) | b as i64;
    }
    value
}

/// 解析属性中的 mapping pairs
///
/// 每一对以计数字节开头：低 4 位是长度字段的字节数，高 4 位是 LCN 增量的
/// 字节数。LCN 增量带符号并在各段之间累加；增量字节数为 0 的段是稀疏段。
/// 遇到 0 字节或数据结束时停止。
///
/// # 参数
///
/// * `stream` - 从 mapping pairs 偏移开始、到属性记录结尾为止的字节
/// * `start_vcn` - 第一段的虚拟簇号（属性记录的 `lowest_vcn`）
pub fn parse_runs(stream: &[u8], start_vcn: u64) -> Result<Vec<Run>> {
    let mut runs = Vec::new();
    let mut pos = 0;
    let mut vcn = start_vcn;
    let mut lcn: i64 = 0;

    while let Some(&header) = stream.get(pos) {
        if header == 0 {
            break;
        }
        let v = (header & 0x0f) as usize;
        let l = (header >> 4) as usize;
        if v == 0 || v > 8 || l > 8 || pos + 1 + v + l > stream.len() {
            return Err(Error::new(ErrorKind::Corrupted, "bad NTFS data run header"));
        }

        let len = read_var(&stream[pos + 1..pos + 1 + v], false) as u64;
        let run_lcn = if l == 0 {
            None
        } else {
            lcn = lcn
                .checked_add(read_var(&stream[pos + 1 + v..pos + 1 + v + l], true))
                .ok_or(Error::new(ErrorKind::Corrupted, "NTFS cluster number overflow"))?;
            if lcn < 0 {
                return Err(Error::new(ErrorKind::Corrupted, "negative NTFS cluster number"));
            }
            Some(lcn as u64)
        };

        runs.push(Run { vcn, lcn: run_lcn, len });
        vcn = vcn
            .checked_add(len)
            .ok_or(Error::new(ErrorKind::Corrupted, "NTFS run length overflow"))?;
        pos += 1 + v + l;
    }
    Ok(runs)
}

/// 查找包含 `vcn` 的段
pub fn find_run(runs: &[Run], vcn: u64) -> Option<&Run> {
    runs.iter().find(|run| run.contains(vcn))
}

/// 按虚拟字节偏移读取非常驻数据
///
/// 稀疏段读出全零；落在所有段之外的位置视为损坏。
pub fn read_runs<D: BlockDevice>(
    cache: &mut BlockCache<D>,
    runs: &[Run],
    clust_byte_shift: u32,
    offset: u64,
    buf: &mut [u8],
) -> Result<()> {
    let mask = (1u64 << clust_byte_shift) - 1;
    let mut done = 0;
    while done < buf.len() {
        let pos = offset + done as u64;
        let vcn = pos >> clust_byte_shift;
        let run = find_run(runs, vcn)
            .ok_or(Error::new(ErrorKind::Corrupted, "NTFS attribute offset not mapped"))?;

        let avail = (run.end() - vcn).saturating_mul(mask + 1) - (pos & mask);
        let n = (avail.min((buf.len() - done) as u64)) as usize;
        let out = &mut buf[done..done + n];
        match run.lcn {
            Some(lcn) => {
                let byte = lcn
                    .checked_add(vcn - run.vcn)
                    .and_then(|c| c.checked_mul(mask + 1))
                    .ok_or(Error::new(ErrorKind::Corrupted, "NTFS cluster number overflow"))?
                    + (pos & mask);
                cache.read_bytes(byte, out)?;
            }
            None => out.fill(0),
        }
        done += n;
    }
    Ok(())
}
