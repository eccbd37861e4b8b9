//! 块设备实现：内存镜像和（启用 `std` 时）文件镜像。

use alloc::vec::Vec;

use crate::{BlockDevice, Error, ErrorKind, Result};

/// 默认扇区大小
pub const DEV_BSIZE: u32 = 512;

/// 内存中的磁盘镜像
///
/// 镜像长度不是扇区大小的整数倍时，末尾不足一个扇区的部分不可读。
#[derive(Debug, Clone)]
pub struct RamDisk {
    data: Vec<u8>,
    sector_size: u32,
}

impl RamDisk {
    /// 以 512 字节扇区创建
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            sector_size: DEV_BSIZE,
        }
    }

    /// 指定扇区大小创建
    ///
    /// # 参数
    ///
    /// * `data` - 镜像内容
    /// * `sector_size` - 扇区大小，必须是不小于 512 的 2 的幂
    pub fn with_sector_size(data: Vec<u8>, sector_size: u32) -> Result<Self> {
        if sector_size < DEV_BSIZE || !sector_size.is_power_of_two() {
            return Err(Error::new(ErrorKind::InvalidInput, "bad sector size"));
        }
        Ok(Self { data, sector_size })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl BlockDevice for RamDisk {
    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn total_sectors(&self) -> u64 {
        self.data.len() as u64 / self.sector_size as u64
    }

    fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
        let ss = self.sector_size as u64;
        let len = count as u64 * ss;
        if lba + count as u64 > self.total_sectors() {
            return Err(Error::new(ErrorKind::Io, "read beyond end of ram disk"));
        }
        if (buf.len() as u64) < len {
            return Err(Error::new(ErrorKind::InvalidInput, "buffer too small"));
        }
        let start = (lba * ss) as usize;
        buf[..len as usize].copy_from_slice(&self.data[start..start + len as usize]);
        Ok(len as usize)
    }
}

#[cfg(feature = "std")]
pub use file_device::FileDevice;

#[cfg(feature = "std")]
mod file_device {
    use std::fs::File;
    use std::io::{Read, Seek, SeekFrom};
    use std::path::Path;

    use super::DEV_BSIZE;
    use crate::{BlockDevice, Error, ErrorKind, Result};

    /// 以只读方式打开的镜像文件或块设备
    pub struct FileDevice {
        file: File,
        sectors: u64,
    }

    impl FileDevice {
        pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
            let file = File::options().read(true).open(path)?;
            let sectors = file.metadata()?.len() / DEV_BSIZE as u64;
            Ok(Self { file, sectors })
        }
    }

    impl BlockDevice for FileDevice {
        fn total_sectors(&self) -> u64 {
            self.sectors
        }

        fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
            let len = count as usize * DEV_BSIZE as usize;
            if buf.len() < len {
                return Err(Error::new(ErrorKind::InvalidInput, "buffer too small"));
            }
            self.file.seek(SeekFrom::Start(lba * DEV_BSIZE as u64))?;
            self.file.read_exact(&mut buf[..len])?;
            Ok(len)
        }
    }
}
