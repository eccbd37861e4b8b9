//! OEM 代码页
//!
//! FAT 短名、VFAT 长名匹配和 NTFS 文件名比较都需要在 OEM 字节与 UTF-16
//! 之间转换。内置代码页为 CP437。

use alloc::vec::Vec;

/// CP437 中 0x80..=0xFF 对应的 Unicode 码位
const CP437_HIGH: [u16; 128] = [
    0x00C7, 0x00FC, 0x00E9, 0x00E2, 0x00E4, 0x00E0, 0x00E5, 0x00E7, // 0x80
    0x00EA, 0x00EB, 0x00E8, 0x00EF, 0x00EE, 0x00EC, 0x00C4, 0x00C5, // 0x88
    0x00C9, 0x00E6, 0x00C6, 0x00F4, 0x00F6, 0x00F2, 0x00FB, 0x00F9, // 0x90
    0x00FF, 0x00D6, 0x00DC, 0x00A2, 0x00A3, 0x00A5, 0x20A7, 0x0192, // 0x98
    0x00E1, 0x00ED, 0x00F3, 0x00FA, 0x00F1, 0x00D1, 0x00AA, 0x00BA, // 0xA0
    0x00BF, 0x2310, 0x00AC, 0x00BD, 0x00BC, 0x00A1, 0x00AB, 0x00BB, // 0xA8
    0x2591, 0x2592, 0x2593, 0x2502, 0x2524, 0x2561, 0x2562, 0x2556, // 0xB0
    0x2555, 0x2563, 0x2551, 0x2557, 0x255D, 0x255C, 0x255B, 0x2510, // 0xB8
    0x2514, 0x2534, 0x252C, 0x251C, 0x2500, 0x253C, 0x255E, 0x255F, // 0xC0
    0x255A, 0x2554, 0x2569, 0x2566, 0x2560, 0x2550, 0x256C, 0x2567, // 0xC8
    0x2568, 0x2564, 0x2565, 0x2559, 0x2558, 0x2552, 0x2553, 0x256B, // 0xD0
    0x256A, 0x2518, 0x250C, 0x2588, 0x2584, 0x258C, 0x2590, 0x2580, // 0xD8
    0x03B1, 0x00DF, 0x0393, 0x03C0, 0x03A3, 0x03C3, 0x00B5, 0x03C4, // 0xE0
    0x03A6, 0x0398, 0x03A9, 0x03B4, 0x221E, 0x03C6, 0x03B5, 0x2229, // 0xE8
    0x2261, 0x00B1, 0x2265, 0x2264, 0x2320, 0x2321, 0x00F7, 0x2248, // 0xF0
    0x00B0, 0x2219, 0x00B7, 0x221A, 0x207F, 0x00B2, 0x25A0, 0x00A0, // 0xF8
];

/// CP437 中的大小写字母对（大写, 小写）
const CP437_CASE_PAIRS: [(u8, u8); 10] = [
    (0x80, 0x87), // Ç ç
    (0x9A, 0x81), // Ü ü
    (0x90, 0x82), // É é
    (0x8E, 0x84), // Ä ä
    (0x8F, 0x86), // Å å
    (0x92, 0x91), // Æ æ
    (0x99, 0x94), // Ö ö
    (0xA5, 0xA4), // Ñ ñ
    (0xE4, 0xE5), // Σ σ
    (0xE8, 0xED), // Φ φ
];

/// 代码页转换表
pub struct Codepage {
    upper: [u8; 256],
    lower: [u8; 256],
    /// `uni[0][c]` 为 c 的大写形式的码位，`uni[1][c]` 为小写形式的码位
    uni: [[u16; 256]; 2],
}

static CP437: Codepage = Codepage::build(&CP437_HIGH, &CP437_CASE_PAIRS);

impl Codepage {
    const fn build(high: &[u16; 128], pairs: &[(u8, u8)]) -> Self {
        let mut unicode = [0u16; 256];
        let mut upper = [0u8; 256];
        let mut lower = [0u8; 256];

        let mut c = 0;
        while c < 256 {
            unicode[c] = if c < 0x80 { c as u16 } else { high[c - 0x80] };
            upper[c] = c as u8;
            lower[c] = c as u8;
            if c >= b'a' as usize && c <= b'z' as usize {
                upper[c] = (c - 0x20) as u8;
            }
            if c >= b'A' as usize && c <= b'Z' as usize {
                lower[c] = (c + 0x20) as u8;
            }
            c += 1;
        }

        let mut i = 0;
        while i < pairs.len() {
            let (u, l) = pairs[i];
            upper[l as usize] = u;
            lower[u as usize] = l;
            i += 1;
        }

        let mut uni = [[0u16; 256]; 2];
        let mut c = 0;
        while c < 256 {
            uni[0][c] = unicode[upper[c] as usize];
            uni[1][c] = unicode[lower[c] as usize];
            c += 1;
        }

        Self { upper, lower, uni }
    }

    /// 内置 CP437 代码页
    pub fn cp437() -> &'static Codepage {
        &CP437
    }

    pub fn to_upper(&self, c: u8) -> u8 {
        self.upper[c as usize]
    }

    pub fn to_lower(&self, c: u8) -> u8 {
        self.lower[c as usize]
    }

    /// 字节 c 本身对应的码位
    pub fn to_unicode(&self, c: u8) -> u16 {
        if self.upper[c as usize] == c {
            self.uni[0][c as usize]
        } else {
            self.uni[1][c as usize]
        }
    }

    /// 码位 `u` 是否等于字节 `c` 的大写或小写形式
    pub fn matches(&self, c: u8, u: u16) -> bool {
        self.uni[0][c as usize] == u || self.uni[1][c as usize] == u
    }

    /// 将码位转换为代码页字节；不在代码页中时返回 `None`
    pub fn from_unicode(&self, u: u16) -> Option<u8> {
        if u < 0x80 {
            return Some(u as u8);
        }
        (0x80..=0xFFu8).find(|&c| self.to_unicode(c) == u)
    }

    /// 把路径分量转换为代码页字节
    ///
    /// 合法的 UTF-8 按字符转换，含有代码页以外的字符时返回 `None`；
    /// 其他字节序列原样视为代码页字节。
    pub fn encode_name(&self, name: &[u8]) -> Option<Vec<u8>> {
        match core::str::from_utf8(name) {
            Ok(s) => s
                .chars()
                .map(|ch| u16::try_from(ch as u32).ok().and_then(|u| self.from_unicode(u)))
                .collect(),
            Err(_) => Some(name.to_vec()),
        }
    }
}
