//! 路径规范化

use alloc::string::String;

fn not_whitespace(c: char) -> bool {
    c > ' '
}

/// 去掉末尾的 `/`，但保留单独的根路径 `/`
fn strip_trailing_slashes(dst: &mut String) {
    while dst.len() > 1 && dst.ends_with('/') {
        dst.pop();
    }
}

/// 通用路径规范化
///
/// 在第一个空白或控制字符处截断，合并连续的 `/`，去掉末尾的 `/`。
pub fn generic_mangle_name(src: &str) -> String {
    let mut dst = String::with_capacity(src.len());
    let mut chars = src.chars().take_while(|&c| not_whitespace(c)).peekable();

    while let Some(c) = chars.next() {
        if c == '/' && chars.peek() == Some(&'/') {
            continue;
        }
        dst.push(c);
    }

    strip_trailing_slashes(&mut dst);
    dst
}

/// VFAT 路径规范化
///
/// 在通用规则之外把 `\` 视为 `/`，并去掉末尾的 `.`。
/// 以 `..` 结尾的分量保持不变。
pub fn vfat_mangle_name(src: &str) -> String {
    let mut dst = String::with_capacity(src.len());
    let mut chars = src
        .chars()
        .take_while(|&c| not_whitespace(c))
        .map(|c| if c == '\\' { '/' } else { c })
        .peekable();

    while let Some(c) = chars.next() {
        if c == '/' && chars.peek() == Some(&'/') {
            continue;
        }
        dst.push(c);
    }

    loop {
        if dst.is_empty() || dst == "/" {
            break;
        }
        if dst == ".." || dst.ends_with("/..") {
            break;
        }
        if !dst.ends_with('/') && !dst.ends_with('.') {
            break;
        }
        dst.pop();
    }
    dst
}
