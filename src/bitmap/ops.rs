//! 位图基本操作
//!
//! 块位图中第 i 位（字节 i/8 的第 i%8 位，小端位序）对应组内第 i 个块，1 表示已用。

use crate::error::{Error, ErrorKind, Result};

/// 测试位图中某一位是否被设置
///
/// 超出位图长度的位视为已用（块组末尾的填充位在磁盘上总是置 1）。
pub fn test_bit(bitmap: &[u8], index: u32) -> bool {
    let byte_index = (index / 8) as usize;
    match bitmap.get(byte_index) {
        Some(byte) => byte & (1 << (index % 8)) != 0,
        None => true,
    }
}

/// 设置位图中的某一位
///
/// # 返回
///
/// 返回设置之前该位的值；索引超出范围返回错误
pub fn set_bit(bitmap: &mut [u8], index: u32) -> Result<bool> {
    let byte = bitmap
        .get_mut((index / 8) as usize)
        .ok_or(Error::new(ErrorKind::InvalidInput, "Bitmap index out of range"))?;
    let mask = 1u8 << (index % 8);
    let old = *byte & mask != 0;
    *byte |= mask;
    Ok(old)
}

/// 清除位图中的某一位
///
/// # 返回
///
/// 返回清除之前该位的值；索引超出范围返回错误
pub fn clear_bit(bitmap: &mut [u8], index: u32) -> Result<bool> {
    let byte = bitmap
        .get_mut((index / 8) as usize)
        .ok_or(Error::new(ErrorKind::InvalidInput, "Bitmap index out of range"))?;
    let mask = 1u8 << (index % 8);
    let old = *byte & mask != 0;
    *byte &= !mask;
    Ok(old)
}

/// 批量设置 `[start, start + count)`
pub fn set_bits(bitmap: &mut [u8], start: u32, count: u32) -> Result<()> {
    for i in start..start + count {
        set_bit(bitmap, i)?;
    }
    Ok(())
}

/// 查找 `[start, end)` 中第一个为 0 的位
///
/// 对应内核的 `find_next_zero_bit()`。按字节跳过全满的 0xFF。
pub fn find_next_zero_bit(bitmap: &[u8], start: u32, end: u32) -> Option<u32> {
    let end = end.min((bitmap.len() * 8) as u32);
    let mut bit = start;

    while bit < end {
        let byte = bitmap[(bit / 8) as usize];
        if bit % 8 == 0 && byte == 0xFF {
            bit += 8;
            continue;
        }
        if byte & (1 << (bit % 8)) == 0 {
            return Some(bit);
        }
        bit += 1;
    }
    None
}

/// 从 `start` 字节起查找第一个值为 0x00 的字节
///
/// 对应内核的 `memscan(p, 0, size)`：找不到时返回 `end`。
pub fn memscan_zero(bitmap: &[u8], start: usize, end: usize) -> usize {
    let end = end.min(bitmap.len());
    if start >= end {
        return end;
    }
    bitmap[start..end]
        .iter()
        .position(|b| *b == 0)
        .map_or(end, |pos| start + pos)
}

/// 统计 `[start, end)` 中为 0 的位数
pub fn count_zeros(bitmap: &[u8], start: u32, end: u32) -> u32 {
    let end = end.min((bitmap.len() * 8) as u32);
    let mut count = 0;
    let mut bit = start;

    while bit < end {
        if bit % 8 == 0 && bit + 8 <= end {
            count += bitmap[(bit / 8) as usize].count_zeros();
            bit += 8;
        } else {
            if !test_bit(bitmap, bit) {
                count += 1;
            }
            bit += 1;
        }
    }
    count
}
