//! 位图扫描器
//!
//! 在组内偏移空间中查找空闲位，不加任何锁：调用者看到的只是一个快照，
//! 真正占用某一位必须经过 [`super::BitmapBuffer::set_bit_atomic`]。

use super::ops::{find_next_zero_bit, memscan_zero};
use crate::consts::EXT2_NEAR_GOAL_ALIGN;

/// 在 `[start, maxblocks)` 中查找第一个空闲位（穷举扫描）
///
/// 对应内核的 `bitmap_search_next_usable_block()`
pub fn bitmap_search_next_usable_block(start: u32, bitmap: &[u8], maxblocks: u32) -> Option<u32> {
    find_next_zero_bit(bitmap, start, maxblocks)
}

/// 在 `[start, maxblocks)` 中查找一个可用的空闲位
///
/// 对应内核的 `find_next_usable_block()`，分三步：
///
/// 1. `start > 0` 时，先逐位扫描到下一个 64 位边界，贴近目标分配
/// 2. 从 `start` 所在字节起查找整字节空闲的位置，优先返回一段空闲区的起点
/// 3. 找不到整字节空闲时退回穷举扫描
///
/// # 返回
///
/// 找到返回组内偏移，`[start, maxblocks)` 内没有空闲位返回 None
pub fn find_next_usable_block(start: u32, bitmap: &[u8], maxblocks: u32) -> Option<u32> {
    if start >= maxblocks {
        return None;
    }

    if start > 0 {
        let align = EXT2_NEAR_GOAL_ALIGN;
        let end_goal = ((start + align - 1) & !(align - 1)).min(maxblocks);
        if let Some(here) = find_next_zero_bit(bitmap, start, end_goal) {
            log::trace!("[BALLOC] near-goal hit at {}", here);
            return Some(here);
        }
    }

    let first_byte = (start >> 3) as usize;
    let last_byte = maxblocks.div_ceil(8) as usize;
    let next = (memscan_zero(bitmap, first_byte, last_byte) as u32) << 3;
    if next < maxblocks && next >= start {
        return Some(next);
    }

    bitmap_search_next_usable_block(start, bitmap, maxblocks)
}
