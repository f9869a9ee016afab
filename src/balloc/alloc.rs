//! 单个块组内的分配
//!
//! - [`try_to_allocate`]：在位图上从目标位置（或窗口内）占用一段连续空闲位
//! - [`Ext2Fs::try_to_allocate_with_rsv`]：在 inode 的保留窗口内分配，
//!   必要时申请新窗口或延长旧窗口

use super::helpers::{goal_in_my_reservation, window_overlaps_group};
use crate::{
    bitmap::{find_next_usable_block, ops::test_bit, BitmapBuffer},
    block::BlockDevice,
    consts::EXT2_BACKUP_BITS,
    error::{Error, ErrorKind, Result},
    fs::Ext2Fs,
    rsv::{alloc_new_reservation, try_to_extend_reservation, ReserveWindow, ReserveWindowNode},
};

/// 在块组位图中占用最多 `count` 个连续空闲位
///
/// 对应内核的 `ext2_try_to_allocate()`
///
/// 1. 有窗口时搜索范围收窄到窗口与本组的交集，落在范围外的目标被忽略
/// 2. 没有目标时找下一个可用位；不在窗口内分配时，最多向前回退 7 个
///    空闲位，让新分配与前面的空闲区连成一片
/// 3. 逐位原子地占用：第一位被抢先时继续向后找，占到至少一位后遇到
///    已用位即停止
///
/// # 参数
///
/// * `bitmap` - 本块组位图
/// * `group_first` / `group_last` - 本块组首尾块号
/// * `grp_goal` - 组内目标偏移
/// * `count` - 输入请求的块数，成功时输出实际占用的块数
/// * `window` - 限定分配范围的保留窗口
///
/// # 返回
///
/// 成功返回第一个占用位的组内偏移，无可用位返回 `None`
pub fn try_to_allocate(
    bitmap: &BitmapBuffer,
    group_first: u64,
    group_last: u64,
    grp_goal: Option<u32>,
    count: &mut u32,
    window: Option<&ReserveWindow>,
) -> Option<u32> {
    let group_size = (group_last - group_first + 1) as u32;
    let mut goal = grp_goal;

    let (start, end) = match window {
        Some(w) => {
            let start = if w.start >= group_first {
                (w.start - group_first) as u32
            } else {
                0
            };
            let end = if w.end < group_last {
                (w.end - group_first + 1) as u32
            } else {
                group_size
            };
            if !matches!(goal, Some(g) if g >= start && g < end) {
                goal = None;
            }
            (start, end)
        }
        None => (goal.unwrap_or(0), group_size),
    };

    let mut cur = match goal {
        Some(g) => g,
        None => bitmap.with_bits(|bits| {
            let mut g = find_next_usable_block(start, bits, end)?;
            if window.is_none() {
                for _ in 0..EXT2_BACKUP_BITS {
                    if g <= start || test_bit(bits, g - 1) {
                        break;
                    }
                    g -= 1;
                }
            }
            Some(g)
        })?,
    };

    let mut num = 0u32;
    while num < *count && cur < end {
        if bitmap.set_bit_atomic(cur) {
            if num > 0 {
                break;
            }
        } else {
            num += 1;
        }
        cur += 1;
    }

    if num == 0 {
        return None;
    }
    *count = num;
    Some(cur - num)
}

impl<D: BlockDevice> Ext2Fs<D> {
    /// 在 inode 的保留窗口内分配
    ///
    /// 对应内核的 `ext2_try_to_allocate_with_rsv()`。没有窗口节点时直接在
    /// 整个块组内分配。否则循环：
    ///
    /// - 窗口为空、上一轮失败、或目标不在窗口内：把期望宽度提高到至少
    ///   `count`，申请新窗口（失败即本组失败）；新窗口不含目标时放弃目标
    /// - 目标在窗口内但窗口剩余部分不足 `count`：尽力延长窗口
    /// - 在窗口内调用 [`try_to_allocate`]，成功时累加命中数
    ///
    /// # 返回
    ///
    /// 成功返回组内偏移并把 `count` 改为实际块数；本组无法满足返回
    /// `Ok(None)`；窗口树损坏返回 `InvariantViolation`
    pub(crate) fn try_to_allocate_with_rsv(
        &self,
        group: u32,
        bitmap: &BitmapBuffer,
        grp_goal: Option<u32>,
        my_rsv: Option<&mut ReserveWindowNode>,
        count: &mut u32,
    ) -> Result<Option<u32>> {
        let first = self.sb.group_first_block(group);
        let last = self.sb.group_last_block(group);

        let Some(node) = my_rsv else {
            return Ok(try_to_allocate(bitmap, first, last, grp_goal, count, None));
        };

        let mut goal = grp_goal;
        let mut num = *count;
        let mut failed = false;

        loop {
            let w = node.window();
            if w.is_empty() || failed || !goal_in_my_reservation(&w, goal, first, last) {
                if node.goal_size < *count {
                    node.goal_size = *count;
                }
                match alloc_new_reservation(&self.rsv_root, node, goal, first, last, bitmap) {
                    Ok(true) => {}
                    Ok(false) => return Ok(None),
                    Err(e) => {
                        self.ext2_error(
                            "alloc_new_reservation",
                            format_args!("reservation tree corrupted in group {}: {}", group, e),
                        );
                        return Err(e);
                    }
                }
                if !goal_in_my_reservation(&node.window(), goal, first, last) {
                    goal = None;
                }
            } else if let Some(g) = goal {
                let curr = w.end + 1 - (first + g as u64);
                if curr < *count as u64 {
                    try_to_extend_reservation(&self.rsv_root, node, *count as u64 - curr);
                }
            }

            let w = node.window();
            if !window_overlaps_group(&w, first, last) {
                self.ext2_error(
                    "ext2_try_to_allocate_with_rsv",
                    format_args!(
                        "window [{}, {}] of inode {} outside group {}",
                        w.start,
                        w.end,
                        node.owner(),
                        group
                    ),
                );
                if let Err(e) = self.rsv_root.lock().dump(true) {
                    log::error!("[RSV] {}", e);
                }
                return Err(Error::new(
                    ErrorKind::InvariantViolation,
                    "Reservation window outside its block group",
                ));
            }

            if let Some(start) = try_to_allocate(bitmap, first, last, goal, &mut num, Some(&w)) {
                node.alloc_hit += num;
                *count = num;
                return Ok(Some(start));
            }
            failed = true;
            num = *count;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BufferHead;
    use crate::fs::FsConfig;
    use crate::test_utils::mount_small;
    use alloc::sync::Arc;

    const FIRST: u64 = 8193;
    const LAST: u64 = 16384;

    fn free_bitmap() -> BitmapBuffer {
        BitmapBuffer::new(1, Arc::new(BufferHead::new(8194, 1024)))
    }

    fn used_prefix(bitmap: &BitmapBuffer, bits: u32) {
        for bit in 0..bits {
            bitmap.set_bit_atomic(bit);
        }
    }

    #[test]
    fn test_allocate_at_goal_in_free_group() {
        let bitmap = free_bitmap();
        let mut count = 1;
        assert_eq!(try_to_allocate(&bitmap, FIRST, LAST, Some(5), &mut count, None), Some(5));
        assert_eq!(count, 1);
        assert!(bitmap.test_bit(5));
        assert_eq!(bitmap.count_free(8192), 8191);
    }

    #[test]
    fn test_run_stops_at_first_used_bit() {
        let bitmap = free_bitmap();
        bitmap.set_bit_atomic(10);
        bitmap.set_bit_atomic(11);
        bitmap.set_bit_atomic(15);

        // 目标位已用：跳过已用位后占用 12..15
        let mut count = 8;
        assert_eq!(try_to_allocate(&bitmap, FIRST, LAST, Some(10), &mut count, None), Some(12));
        assert_eq!(count, 3);
        assert!(!bitmap.test_bit(16));
    }

    #[test]
    fn test_backs_up_at_most_seven_bits() {
        let bitmap = free_bitmap();
        // 位 16 已用，17..23 空闲，第一个全空字节从 24 开始
        used_prefix(&bitmap, 17);

        let mut count = 4;
        assert_eq!(try_to_allocate(&bitmap, FIRST, LAST, None, &mut count, None), Some(17));
        assert_eq!(count, 4);
        assert!(bitmap.test_bit(20));
        assert!(!bitmap.test_bit(21));
    }

    #[test]
    fn test_backup_stops_at_used_bit() {
        let bitmap = free_bitmap();
        used_prefix(&bitmap, 37);

        let mut count = 1;
        assert_eq!(try_to_allocate(&bitmap, FIRST, LAST, None, &mut count, None), Some(37));
    }

    #[test]
    fn test_window_limits_range() {
        let bitmap = free_bitmap();
        let w = ReserveWindow { start: FIRST + 100, end: FIRST + 163 };

        // 目标在窗口外被忽略，从窗口起点分配，不回退
        let mut count = 100;
        assert_eq!(
            try_to_allocate(&bitmap, FIRST, LAST, Some(20), &mut count, Some(&w)),
            Some(100)
        );
        assert_eq!(count, 64);
        assert!(!bitmap.test_bit(99));
        assert!(!bitmap.test_bit(164));
    }

    #[test]
    fn test_window_fully_used_fails() {
        let bitmap = free_bitmap();
        let w = ReserveWindow { start: FIRST + 8, end: FIRST + 15 };
        for bit in 8..16 {
            bitmap.set_bit_atomic(bit);
        }
        let mut count = 2;
        assert_eq!(try_to_allocate(&bitmap, FIRST, LAST, None, &mut count, Some(&w)), None);
        assert_eq!(count, 2);
    }

    #[test]
    fn test_window_straddling_group_start() {
        let bitmap = free_bitmap();
        let w = ReserveWindow { start: FIRST - 4, end: FIRST + 3 };
        let mut count = 8;
        assert_eq!(try_to_allocate(&bitmap, FIRST, LAST, None, &mut count, Some(&w)), Some(0));
        assert_eq!(count, 4);
    }

    #[test]
    fn test_with_rsv_acquires_window_at_goal() {
        let fs = mount_small(FsConfig::default());
        let bitmap = fs.read_block_bitmap(1).unwrap();
        let first = fs.superblock().group_first_block(1);
        let mut node = ReserveWindowNode::new(12, 8);

        let mut count = 3;
        let got = fs
            .try_to_allocate_with_rsv(1, &bitmap, Some(100), Some(&mut node), &mut count)
            .unwrap();
        assert_eq!(got, Some(100));
        assert_eq!(count, 3);
        assert_eq!(node.window(), ReserveWindow { start: first + 100, end: first + 107 });
        assert_eq!(node.alloc_hit, 3);
        assert_eq!(fs.reservation_root().lock().len(), 1);
    }

    #[test]
    fn test_with_rsv_extends_short_window() {
        let fs = mount_small(FsConfig::default());
        let bitmap = fs.read_block_bitmap(1).unwrap();
        let first = fs.superblock().group_first_block(1);
        let mut node = ReserveWindowNode::new(12, 8);

        let mut count = 1;
        fs.try_to_allocate_with_rsv(1, &bitmap, Some(100), Some(&mut node), &mut count)
            .unwrap();

        // 窗口 [100, 107] 在目标 106 处只剩 2 块，延长 3 块后满足 5 块
        let mut count = 5;
        let got = fs
            .try_to_allocate_with_rsv(1, &bitmap, Some(106), Some(&mut node), &mut count)
            .unwrap();
        assert_eq!(got, Some(106));
        assert_eq!(count, 5);
        assert_eq!(node.window().end, first + 110);
        assert_eq!(node.alloc_hit, 6);
    }

    #[test]
    fn test_with_rsv_moves_past_stolen_window() {
        let fs = mount_small(FsConfig::default());
        let bitmap = fs.read_block_bitmap(1).unwrap();
        let first = fs.superblock().group_first_block(1);
        let mut node = ReserveWindowNode::new(12, 8);

        let mut count = 1;
        fs.try_to_allocate_with_rsv(1, &bitmap, Some(100), Some(&mut node), &mut count)
            .unwrap();
        // 不经过窗口的分配者占满了窗口剩余的位
        for bit in 101..108 {
            bitmap.set_bit_atomic(bit);
        }

        let mut count = 1;
        let got = fs
            .try_to_allocate_with_rsv(1, &bitmap, Some(101), Some(&mut node), &mut count)
            .unwrap();
        assert_eq!(got, Some(108));
        assert_eq!(node.window(), ReserveWindow { start: first + 108, end: first + 115 });
        assert_eq!(fs.reservation_root().lock().len(), 1);
    }

    #[test]
    fn test_with_rsv_raises_goal_size_to_request() {
        let fs = mount_small(FsConfig::default());
        let bitmap = fs.read_block_bitmap(2).unwrap();
        let mut node = ReserveWindowNode::new(12, 8);

        let mut count = 20;
        let got = fs
            .try_to_allocate_with_rsv(2, &bitmap, Some(300), Some(&mut node), &mut count)
            .unwrap();
        assert_eq!(got, Some(300));
        assert_eq!(count, 20);
        assert_eq!(node.goal_size, 20);
        assert_eq!(node.window().len(), 20);
    }

    #[test]
    fn test_without_node_ignores_tree() {
        let fs = mount_small(FsConfig::default());
        let bitmap = fs.read_block_bitmap(1).unwrap();
        let mut count = 2;
        let got = fs
            .try_to_allocate_with_rsv(1, &bitmap, Some(200), None, &mut count)
            .unwrap();
        assert_eq!(got, Some(200));
        assert!(fs.reservation_root().lock().is_empty());
    }
}
