//! 块分配辅助函数

use crate::{rsv::ReserveWindow, superblock::Superblock};

/// 把目标块收拢到数据区内
///
/// 越界的目标退回到 `s_first_data_block`。
pub fn clamp_goal(sb: &Superblock, goal: u64) -> u64 {
    if goal < sb.first_data_block() || goal >= sb.blocks_count() {
        sb.first_data_block()
    } else {
        goal
    }
}

/// 窗口是否与 `[group_first, group_last]` 相交
pub fn window_overlaps_group(window: &ReserveWindow, group_first: u64, group_last: u64) -> bool {
    window.start <= group_last && window.end >= group_first
}

/// 窗口是否可以服务本次目标
///
/// 对应内核的 `goal_in_my_reservation()`：窗口必须与本组相交，
/// 有目标时目标必须落在窗口内。
///
/// # 参数
///
/// * `window` - 当前窗口
/// * `grp_goal` - 组内目标偏移
/// * `group_first` / `group_last` - 本块组首尾块号
pub fn goal_in_my_reservation(
    window: &ReserveWindow,
    grp_goal: Option<u32>,
    group_first: u64,
    group_last: u64,
) -> bool {
    if !window_overlaps_group(window, group_first, group_last) {
        return false;
    }
    match grp_goal {
        Some(goal) => window.contains(group_first + goal as u64),
        None => true,
    }
}
