//! 保留窗口结构

use crate::consts::{EXT2_MAX_RESERVE_BLOCKS, EXT2_RESERVE_WINDOW_NOT_ALLOCATED};

/// 保留窗口 `[start, end]`（闭区间，文件系统全局块号）
///
/// 对应内核的 `struct ext2_reserve_window`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReserveWindow {
    /// 第一个块
    pub start: u64,
    /// 最后一个块
    pub end: u64,
}

impl ReserveWindow {
    /// 未分配的窗口
    pub const EMPTY: Self = Self {
        start: EXT2_RESERVE_WINDOW_NOT_ALLOCATED,
        end: EXT2_RESERVE_WINDOW_NOT_ALLOCATED,
    };

    /// 是否未分配
    ///
    /// 对应内核的 `rsv_is_empty()`
    pub fn is_empty(&self) -> bool {
        self.end == EXT2_RESERVE_WINDOW_NOT_ALLOCATED
    }

    /// 窗口宽度（块数）
    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.end - self.start + 1
        }
    }

    /// 块是否在窗口内
    pub fn contains(&self, block: u64) -> bool {
        !self.is_empty() && block >= self.start && block <= self.end
    }
}

impl Default for ReserveWindow {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// inode 持有的窗口节点
///
/// 对应内核的 `struct ext2_reserve_window_node`。节点归 inode 所有，
/// 窗口树只记录它的边界和属主；边界只能在持有树锁时修改。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveWindowNode {
    pub(super) window: ReserveWindow,
    /// 期望的窗口宽度
    pub goal_size: u32,
    /// 本窗口内已分配的块数
    pub alloc_hit: u32,
    owner: u32,
}

impl ReserveWindowNode {
    /// 为 inode 创建空节点
    pub fn new(owner: u32, goal_size: u32) -> Self {
        Self {
            window: ReserveWindow::EMPTY,
            goal_size: goal_size.min(EXT2_MAX_RESERVE_BLOCKS),
            alloc_hit: 0,
            owner,
        }
    }

    /// 当前窗口
    pub fn window(&self) -> ReserveWindow {
        self.window
    }

    /// 属主 inode 号
    pub fn owner(&self) -> u32 {
        self.owner
    }

    /// 是否没有窗口
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// 命中率超过一半时窗口宽度翻倍，不超过上限
    pub(super) fn grow_if_hot(&mut self) {
        if self.alloc_hit as u64 > self.window.len() / 2 {
            let size = (self.goal_size.saturating_mul(2)).min(EXT2_MAX_RESERVE_BLOCKS);
            log::debug!(
                "[RSV] inode {} hit {}/{}, goal size {} -> {}",
                self.owner,
                self.alloc_hit,
                self.window.len(),
                self.goal_size,
                size
            );
            self.goal_size = size;
        }
    }
}
