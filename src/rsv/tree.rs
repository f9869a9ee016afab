//! 保留窗口树
//!
//! 对应内核 `ext2_sb_info` 中的 `s_rsv_window_root` 红黑树。
//! 这里使用 `BTreeMap<start, (end, owner)>`，需要的操作只有前驱查询、
//! 后继查询、带重叠检查的插入和删除。

use super::window::{ReserveWindow, ReserveWindowNode};
use crate::error::{Error, ErrorKind, Result};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use spin::{Mutex, MutexGuard};

/// 树中记录的窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RsvEntry {
    end: u64,
    owner: u32,
}

/// 头哨兵窗口的属主（0 不是合法 inode 号）
const HEAD_OWNER: u32 = 0;

/// 保留窗口树
///
/// 创建时插入头哨兵窗口 `[0, 0]`，保证任何目标都能找到前驱。
#[derive(Debug)]
pub struct RsvTree {
    map: BTreeMap<u64, RsvEntry>,
}

impl Default for RsvTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RsvTree {
    /// 创建只含头哨兵的树
    pub fn new() -> Self {
        let mut map = BTreeMap::new();
        map.insert(0, RsvEntry { end: 0, owner: HEAD_OWNER });
        Self { map }
    }

    /// 包含 `goal` 的窗口，否则 start 不大于 `goal` 的最后一个窗口
    ///
    /// 对应内核的 `search_reserve_window()`
    pub fn search(&self, goal: u64) -> Option<ReserveWindow> {
        self.map
            .range(..=goal)
            .next_back()
            .map(|(start, e)| ReserveWindow { start: *start, end: e.end })
    }

    /// 起始于 `start` 的窗口的后继
    pub fn next(&self, start: u64) -> Option<ReserveWindow> {
        self.map
            .range(start + 1..)
            .next()
            .map(|(start, e)| ReserveWindow { start: *start, end: e.end })
    }

    /// 起始于 `start` 的窗口
    pub fn get(&self, start: u64) -> Option<ReserveWindow> {
        self.map
            .get(&start)
            .map(|e| ReserveWindow { start, end: e.end })
    }

    /// 插入节点的窗口
    ///
    /// 对应内核的 `ext2_rsv_window_add()`。新窗口与前驱或后继重叠说明
    /// 内部状态已损坏，返回 `InvariantViolation`，树保持不变。
    pub fn insert(&mut self, node: &ReserveWindowNode) -> Result<()> {
        let w = node.window;
        if w.is_empty() || w.start > w.end {
            return Err(Error::new(
                ErrorKind::InvariantViolation,
                "Inserting malformed reservation window",
            ));
        }

        if let Some((pstart, prev)) = self.map.range(..=w.start).next_back() {
            if prev.end >= w.start {
                log::error!(
                    "[RSV] window [{}, {}] of inode {} overlaps [{}, {}] of inode {}",
                    w.start,
                    w.end,
                    node.owner(),
                    pstart,
                    prev.end,
                    prev.owner
                );
                return Err(Error::new(
                    ErrorKind::InvariantViolation,
                    "Reservation window overlaps predecessor",
                ));
            }
        }
        if let Some((nstart, next)) = self.map.range(w.start + 1..).next() {
            if *nstart <= w.end {
                log::error!(
                    "[RSV] window [{}, {}] of inode {} overlaps [{}, {}] of inode {}",
                    w.start,
                    w.end,
                    node.owner(),
                    nstart,
                    next.end,
                    next.owner
                );
                return Err(Error::new(
                    ErrorKind::InvariantViolation,
                    "Reservation window overlaps successor",
                ));
            }
        }

        self.map.insert(w.start, RsvEntry { end: w.end, owner: node.owner() });
        Ok(())
    }

    /// 从树中删除节点的窗口并把节点重置为空
    ///
    /// 对应内核的 `rsv_window_remove()`，空窗口不做任何事。
    pub fn remove(&mut self, node: &mut ReserveWindowNode) -> Result<()> {
        if node.window.is_empty() {
            return Ok(());
        }
        let start = node.window.start;
        node.window = ReserveWindow::EMPTY;

        match self.map.get(&start) {
            Some(e) if e.owner == node.owner() => {
                self.map.remove(&start);
                Ok(())
            }
            _ => {
                log::error!(
                    "[RSV] inode {} window at {} missing from tree",
                    node.owner(),
                    start
                );
                Err(Error::new(
                    ErrorKind::InvariantViolation,
                    "Reservation window not owned by inode",
                ))
            }
        }
    }

    /// 修改节点窗口的末尾（起点不变，树中位置不变）
    pub(super) fn set_end(&mut self, node: &mut ReserveWindowNode, end: u64) -> Result<()> {
        let start = node.window.start;
        match self.map.get_mut(&start) {
            Some(e) if e.owner == node.owner() => {
                e.end = end;
                node.window.end = end;
                Ok(())
            }
            _ => Err(Error::new(
                ErrorKind::InvariantViolation,
                "Reservation window not owned by inode",
            )),
        }
    }

    /// 树中的窗口数（不含头哨兵）
    pub fn len(&self) -> usize {
        self.map.len() - 1
    }

    /// 是否只有头哨兵
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按起点顺序列出所有窗口及其属主（不含头哨兵）
    pub fn windows(&self) -> Vec<(ReserveWindow, u32)> {
        self.map
            .iter()
            .filter(|(_, e)| e.owner != HEAD_OWNER)
            .map(|(start, e)| (ReserveWindow { start: *start, end: e.end }, e.owner))
            .collect()
    }

    /// 遍历并校验整棵树
    ///
    /// 对应内核 `__rsv_window_dump()`：检查 `start <= end` 以及
    /// 相邻窗口 `prev.end < next.start`，`verbose` 时逐个打印。
    pub fn dump(&self, verbose: bool) -> Result<()> {
        let mut prev: Option<(u64, RsvEntry)> = None;
        for (start, e) in self.map.iter() {
            if verbose {
                log::debug!("[RSV] window [{}, {}] owner {}", start, e.end, e.owner);
            }
            if *start > e.end && e.owner != HEAD_OWNER {
                log::error!("[RSV] window [{}, {}] has start > end", start, e.end);
                return Err(Error::new(
                    ErrorKind::InvariantViolation,
                    "Reservation window start > end",
                ));
            }
            if let Some((pstart, p)) = prev {
                if p.end >= *start {
                    log::error!(
                        "[RSV] window [{}, {}] overlaps [{}, {}]",
                        pstart,
                        p.end,
                        start,
                        e.end
                    );
                    return Err(Error::new(
                        ErrorKind::InvariantViolation,
                        "Reservation windows overlap",
                    ));
                }
            }
            prev = Some((*start, *e));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&mut self, start: u64, end: u64, owner: u32) {
        self.map.insert(start, RsvEntry { end, owner });
    }
}

/// 挂载级保留窗口根
///
/// 对应内核的 `s_rsv_window_root` + `s_rsv_window_lock`。
/// 树锁只在树结构操作期间持有，从不跨越位图扫描或 I/O。
#[derive(Debug, Default)]
pub struct ReservationRoot {
    tree: Mutex<RsvTree>,
}

impl ReservationRoot {
    /// 创建新的窗口根
    pub fn new() -> Self {
        Self { tree: Mutex::new(RsvTree::new()) }
    }

    /// 获取树锁
    pub fn lock(&self) -> MutexGuard<'_, RsvTree> {
        self.tree.lock()
    }

    /// 尝试获取树锁，被占用时立即返回 None
    pub fn try_lock(&self) -> Option<MutexGuard<'_, RsvTree>> {
        self.tree.try_lock()
    }
}
