//! 保留窗口的申请与扩展

use super::tree::{ReservationRoot, RsvTree};
use super::window::{ReserveWindow, ReserveWindowNode};
use crate::{
    bitmap::{bitmap_search_next_usable_block, BitmapBuffer},
    error::Result,
};

/// 从 `search_head` 起向后寻找可以容纳 `goal_size` 个块的空隙
///
/// 对应内核的 `find_next_reservable_window()`。调用者持有树锁。
///
/// 游标从 `start_block` 起，每遇到一个窗口就跳到它的末尾之后，直到
/// 游标加上窗口宽度落在下一个窗口之前，或者后面已经没有窗口。
/// 找到后节点的窗口被移动到 `[cur, cur + goal_size - 1]`，命中数清零。
///
/// # 参数
///
/// * `tree` - 已加锁的窗口树
/// * `search_head` - 起始窗口（通常是 `start_block` 的前驱）
/// * `node` - 申请窗口的节点
/// * `start_block` - 最早可用的块
/// * `last_block` - 本块组最后一个块
///
/// # 返回
///
/// 找到返回 `Ok(true)`，游标越过 `last_block` 返回 `Ok(false)`，节点不变
pub fn find_next_reservable_window(
    tree: &mut RsvTree,
    search_head: ReserveWindow,
    node: &mut ReserveWindowNode,
    start_block: u64,
    last_block: u64,
) -> Result<bool> {
    let size = node.goal_size.max(1) as u64;
    let mut cur = start_block;
    let mut rsv = search_head;

    loop {
        if cur <= rsv.end {
            cur = rsv.end + 1;
        }
        // 窗口可以越过组尾，只要起点仍在组内
        if cur > last_block {
            return Ok(false);
        }

        match tree.next(rsv.start) {
            None => break,
            Some(next) => {
                if cur + size <= next.start {
                    break;
                }
                rsv = next;
            }
        }
    }

    // 树以起点为键，移动窗口总是先删后插
    tree.remove(node)?;
    node.window = ReserveWindow { start: cur, end: cur + size - 1 };
    node.alloc_hit = 0;
    tree.insert(node)?;

    log::trace!(
        "[RSV] inode {} window -> [{}, {}]",
        node.owner(),
        node.window.start,
        node.window.end
    );
    Ok(true)
}

/// 为节点申请一个新窗口
///
/// 对应内核的 `alloc_new_reservation()`：
///
/// 1. 旧窗口跨越组尾且目标仍在旧窗口之后时保留旧窗口，申请失败
/// 2. 旧窗口命中超过一半时窗口宽度翻倍
/// 3. 树锁内找到空隙并挂入窗口
/// 4. 释放树锁后确认窗口内有空闲位；窗口已全被占用时从下一个空闲位
///    重新查找
///
/// # 参数
///
/// * `root` - 挂载级窗口根
/// * `node` - 申请窗口的节点
/// * `grp_goal` - 组内目标偏移
/// * `group_first` / `group_last` - 本块组首尾块号
/// * `bitmap` - 本块组位图
///
/// # 返回
///
/// 成功返回 `Ok(true)`，本组没有可保留的空闲区返回 `Ok(false)`
/// （此时节点的窗口已被丢弃，除非是第 1 步的情况）
pub fn alloc_new_reservation(
    root: &ReservationRoot,
    node: &mut ReserveWindowNode,
    grp_goal: Option<u32>,
    group_first: u64,
    group_last: u64,
    bitmap: &BitmapBuffer,
) -> Result<bool> {
    let mut start_block = group_first + grp_goal.unwrap_or(0) as u64;

    if !node.is_empty() {
        let w = node.window;
        if w.start <= group_last && w.end > group_last && start_block >= w.start {
            return Ok(false);
        }
        node.grow_if_hot();
    }

    let mut tree = root.lock();
    let mut search_head = match tree.search(start_block) {
        Some(head) => head,
        None => return Ok(false),
    };

    loop {
        if !find_next_reservable_window(&mut tree, search_head, node, start_block, group_last)? {
            tree.remove(node)?;
            return Ok(false);
        }
        drop(tree);

        // 位图扫描不持有树锁
        let w = node.window;
        let maxblocks = (group_last - group_first + 1) as u32;
        let first_free = bitmap.with_bits(|bits| {
            bitmap_search_next_usable_block((w.start - group_first) as u32, bits, maxblocks)
        });

        let Some(first_free) = first_free else {
            log::trace!(
                "[RSV] group {}: no free block after {}, dropping window",
                bitmap.group(),
                w.start
            );
            root.lock().remove(node)?;
            return Ok(false);
        };

        start_block = group_first + first_free as u64;
        if w.contains(start_block) {
            return Ok(true);
        }

        // 窗口内已全被占用，从第一个空闲位重新查找
        search_head = w;
        tree = root.lock();
    }
}

/// 尽力把窗口末尾向后延长 `size` 个块
///
/// 对应内核的 `try_to_extend_reservation()`。树锁被占用时直接放弃；
/// 延长不会越过下一个窗口的起点。
///
/// # 返回
///
/// 拿到树锁并完成（可能被截短的）延长时返回 `true`
pub fn try_to_extend_reservation(
    root: &ReservationRoot,
    node: &mut ReserveWindowNode,
    size: u64,
) -> bool {
    let Some(mut tree) = root.try_lock() else {
        log::trace!("[RSV] tree lock contended, skip extending inode {}", node.owner());
        return false;
    };
    if node.is_empty() {
        return false;
    }

    let w = node.window;
    let end = match tree.next(w.start) {
        None => w.end + size,
        Some(next) if next.start.saturating_sub(w.end + 1) >= size => w.end + size,
        Some(next) => next.start - 1,
    };
    tree.set_end(node, end).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BufferHead;
    use alloc::sync::Arc;

    const FIRST: u64 = 1;
    const LAST: u64 = 8192;

    fn free_bitmap() -> BitmapBuffer {
        BitmapBuffer::new(0, Arc::new(BufferHead::new(3, 1024)))
    }

    #[test]
    fn test_new_reservation_at_goal() {
        let root = ReservationRoot::new();
        let bitmap = free_bitmap();
        let mut node = ReserveWindowNode::new(12, 64);

        assert!(alloc_new_reservation(&root, &mut node, Some(99), FIRST, LAST, &bitmap).unwrap());
        assert_eq!(node.window(), ReserveWindow { start: 100, end: 163 });
        assert_eq!(root.lock().windows(), alloc::vec![(node.window(), 12)]);
    }

    #[test]
    fn test_second_window_placed_after_first() {
        let root = ReservationRoot::new();
        let bitmap = free_bitmap();
        let mut a = ReserveWindowNode::new(12, 8);
        let mut b = ReserveWindowNode::new(13, 8);

        assert!(alloc_new_reservation(&root, &mut a, Some(19), FIRST, LAST, &bitmap).unwrap());
        assert!(alloc_new_reservation(&root, &mut b, Some(21), FIRST, LAST, &bitmap).unwrap());

        assert_eq!(a.window(), ReserveWindow { start: 20, end: 27 });
        assert_eq!(b.window(), ReserveWindow { start: 28, end: 35 });
        root.lock().dump(false).unwrap();
    }

    #[test]
    fn test_gap_too_small_is_skipped() {
        let root = ReservationRoot::new();
        let bitmap = free_bitmap();
        root.lock().insert_raw(10, 19, 40);
        root.lock().insert_raw(24, 29, 41);

        let mut node = ReserveWindowNode::new(12, 8);
        assert!(alloc_new_reservation(&root, &mut node, Some(9), FIRST, LAST, &bitmap).unwrap());
        // [20, 23] 只有 4 块，放不下
        assert_eq!(node.window(), ReserveWindow { start: 30, end: 37 });
    }

    #[test]
    fn test_full_window_moves_to_first_free_bit() {
        let root = ReservationRoot::new();
        let bitmap = free_bitmap();
        for bit in 0..200 {
            bitmap.set_bit_atomic(bit);
        }

        let mut node = ReserveWindowNode::new(12, 8);
        assert!(alloc_new_reservation(&root, &mut node, Some(0), FIRST, LAST, &bitmap).unwrap());
        assert_eq!(node.window(), ReserveWindow { start: 201, end: 208 });
        assert_eq!(root.lock().len(), 1);
    }

    #[test]
    fn test_no_free_bit_drops_window() {
        let root = ReservationRoot::new();
        let bitmap = free_bitmap();
        for bit in 0..8192 {
            bitmap.set_bit_atomic(bit);
        }

        let mut node = ReserveWindowNode::new(12, 8);
        assert!(!alloc_new_reservation(&root, &mut node, None, FIRST, LAST, &bitmap).unwrap());
        assert!(node.is_empty());
        assert!(root.lock().is_empty());
    }

    #[test]
    fn test_window_straddling_group_end_is_kept() {
        let root = ReservationRoot::new();
        let bitmap = free_bitmap();
        let mut node = ReserveWindowNode::new(12, 16);
        assert!(alloc_new_reservation(&root, &mut node, Some(8185), FIRST, LAST, &bitmap).unwrap());
        assert_eq!(node.window(), ReserveWindow { start: 8186, end: 8201 });

        assert!(!alloc_new_reservation(&root, &mut node, Some(8190), FIRST, LAST, &bitmap).unwrap());
        assert_eq!(node.window().start, 8186);
        assert_eq!(root.lock().len(), 1);
    }

    #[test]
    fn test_goal_size_doubles_on_high_hit_ratio() {
        let root = ReservationRoot::new();
        let bitmap = free_bitmap();
        let mut node = ReserveWindowNode::new(12, 8);
        assert!(alloc_new_reservation(&root, &mut node, Some(0), FIRST, LAST, &bitmap).unwrap());

        node.alloc_hit = 6;
        assert!(alloc_new_reservation(&root, &mut node, Some(500), FIRST, LAST, &bitmap).unwrap());
        assert_eq!(node.goal_size, 16);
        assert_eq!(node.window().len(), 16);
        assert_eq!(node.alloc_hit, 0);
    }

    #[test]
    fn test_extend_clipped_by_next_window() {
        let root = ReservationRoot::new();
        let bitmap = free_bitmap();
        let mut node = ReserveWindowNode::new(12, 8);
        assert!(alloc_new_reservation(&root, &mut node, Some(99), FIRST, LAST, &bitmap).unwrap());
        root.lock().insert_raw(112, 120, 40);

        assert!(try_to_extend_reservation(&root, &mut node, 2));
        assert_eq!(node.window().end, 109);

        assert!(try_to_extend_reservation(&root, &mut node, 50));
        assert_eq!(node.window().end, 111);
        root.lock().dump(false).unwrap();
    }

    #[test]
    fn test_extend_skipped_under_contention() {
        let root = ReservationRoot::new();
        let bitmap = free_bitmap();
        let mut node = ReserveWindowNode::new(12, 8);
        assert!(alloc_new_reservation(&root, &mut node, Some(99), FIRST, LAST, &bitmap).unwrap());

        let guard = root.lock();
        assert!(!try_to_extend_reservation(&root, &mut node, 10));
        drop(guard);
        assert_eq!(node.window().end, 107);

        assert!(try_to_extend_reservation(&root, &mut node, 10));
        assert_eq!(node.window().end, 117);
    }
}
