//! inode 的块分配信息
//!
//! 对应内核的 `struct ext2_block_alloc_info`

use crate::rsv::ReserveWindowNode;

/// 块分配信息
///
/// 在 inode 第一次需要分配块时创建，持有 inode 的保留窗口节点和
/// 最近一次分配的位置（供上层计算下一次的目标块）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAllocInfo {
    /// 保留窗口节点
    pub rsv_window_node: ReserveWindowNode,
    /// 最近一次分配的逻辑块号
    pub last_alloc_logical_block: u64,
    /// 最近一次分配的物理块号
    pub last_alloc_physical_block: u64,
}

impl BlockAllocInfo {
    /// 创建分配信息，窗口为空
    ///
    /// # 参数
    ///
    /// * `ino` - 属主 inode 号
    /// * `goal_size` - 初始窗口宽度，0 表示不使用保留窗口
    pub fn new(ino: u32, goal_size: u32) -> Self {
        Self {
            rsv_window_node: ReserveWindowNode::new(ino, goal_size),
            last_alloc_logical_block: 0,
            last_alloc_physical_block: 0,
        }
    }
}
