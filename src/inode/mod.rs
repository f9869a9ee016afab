//! 内存中的 inode 分配状态
//!
//! 块分配器只关心 inode 的属主、类型、块计数以及它持有的保留窗口，
//! inode 的磁盘格式和块映射不在本 crate 的范围内。
//!
//! 内核用 `ext2_inode_info.truncate_mutex` 串行化同一 inode 的分配；
//! 这里由 `&mut Ext2Inode` 的独占借用承担同样的角色。

mod alloc_info;

pub use alloc_info::BlockAllocInfo;

use crate::consts::{EXT2_S_IFMT, EXT2_S_IFREG};

/// 分配器视角的 inode
#[derive(Debug, Clone)]
pub struct Ext2Inode {
    ino: u32,
    mode: u16,
    uid: u32,
    gid: u32,
    /// 已分配的文件系统块数
    blocks: u64,
    block_alloc_info: Option<BlockAllocInfo>,
}

impl Ext2Inode {
    /// 创建 inode
    ///
    /// # 参数
    ///
    /// * `ino` - inode 号（从 1 开始）
    /// * `mode` - 类型和权限位
    /// * `uid` / `gid` - 属主
    pub fn new(ino: u32, mode: u16, uid: u32, gid: u32) -> Self {
        Self {
            ino,
            mode,
            uid,
            gid,
            blocks: 0,
            block_alloc_info: None,
        }
    }

    /// inode 号
    pub fn ino(&self) -> u32 {
        self.ino
    }

    /// 模式
    pub fn mode(&self) -> u16 {
        self.mode
    }

    /// 属主 uid
    pub fn uid(&self) -> u32 {
        self.uid
    }

    /// 属主 gid
    pub fn gid(&self) -> u32 {
        self.gid
    }

    /// 是否为普通文件
    pub fn is_reg(&self) -> bool {
        self.mode & EXT2_S_IFMT == EXT2_S_IFREG
    }

    /// 已分配的块数
    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    pub(crate) fn add_blocks(&mut self, count: u64) {
        self.blocks += count;
    }

    pub(crate) fn sub_blocks(&mut self, count: u64) {
        self.blocks = self.blocks.saturating_sub(count);
    }

    /// 块分配信息（未初始化时为 None）
    pub fn block_alloc_info(&self) -> Option<&BlockAllocInfo> {
        self.block_alloc_info.as_ref()
    }

    /// 块分配信息（可变）
    pub fn block_alloc_info_mut(&mut self) -> Option<&mut BlockAllocInfo> {
        self.block_alloc_info.as_mut()
    }

    pub(crate) fn set_block_alloc_info(&mut self, info: BlockAllocInfo) {
        self.block_alloc_info = Some(info);
    }
}
