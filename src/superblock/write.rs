//! Superblock 写回

use super::Superblock;
use crate::{
    block::{BlockDev, BlockDevice},
    consts::*,
    error::Result,
};
use alloc::vec::Vec;

impl Superblock {
    /// 生成带有最新计数的 superblock 字节
    ///
    /// 对应内核 `ext2_sync_super()` 中对 `s_free_blocks_count` 和 `s_state` 的更新。
    /// 未解析的字段按挂载时读到的内容原样写回。
    ///
    /// # 参数
    ///
    /// * `free_blocks` - 当前空闲块数
    /// * `state` - 当前文件系统状态
    pub fn encode(&self, free_blocks: u64, state: u16) -> Result<Vec<u8>> {
        let mut inner = self.inner;
        inner.free_blocks_count = free_blocks.min(u32::MAX as u64) as u32;
        inner.state = state;

        let mut raw = self.raw.clone();
        inner.write_to(&mut raw)?;
        Ok(raw)
    }
}

/// 将 superblock 写回块设备（仅主 superblock）
///
/// 分配器只维护主 superblock 的计数，备份由 fsck 负责。
pub fn write_superblock<D: BlockDevice>(bdev: &BlockDev<D>, bytes: &[u8]) -> Result<()> {
    bdev.write_bytes_direct(EXT2_SUPERBLOCK_OFFSET, bytes)?;
    Ok(())
}
