//! 空闲块统计

use crate::{block::BlockDevice, error::Result, fs::Ext2Fs};
use alloc::vec::Vec;

/// 某个块组的描述符计数与位图计数不一致
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupFreeMismatch {
    /// 块组编号
    pub group: u32,
    /// 描述符中的空闲块数
    pub desc_count: u32,
    /// 位图中数出的空闲块数
    pub bitmap_count: u32,
}

/// [`Ext2Fs::check_free_blocks`] 的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeBlocksReport {
    /// 描述符空闲块数之和
    pub desc_total: u64,
    /// 位图空闲位数之和
    pub bitmap_total: u64,
    /// 不一致的块组
    pub mismatches: Vec<GroupFreeMismatch>,
}

impl<D: BlockDevice> Ext2Fs<D> {
    /// 空闲块总数
    ///
    /// 对应内核的 `ext2_count_free_blocks()`：各块组描述符计数之和。
    pub fn count_free_blocks(&self) -> u64 {
        self.groups
            .iter()
            .map(|bg| bg.free_blocks_count() as u64)
            .sum()
    }

    /// 逐组比对描述符计数和位图
    ///
    /// 对应内核 `EXT2FS_DEBUG` 下的 `ext2_count_free_blocks()`。
    /// 只统计块组实际包含的块，最后一组的填充位不计入。
    pub fn check_free_blocks(&self) -> Result<FreeBlocksReport> {
        let mut report = FreeBlocksReport::default();

        for group in 0..self.sb.groups_count() {
            let desc_count = self.group_ref(group)?.free_blocks_count();
            let bitmap = self.read_block_bitmap(group)?;
            let bitmap_count = bitmap.count_free(self.sb.blocks_in_group(group));

            log::debug!(
                "[BALLOC] group {}: stored = {}, counted = {}",
                group,
                desc_count,
                bitmap_count
            );
            if desc_count != bitmap_count {
                log::warn!(
                    "[BALLOC] group {}: descriptor says {} free, bitmap has {}",
                    group,
                    desc_count,
                    bitmap_count
                );
                report.mismatches.push(GroupFreeMismatch {
                    group,
                    desc_count,
                    bitmap_count,
                });
            }
            report.desc_total += desc_count as u64;
            report.bitmap_total += bitmap_count as u64;
        }

        log::debug!(
            "[BALLOC] free blocks: stored = {}, computed = {}",
            report.desc_total,
            report.bitmap_total
        );
        Ok(report)
    }
}
