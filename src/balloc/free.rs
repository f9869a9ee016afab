//! 块释放功能
//!
//! 对应内核的 `ext2_free_blocks()`

use crate::{
    block::BlockDevice,
    error::{Error, ErrorKind, Result},
    fs::{Ext2Fs, MountFlags},
    inode::Ext2Inode,
};

impl<D: BlockDevice> Ext2Fs<D> {
    /// 释放 `[block, block + count)`
    ///
    /// 跨越块组边界时逐组处理。已经是空闲的位只报告不失败；
    /// 范围落在数据区之外或触及某组的元数据时按文件系统错误处理，
    /// 返回 `Corrupted`。已经处理完的块组保留释放结果，已释放的块数
    /// 总会计入空闲块计数、配额和 inode。
    ///
    /// # 参数
    ///
    /// * `inode` - 属主 inode
    /// * `block` - 第一个块
    /// * `count` - 块数
    pub fn free_blocks(&self, inode: &mut Ext2Inode, block: u64, count: u64) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        self.check_writable()?;

        if !self.data_block_valid(block, count) {
            self.ext2_error(
                "ext2_free_blocks",
                format_args!(
                    "Freeing blocks not in datazone - block = {}, count = {}",
                    block, count
                ),
            );
            return Err(Error::new(ErrorKind::Corrupted, "Freeing blocks not in datazone"));
        }

        let mut freed = 0u64;
        let result = self.free_in_groups(block, count, &mut freed);

        if freed > 0 {
            self.add_free_counter(freed);
            self.quota.free_block(inode, freed);
            inode.sub_blocks(freed);
        }
        log::debug!(
            "[BALLOC] inode {}: freed {}/{} blocks at {}",
            inode.ino(),
            freed,
            count,
            block
        );
        result
    }

    /// 范围是否完全位于数据区内
    ///
    /// 对应内核的 `ext2_data_block_valid()`：不能从 `s_first_data_block`
    /// 或之前开始，不能回绕或越过卷尾，也不能覆盖 superblock 所在的块。
    pub fn data_block_valid(&self, start: u64, count: u64) -> bool {
        if count == 0 {
            return false;
        }
        let Some(last) = start.checked_add(count - 1) else {
            return false;
        };
        if start <= self.sb.first_data_block() || last >= self.sb.blocks_count() {
            return false;
        }

        let sb_block = self.sb.superblock_block();
        !(start <= sb_block && last >= sb_block)
    }

    fn free_in_groups(&self, mut block: u64, mut count: u64, freed: &mut u64) -> Result<()> {
        let bpg = self.sb.blocks_per_group() as u64;

        while count > 0 {
            let (group, bit) = self.sb.block_group_of(block);
            let in_group = count.min(bpg - bit as u64);

            let bitmap = self.read_block_bitmap(group)?;
            let bg = self.group_ref(group)?;

            if bg.snapshot().overlaps_metadata(&self.sb, block, in_group) {
                self.ext2_error(
                    "ext2_free_blocks",
                    format_args!(
                        "Freeing blocks in system zones - Block = {}, count = {}",
                        block, in_group
                    ),
                );
                return Err(Error::new(ErrorKind::Corrupted, "Freeing blocks in system zone"));
            }

            let mut group_freed = 0u32;
            for i in 0..in_group as u32 {
                if bitmap.clear_bit_atomic(bit + i) {
                    group_freed += 1;
                } else {
                    self.ext2_error(
                        "ext2_free_blocks",
                        format_args!("bit already cleared for block {}", block + i as u64),
                    );
                }
            }

            bitmap.mark_dirty();
            if self.mount_flags.contains(MountFlags::SYNC) {
                if let Err(e) = self.bdev.sync_dirty_buffer(bitmap.buffer()) {
                    log::warn!("[BALLOC] group {}: bitmap sync failed: {}", group, e);
                }
            }
            bg.adjust_free_blocks(group_freed as i64)?;
            *freed += group_freed as u64;

            block += in_group;
            count -= in_group;
        }
        Ok(())
    }
}
