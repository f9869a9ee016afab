//! 块位图读入和验证

use crate::{
    bitmap::{
        ops::{find_next_zero_bit, test_bit},
        BitmapBuffer,
    },
    block::BlockDevice,
    block_group::{BlockGroup, BlockGroupRef},
    error::{Error, ErrorKind, Result},
    fs::Ext2Fs,
};

impl<D: BlockDevice> Ext2Fs<D> {
    /// 块组引用，越界的组号按文件系统错误处理
    ///
    /// 对应内核的 `ext2_get_group_desc()`
    pub(crate) fn group_ref(&self, group: u32) -> Result<&BlockGroupRef> {
        match self.groups.get(group as usize) {
            Some(bg) => Ok(bg),
            None => {
                self.ext2_error(
                    "ext2_get_group_desc",
                    format_args!(
                        "block_group >= groups_count - block_group = {}, groups_count = {}",
                        group,
                        self.groups.len()
                    ),
                );
                Err(Error::new(ErrorKind::InvalidInput, "Block group out of range"))
            }
        }
    }

    /// 块组描述符副本
    pub fn group_desc(&self, group: u32) -> Result<BlockGroup> {
        Ok(self.group_ref(group)?.snapshot())
    }

    /// 读入块组的块位图
    ///
    /// 对应内核的 `read_block_bitmap()`。位图块已在缓存中时直接返回；
    /// 第一次读入时检查元数据位，不一致只报告、不拒绝。
    /// 读盘期间不持有任何分配器锁。
    pub fn read_block_bitmap(&self, group: u32) -> Result<BitmapBuffer> {
        let desc = self.group_desc(group)?;
        let bitmap_blk = desc.get_block_bitmap();

        let bh = self.bdev.getblk(bitmap_blk)?;
        let fresh = match self.bdev.read_buffer(&bh) {
            Ok(fresh) => fresh,
            Err(e) => {
                self.ext2_error(
                    "read_block_bitmap",
                    format_args!(
                        "Cannot read block bitmap - block_group = {}, block_bitmap = {}",
                        group, bitmap_blk
                    ),
                );
                return Err(e);
            }
        };

        let bitmap = BitmapBuffer::new(group, bh);
        if fresh {
            self.valid_block_bitmap(&desc, &bitmap);
        }
        Ok(bitmap)
    }

    /// 检查位图中块位图、inode 位图和 inode 表对应的位都已置位
    ///
    /// 对应内核的 `ext2_valid_block_bitmap()`
    fn valid_block_bitmap(&self, desc: &BlockGroup, bitmap: &BitmapBuffer) -> bool {
        let group = desc.group_num();
        let first = self.sb.group_first_block(group);
        let itb = self.sb.itb_per_group();

        let bad_block = bitmap.with_bits(|bits| {
            for blk in [desc.get_block_bitmap(), desc.get_inode_bitmap()] {
                if !test_bit(bits, (blk - first) as u32) {
                    return Some(blk);
                }
            }
            let itable = (desc.get_inode_table_first_block() - first) as u32;
            find_next_zero_bit(bits, itable, itable + itb).map(|_| desc.get_inode_table_first_block())
        });

        match bad_block {
            None => true,
            Some(blk) => {
                self.ext2_error(
                    "ext2_valid_block_bitmap",
                    format_args!("Invalid block bitmap - block_group = {}, block = {}", group, blk),
                );
                false
            }
        }
    }
}
