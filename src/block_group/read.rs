//! 块组描述符读取和查询操作

use crate::{
    consts::*,
    error::{Error, ErrorKind, Result},
    superblock::Superblock,
    types::ext2_group_desc,
};

/// 计算块组描述符的存储位置
///
/// ext2 的描述符表紧跟在 superblock 所在块之后（`first_data_block + 1`）连续存放。
///
/// # 返回
///
/// (块地址, 块内偏移) 元组
pub fn get_block_group_desc_location(sb: &Superblock, group_num: u32) -> (u64, usize) {
    let desc_per_block = sb.desc_per_block();
    let gdt_block = sb.first_data_block() + 1 + (group_num / desc_per_block) as u64;
    let offset = (group_num % desc_per_block) as usize * EXT2_GROUP_DESC_SIZE;
    (gdt_block, offset)
}

/// 块组描述符的解码副本
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGroup {
    pub(super) group_num: u32,
    pub(super) inner: ext2_group_desc,
}

impl BlockGroup {
    /// 从描述符表块的数据中解码
    ///
    /// # 参数
    ///
    /// * `data` - 描述符表块的数据
    /// * `offset` - 描述符在块内的偏移
    /// * `group_num` - 块组编号
    pub fn decode(data: &[u8], offset: usize, group_num: u32) -> Result<Self> {
        let end = offset + EXT2_GROUP_DESC_SIZE;
        if end > data.len() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Group descriptor offset beyond block",
            ));
        }
        Ok(Self {
            group_num,
            inner: ext2_group_desc::from_bytes(&data[offset..end])?,
        })
    }

    /// 由已有描述符构造（格式化时使用）
    pub fn new(group_num: u32, inner: ext2_group_desc) -> Self {
        Self { group_num, inner }
    }

    /// 块组编号
    pub fn group_num(&self) -> u32 {
        self.group_num
    }

    /// 内部描述符
    pub fn inner(&self) -> &ext2_group_desc {
        &self.inner
    }

    /// 块位图块号
    pub fn get_block_bitmap(&self) -> u64 {
        self.inner.block_bitmap as u64
    }

    /// inode 位图块号
    pub fn get_inode_bitmap(&self) -> u64 {
        self.inner.inode_bitmap as u64
    }

    /// inode 表起始块号
    pub fn get_inode_table_first_block(&self) -> u64 {
        self.inner.inode_table as u64
    }

    /// 空闲块数
    pub fn get_free_blocks_count(&self) -> u32 {
        self.inner.free_blocks_count as u32
    }

    /// 空闲 inode 数
    pub fn get_free_inodes_count(&self) -> u32 {
        self.inner.free_inodes_count as u32
    }

    /// `[start, start + count)` 是否与本组的元数据块相交
    ///
    /// 元数据指块位图、inode 位图和 inode 表（`itb_per_group` 块）。
    pub fn overlaps_metadata(&self, sb: &Superblock, start: u64, count: u64) -> bool {
        let end = start + count;
        let hits = |first: u64, len: u64| first < end && start < first + len;

        hits(self.get_block_bitmap(), 1)
            || hits(self.get_inode_bitmap(), 1)
            || hits(self.get_inode_table_first_block(), sb.itb_per_group() as u64)
    }

    /// 验证元数据块位于本组范围之内
    ///
    /// 对应内核 `ext2_check_descriptors()` 中的块号检查。
    pub fn check(&self, sb: &Superblock) -> Result<()> {
        let first = sb.group_first_block(self.group_num);
        let last = sb.group_last_block(self.group_num);
        let in_group = |blk: u64| blk >= first && blk <= last;

        if !in_group(self.get_block_bitmap()) {
            log::error!(
                "[EXT2-fs] group {}: block bitmap {} not in group",
                self.group_num,
                self.get_block_bitmap()
            );
            return Err(Error::new(ErrorKind::Corrupted, "Block bitmap not in group"));
        }
        if !in_group(self.get_inode_bitmap()) {
            log::error!(
                "[EXT2-fs] group {}: inode bitmap {} not in group",
                self.group_num,
                self.get_inode_bitmap()
            );
            return Err(Error::new(ErrorKind::Corrupted, "Inode bitmap not in group"));
        }
        let itable = self.get_inode_table_first_block();
        let itable_last = itable + sb.itb_per_group() as u64 - 1;
        if !in_group(itable) || !in_group(itable_last) {
            log::error!(
                "[EXT2-fs] group {}: inode table {} not in group",
                self.group_num,
                itable
            );
            return Err(Error::new(ErrorKind::Corrupted, "Inode table not in group"));
        }
        if self.get_free_blocks_count() > sb.blocks_in_group(self.group_num) {
            return Err(Error::new(
                ErrorKind::Corrupted,
                "Group free block count exceeds group size",
            ));
        }
        Ok(())
    }
}
