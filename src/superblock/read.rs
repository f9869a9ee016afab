//! Superblock 读取、验证和块组几何

use crate::{
    block::{BlockDev, BlockDevice},
    consts::*,
    error::{Error, ErrorKind, Result},
    types::ext2_sblock,
};
use alloc::vec;
use alloc::vec::Vec;

/// 从块设备读取 superblock 原始字节
///
/// superblock 总是位于设备偏移 1024 处，与块大小无关。
pub fn read_superblock_bytes<D: BlockDevice>(bdev: &BlockDev<D>) -> Result<Vec<u8>> {
    let mut sb_buf = vec![0u8; EXT2_SUPERBLOCK_SIZE];
    bdev.read_bytes_direct(EXT2_SUPERBLOCK_OFFSET, &mut sb_buf)?;
    Ok(sb_buf)
}

/// Superblock 包装器
///
/// 挂载后几何字段不再变化；可变的计数（空闲块数、状态）由挂载上下文维护，
/// 同步时通过 [`Superblock::encode`] 写回。
#[derive(Debug, Clone)]
pub struct Superblock {
    pub(super) inner: ext2_sblock,
    /// 原始 1024 字节，写回时保留未解析的字段
    pub(super) raw: Vec<u8>,
    block_size: u32,
    groups_count: u32,
    itb_per_group: u32,
    desc_per_block: u32,
    gdb_count: u32,
}

impl Superblock {
    /// 从原始字节解析并验证
    pub fn from_bytes(raw: Vec<u8>) -> Result<Self> {
        let inner = ext2_sblock::from_bytes(&raw)?;
        Self::new(inner, raw)
    }

    /// 从块设备加载 superblock
    pub fn load<D: BlockDevice>(bdev: &BlockDev<D>) -> Result<Self> {
        let raw = read_superblock_bytes(bdev)?;
        Self::from_bytes(raw)
    }

    fn new(inner: ext2_sblock, mut raw: Vec<u8>) -> Result<Self> {
        check(&inner)?;
        raw.resize(EXT2_SUPERBLOCK_SIZE, 0);

        let block_size = inner.block_size();
        let inodes_per_block = block_size / inner.inode_size() as u32;
        let itb_per_group = inner.inodes_per_group.div_ceil(inodes_per_block);
        let groups_count =
            (inner.blocks_count - inner.first_data_block).div_ceil(inner.blocks_per_group);
        let desc_per_block = block_size / EXT2_GROUP_DESC_SIZE as u32;
        let gdb_count = groups_count.div_ceil(desc_per_block);

        Ok(Self {
            inner,
            raw,
            block_size,
            groups_count,
            itb_per_group,
            desc_per_block,
            gdb_count,
        })
    }

    /// 获取内部 superblock 结构的引用
    pub fn inner(&self) -> &ext2_sblock {
        &self.inner
    }

    /// 块大小
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// 总块数
    pub fn blocks_count(&self) -> u64 {
        self.inner.blocks_count as u64
    }

    /// 保留给特权用户的块数
    pub fn r_blocks_count(&self) -> u64 {
        self.inner.r_blocks_count as u64
    }

    /// 挂载时磁盘上记录的空闲块数
    pub fn free_blocks_count(&self) -> u64 {
        self.inner.free_blocks_count as u64
    }

    /// 第一个数据块（1K 块为 1，其余为 0）
    pub fn first_data_block(&self) -> u64 {
        self.inner.first_data_block as u64
    }

    /// 每组块数
    pub fn blocks_per_group(&self) -> u32 {
        self.inner.blocks_per_group
    }

    /// 每组 inode 数
    pub fn inodes_per_group(&self) -> u32 {
        self.inner.inodes_per_group
    }

    /// inode 大小
    pub fn inode_size(&self) -> u16 {
        self.inner.inode_size()
    }

    /// 每组 inode 表占用的块数
    pub fn itb_per_group(&self) -> u32 {
        self.itb_per_group
    }

    /// 块组数量
    pub fn groups_count(&self) -> u32 {
        self.groups_count
    }

    /// 每个块可容纳的块组描述符数
    pub fn desc_per_block(&self) -> u32 {
        self.desc_per_block
    }

    /// 块组描述符表占用的块数
    pub fn gdb_count(&self) -> u32 {
        self.gdb_count
    }

    /// 磁盘上记录的文件系统状态
    pub fn state(&self) -> u16 {
        self.inner.state
    }

    /// 磁盘上记录的出错行为
    pub fn errors(&self) -> u16 {
        self.inner.errors
    }

    /// 默认保留 uid
    pub fn def_resuid(&self) -> u32 {
        self.inner.def_resuid as u32
    }

    /// 默认保留 gid
    pub fn def_resgid(&self) -> u32 {
        self.inner.def_resgid as u32
    }

    /// 检查是否支持某个只读兼容特性
    pub fn has_ro_compat_feature(&self, feature: u32) -> bool {
        (self.inner.feature_ro_compat & feature) != 0
    }

    /// 块组的第一个块
    ///
    /// 对应内核的 `ext2_group_first_block_no()`
    pub fn group_first_block(&self, group: u32) -> u64 {
        group as u64 * self.blocks_per_group() as u64 + self.first_data_block()
    }

    /// 块组的最后一个块（最后一组截止到 `blocks_count - 1`）
    ///
    /// 对应内核的 `ext2_group_last_block_no()`
    pub fn group_last_block(&self, group: u32) -> u64 {
        if group + 1 == self.groups_count {
            self.blocks_count() - 1
        } else {
            self.group_first_block(group) + self.blocks_per_group() as u64 - 1
        }
    }

    /// 块组实际包含的块数
    pub fn blocks_in_group(&self, group: u32) -> u32 {
        (self.group_last_block(group) - self.group_first_block(group) + 1) as u32
    }

    /// 块号所在的块组和组内偏移
    pub fn block_group_of(&self, block: u64) -> (u32, u32) {
        let rel = block - self.first_data_block();
        let bpg = self.blocks_per_group() as u64;
        ((rel / bpg) as u32, (rel % bpg) as u32)
    }

    /// superblock 所在的块号
    pub fn superblock_block(&self) -> u64 {
        EXT2_SUPERBLOCK_OFFSET / self.block_size as u64
    }

    /// 块组是否带 superblock 备份
    ///
    /// 对应内核的 `ext2_bg_has_super()`：
    /// 启用 SPARSE_SUPER 时只有 0、1 和 3/5/7 的幂次组带备份。
    pub fn bg_has_super(&self, group: u32) -> bool {
        if self.has_ro_compat_feature(EXT2_FEATURE_RO_COMPAT_SPARSE_SUPER)
            && !is_sparse_group(group)
        {
            return false;
        }
        true
    }

    /// 块组中描述符表（及其备份）占用的块数
    ///
    /// 对应内核的 `ext2_bg_num_gdb()`
    pub fn bg_num_gdb(&self, group: u32) -> u32 {
        if self.bg_has_super(group) {
            self.gdb_count
        } else {
            0
        }
    }
}

/// 组号是否为 0、1 或 3/5/7 的幂
fn is_sparse_group(group: u32) -> bool {
    if group <= 1 {
        return true;
    }
    [3u32, 5, 7].iter().any(|&base| {
        let mut n = base;
        while n < group {
            match n.checked_mul(base) {
                Some(next) => n = next,
                None => return false,
            }
        }
        n == group
    })
}

/// superblock 验证
///
/// 检查魔数、块大小范围、计数非零以及每组块数不超过位图容量。
pub fn check(sb: &ext2_sblock) -> Result<()> {
    if !sb.is_valid() {
        return Err(Error::new(
            ErrorKind::Corrupted,
            "Invalid ext2 superblock magic number",
        ));
    }

    let block_size = sb.block_size();
    if !(EXT2_MIN_BLOCK_SIZE..=EXT2_MAX_BLOCK_SIZE).contains(&block_size) {
        return Err(Error::new(ErrorKind::Corrupted, "Unsupported block size"));
    }

    if sb.blocks_count == 0 || sb.inodes_count == 0 {
        return Err(Error::new(ErrorKind::Corrupted, "Superblock counts are zero"));
    }

    if sb.blocks_per_group == 0 || sb.inodes_per_group == 0 {
        return Err(Error::new(
            ErrorKind::Corrupted,
            "Superblock per-group counts are zero",
        ));
    }

    if sb.blocks_per_group > block_size * 8 {
        return Err(Error::new(
            ErrorKind::Corrupted,
            "blocks_per_group exceeds bitmap capacity",
        ));
    }

    if sb.first_data_block >= sb.blocks_count {
        return Err(Error::new(
            ErrorKind::Corrupted,
            "first_data_block beyond end of filesystem",
        ));
    }

    let inode_size = sb.inode_size() as u32;
    if inode_size < EXT2_GOOD_OLD_INODE_SIZE as u32
        || inode_size > block_size
        || !inode_size.is_power_of_two()
    {
        return Err(Error::new(ErrorKind::Corrupted, "Invalid inode size"));
    }

    Ok(())
}
