//! ext2 磁盘数据结构
//!
//! 这个模块只包含块分配器和挂载路径需要读写的磁盘字段：
//! superblock 的前 104 字节和 32 字节的块组描述符。
//!
//! ## 设计原则
//!
//! 1. **磁盘格式结构** - 保留 C 风格命名（便于对照 ext2 格式）
//! 2. **字节序** - 所有字段都以小端存储，通过 byteorder 读写，不做指针转换
//! 3. **未知字段** - 编码时只覆盖已知偏移，其余字节保持原样

#![allow(non_camel_case_types)]

use crate::{
    consts::*,
    error::{Error, ErrorKind, Result},
};
use byteorder::{ByteOrder, LittleEndian};

//=============================================================================
// Superblock
//=============================================================================

/// Superblock 中分配器关心的字段
///
/// 对应 ext2 磁盘格式中的 `struct ext2_super_block`（前 104 字节）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ext2_sblock {
    pub inodes_count: u32,      // 0: 总 inode 数
    pub blocks_count: u32,      // 4: 总块数
    pub r_blocks_count: u32,    // 8: 保留块数
    pub free_blocks_count: u32, // 12: 空闲块数
    pub free_inodes_count: u32, // 16: 空闲 inode 数
    pub first_data_block: u32,  // 20: 第一个数据块
    pub log_block_size: u32,    // 24: 块大小（1024 << log_block_size）
    pub log_frag_size: u32,     // 28: 片段大小
    pub blocks_per_group: u32,  // 32: 每组块数
    pub frags_per_group: u32,   // 36: 每组片段数
    pub inodes_per_group: u32,  // 40: 每组 inode 数
    pub mtime: u32,             // 44: 挂载时间
    pub wtime: u32,             // 48: 写入时间
    pub mnt_count: u16,         // 52: 挂载次数
    pub max_mnt_count: i16,     // 54: 最大挂载次数
    pub magic: u16,             // 56: 魔数 (0xEF53)
    pub state: u16,             // 58: 文件系统状态
    pub errors: u16,            // 60: 出错行为
    pub minor_rev_level: u16,   // 62: 次版本号
    pub lastcheck: u32,         // 64: 最后检查时间
    pub checkinterval: u32,     // 68: 检查间隔
    pub creator_os: u32,        // 72: 创建者操作系统
    pub rev_level: u32,         // 76: 版本级别
    pub def_resuid: u16,        // 80: 默认保留 uid
    pub def_resgid: u16,        // 82: 默认保留 gid

    // EXT2_DYNAMIC_REV 扩展字段
    pub first_ino: u32,         // 84: 第一个非保留 inode
    pub inode_size: u16,        // 88: inode 大小
    pub block_group_nr: u16,    // 90: 本超级块所在的块组号
    pub feature_compat: u32,    // 92: 兼容特性
    pub feature_incompat: u32,  // 96: 不兼容特性
    pub feature_ro_compat: u32, // 100: 只读兼容特性
}

/// 已解析部分的字节长度
pub const EXT2_SBLOCK_PARSED_SIZE: usize = 104;

impl ext2_sblock {
    /// 从小端字节解析
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < EXT2_SBLOCK_PARSED_SIZE {
            return Err(Error::new(ErrorKind::InvalidInput, "Superblock buffer too short"));
        }
        let u32_at = |off: usize| LittleEndian::read_u32(&buf[off..off + 4]);
        let u16_at = |off: usize| LittleEndian::read_u16(&buf[off..off + 2]);

        Ok(Self {
            inodes_count: u32_at(0),
            blocks_count: u32_at(4),
            r_blocks_count: u32_at(8),
            free_blocks_count: u32_at(12),
            free_inodes_count: u32_at(16),
            first_data_block: u32_at(20),
            log_block_size: u32_at(24),
            log_frag_size: u32_at(28),
            blocks_per_group: u32_at(32),
            frags_per_group: u32_at(36),
            inodes_per_group: u32_at(40),
            mtime: u32_at(44),
            wtime: u32_at(48),
            mnt_count: u16_at(52),
            max_mnt_count: LittleEndian::read_i16(&buf[54..56]),
            magic: u16_at(56),
            state: u16_at(58),
            errors: u16_at(60),
            minor_rev_level: u16_at(62),
            lastcheck: u32_at(64),
            checkinterval: u32_at(68),
            creator_os: u32_at(72),
            rev_level: u32_at(76),
            def_resuid: u16_at(80),
            def_resgid: u16_at(82),
            first_ino: u32_at(84),
            inode_size: u16_at(88),
            block_group_nr: u16_at(90),
            feature_compat: u32_at(92),
            feature_incompat: u32_at(96),
            feature_ro_compat: u32_at(100),
        })
    }

    /// 按小端写入缓冲区（只覆盖前 104 字节）
    pub fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < EXT2_SBLOCK_PARSED_SIZE {
            return Err(Error::new(ErrorKind::InvalidInput, "Superblock buffer too short"));
        }
        let fields32 = [
            (0, self.inodes_count),
            (4, self.blocks_count),
            (8, self.r_blocks_count),
            (12, self.free_blocks_count),
            (16, self.free_inodes_count),
            (20, self.first_data_block),
            (24, self.log_block_size),
            (28, self.log_frag_size),
            (32, self.blocks_per_group),
            (36, self.frags_per_group),
            (40, self.inodes_per_group),
            (44, self.mtime),
            (48, self.wtime),
            (64, self.lastcheck),
            (68, self.checkinterval),
            (72, self.creator_os),
            (76, self.rev_level),
            (84, self.first_ino),
            (92, self.feature_compat),
            (96, self.feature_incompat),
            (100, self.feature_ro_compat),
        ];
        for (off, val) in fields32 {
            LittleEndian::write_u32(&mut buf[off..off + 4], val);
        }

        let fields16 = [
            (52, self.mnt_count),
            (56, self.magic),
            (58, self.state),
            (60, self.errors),
            (62, self.minor_rev_level),
            (80, self.def_resuid),
            (82, self.def_resgid),
            (88, self.inode_size),
            (90, self.block_group_nr),
        ];
        for (off, val) in fields16 {
            LittleEndian::write_u16(&mut buf[off..off + 2], val);
        }
        LittleEndian::write_i16(&mut buf[54..56], self.max_mnt_count);
        Ok(())
    }

    /// 魔数是否正确
    pub fn is_valid(&self) -> bool {
        self.magic == EXT2_SUPER_MAGIC
    }

    /// 块大小（字节）
    ///
    /// `log_block_size` 过大时返回 0，由调用者按损坏处理。
    pub fn block_size(&self) -> u32 {
        EXT2_MIN_BLOCK_SIZE
            .checked_shl(self.log_block_size)
            .filter(|bs| *bs <= EXT2_MAX_BLOCK_SIZE)
            .unwrap_or(0)
    }

    /// inode 大小（rev 0 固定 128）
    pub fn inode_size(&self) -> u16 {
        if self.rev_level == EXT2_GOOD_OLD_REV {
            EXT2_GOOD_OLD_INODE_SIZE
        } else {
            self.inode_size
        }
    }

    /// 第一个非保留 inode
    pub fn first_ino(&self) -> u32 {
        if self.rev_level == EXT2_GOOD_OLD_REV {
            EXT2_GOOD_OLD_FIRST_INO
        } else {
            self.first_ino
        }
    }
}

//=============================================================================
// 块组描述符
//=============================================================================

/// 块组描述符
///
/// 对应 ext2 磁盘格式中的 `struct ext2_group_desc`（32 字节）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ext2_group_desc {
    pub block_bitmap: u32,      // 0: 块位图块号
    pub inode_bitmap: u32,      // 4: inode 位图块号
    pub inode_table: u32,       // 8: inode 表起始块号
    pub free_blocks_count: u16, // 12: 空闲块数
    pub free_inodes_count: u16, // 14: 空闲 inode 数
    pub used_dirs_count: u16,   // 16: 目录数
}

impl ext2_group_desc {
    /// 从小端字节解析
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < EXT2_GROUP_DESC_SIZE {
            return Err(Error::new(ErrorKind::InvalidInput, "Group descriptor buffer too short"));
        }
        Ok(Self {
            block_bitmap: LittleEndian::read_u32(&buf[0..4]),
            inode_bitmap: LittleEndian::read_u32(&buf[4..8]),
            inode_table: LittleEndian::read_u32(&buf[8..12]),
            free_blocks_count: LittleEndian::read_u16(&buf[12..14]),
            free_inodes_count: LittleEndian::read_u16(&buf[14..16]),
            used_dirs_count: LittleEndian::read_u16(&buf[16..18]),
        })
    }

    /// 按小端写入缓冲区（填充和保留字段保持原样）
    pub fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < EXT2_GROUP_DESC_SIZE {
            return Err(Error::new(ErrorKind::InvalidInput, "Group descriptor buffer too short"));
        }
        LittleEndian::write_u32(&mut buf[0..4], self.block_bitmap);
        LittleEndian::write_u32(&mut buf[4..8], self.inode_bitmap);
        LittleEndian::write_u32(&mut buf[8..12], self.inode_table);
        LittleEndian::write_u16(&mut buf[12..14], self.free_blocks_count);
        LittleEndian::write_u16(&mut buf[14..16], self.free_inodes_count);
        LittleEndian::write_u16(&mut buf[16..18], self.used_dirs_count);
        Ok(())
    }
}
