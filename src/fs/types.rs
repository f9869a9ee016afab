//! 挂载配置和调用者信息

use crate::consts::*;
use alloc::vec::Vec;
use bitflags::bitflags;

bitflags! {
    /// 挂载选项
    ///
    /// 对应内核 `ext2_sb_info.s_mount_opt` 中与块分配相关的位
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MountFlags: u32 {
        /// 启用块保留窗口（`reservation`）
        const RESERVATION = 0x0001;
        /// 位图修改后同步写盘（`sync`）
        const SYNC        = 0x0002;
    }
}

bitflags! {
    /// 块分配标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AllocFlags: u32 {
        /// 本次分配不使用保留窗口（`EXT2_ALLOC_NORESERVE`）
        const NORESERVE = 0x0001;
    }
}

/// 检测到文件系统错误时的行为（`errors=`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorsBehavior {
    /// 记录后继续
    #[default]
    Continue,
    /// 重新挂载为只读
    RemountRo,
    /// panic
    Panic,
}

impl ErrorsBehavior {
    /// 从 superblock 的 `s_errors` 字段解析，未知值按继续处理
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            EXT2_ERRORS_RO => Self::RemountRo,
            EXT2_ERRORS_PANIC => Self::Panic,
            _ => Self::Continue,
        }
    }

    /// 对应的 `s_errors` 字段值
    pub fn to_raw(self) -> u16 {
        match self {
            Self::Continue => EXT2_ERRORS_CONTINUE,
            Self::RemountRo => EXT2_ERRORS_RO,
            Self::Panic => EXT2_ERRORS_PANIC,
        }
    }
}

/// 文件系统配置
#[derive(Debug, Clone, Copy)]
pub struct FsConfig {
    /// 块缓存大小（块数）
    pub bcache_size: u32,
    /// 挂载选项
    pub mount_flags: MountFlags,
    /// 覆盖 superblock 中的出错行为
    pub errors: Option<ErrorsBehavior>,
    /// 覆盖 superblock 中的保留块 uid
    pub resuid: Option<u32>,
    /// 覆盖 superblock 中的保留块 gid
    pub resgid: Option<u32>,
    /// 只读挂载
    pub read_only: bool,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            bcache_size: crate::cache::DEFAULT_CACHE_SIZE as u32,
            mount_flags: MountFlags::RESERVATION,
            errors: None,
            resuid: None,
            resgid: None,
            read_only: false,
        }
    }
}

/// 调用者的身份
///
/// 对应内核的 `current_cred()` 中分配器用到的部分
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// 文件系统 uid
    pub fsuid: u32,
    /// 文件系统 gid
    pub fsgid: u32,
    /// 附加组
    pub groups: Vec<u32>,
    /// 是否持有 `CAP_SYS_RESOURCE`（可以使用保留块）
    pub cap_sys_resource: bool,
    /// 是否持有 `CAP_FOWNER`（可以修改他人文件的属性）
    pub cap_fowner: bool,
}

impl Credentials {
    /// root 身份
    pub fn root() -> Self {
        Self {
            fsuid: 0,
            fsgid: GLOBAL_ROOT_GID,
            groups: Vec::new(),
            cap_sys_resource: true,
            cap_fowner: true,
        }
    }

    /// 普通用户身份
    pub fn user(uid: u32, gid: u32) -> Self {
        Self {
            fsuid: uid,
            fsgid: gid,
            groups: Vec::new(),
            cap_sys_resource: false,
            cap_fowner: false,
        }
    }

    /// 是否属于组 `gid`
    ///
    /// 对应内核的 `in_group_p()`
    pub fn in_group(&self, gid: u32) -> bool {
        self.fsgid == gid || self.groups.contains(&gid)
    }
}

/// 文件系统统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatFs {
    /// 块大小（字节）
    pub block_size: u32,
    /// 总块数
    pub blocks_count: u64,
    /// 空闲块数
    pub free_blocks_count: u64,
    /// 非特权用户可用的块数
    pub available_blocks: u64,
    /// 总 inode 数
    pub inodes_count: u32,
    /// 空闲 inode 数
    pub free_inodes_count: u32,
    /// 块组数
    pub groups_count: u32,
}
