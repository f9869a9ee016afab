//! ext2 文件系统常量定义
//!
//! 这个模块包含了块分配器所需的常量，包括：
//! - 磁盘布局相关常量
//! - 特性标志
//! - 保留窗口参数

//=============================================================================
// 基础常量
//=============================================================================

/// 默认物理块大小（扇区大小，512 字节）
pub const EXT2_DEFAULT_SECTOR_SIZE: u32 = 512;

/// 最小块大小（1024 字节）
pub const EXT2_MIN_BLOCK_SIZE: u32 = 1024;

/// 最大块大小（65536 字节）
pub const EXT2_MAX_BLOCK_SIZE: u32 = 65536;

/// 最小块大小的 log2
pub const EXT2_MIN_BLOCK_LOG_SIZE: u32 = 10;

//=============================================================================
// Superblock 相关
//=============================================================================

/// Superblock 在设备上的字节偏移
pub const EXT2_SUPERBLOCK_OFFSET: u64 = 1024;

/// Superblock 大小（字节）
pub const EXT2_SUPERBLOCK_SIZE: usize = 1024;

/// ext2 魔数 (0xEF53)
pub const EXT2_SUPER_MAGIC: u16 = 0xEF53;

/// 块组描述符大小
pub const EXT2_GROUP_DESC_SIZE: usize = 32;

/// 旧版本（rev 0）的 inode 大小
pub const EXT2_GOOD_OLD_INODE_SIZE: u16 = 128;

/// 旧版本（rev 0）的第一个非保留 inode
pub const EXT2_GOOD_OLD_FIRST_INO: u32 = 11;

/// 修订版本：原始格式
pub const EXT2_GOOD_OLD_REV: u32 = 0;

/// 修订版本：动态 inode 大小
pub const EXT2_DYNAMIC_REV: u32 = 1;

/// Superblock 状态：干净卸载
pub const EXT2_VALID_FS: u16 = 0x0001;

/// Superblock 状态：检测到错误
pub const EXT2_ERROR_FS: u16 = 0x0002;

/// 出错行为：继续
pub const EXT2_ERRORS_CONTINUE: u16 = 1;

/// 出错行为：重新挂载为只读
pub const EXT2_ERRORS_RO: u16 = 2;

/// 出错行为：panic
pub const EXT2_ERRORS_PANIC: u16 = 3;

/// 默认保留块 uid / gid
pub const EXT2_DEF_RESUID: u16 = 0;
/// 默认保留块 gid
pub const EXT2_DEF_RESGID: u16 = 0;

/// root 的 gid
pub const GLOBAL_ROOT_GID: u32 = 0;

//=============================================================================
// 特性标志
//=============================================================================

/// RO_COMPAT：稀疏 superblock 备份
pub const EXT2_FEATURE_RO_COMPAT_SPARSE_SUPER: u32 = 0x0001;

//=============================================================================
// 块保留窗口
//=============================================================================

/// 默认保留窗口大小（块）
pub const EXT2_DEFAULT_RESERVE_BLOCKS: u32 = 8;

/// 最大保留窗口大小（块）
pub const EXT2_MAX_RESERVE_BLOCKS: u32 = 1027;

/// "未分配" 窗口哨兵值
pub const EXT2_RESERVE_WINDOW_NOT_ALLOCATED: u64 = 0;

/// 向前回退以贴合前一段空闲区的最大位数
pub const EXT2_BACKUP_BITS: u32 = 7;

/// near-goal 扫描的对齐粒度（位）
pub const EXT2_NEAR_GOAL_ALIGN: u32 = 64;

//=============================================================================
// Inode 模式
//=============================================================================

/// 文件类型掩码
pub const EXT2_S_IFMT: u16 = 0xF000;
/// 普通文件
pub const EXT2_S_IFREG: u16 = 0x8000;
/// 目录
pub const EXT2_S_IFDIR: u16 = 0x4000;
/// 符号链接
pub const EXT2_S_IFLNK: u16 = 0xA000;
