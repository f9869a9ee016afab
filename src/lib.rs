//! ext2_balloc: ext2 块分配器
//!
//! 这是一个纯 Rust 实现的 ext2 物理块分配器，带有按 inode 的块保留窗口，
//! 旨在提供：
//! - **零 unsafe 代码**
//! - **no_std + alloc**，可以嵌入内核使用
//! - 每个挂载一份显式的分配器上下文，没有全局状态
//!
//! # 示例
//!
//! ```rust,ignore
//! use ext2_balloc::{AllocFlags, Credentials, Ext2Fs, Ext2Inode, FsConfig, Result};
//!
//! fn write_file<D: ext2_balloc::BlockDevice>(device: D) -> Result<D> {
//!     let fs = Ext2Fs::mount(device, FsConfig::default())?;
//!
//!     let mut inode = Ext2Inode::new(12, 0o100644, 1000, 1000);
//!     fs.init_block_alloc_info(&mut inode);
//!
//!     let mut count = 16;
//!     let first = fs.new_blocks(&mut inode, 0, &mut count, AllocFlags::empty(), &Credentials::root())?;
//!     // ... 写入 [first, first + count) ...
//!
//!     fs.discard_reservation(&mut inode)?;
//!     fs.unmount()
//! }
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`block`] - 块设备抽象和 I/O 操作
//! - [`cache`] - buffer cache
//! - [`superblock`] - Superblock 读取和块组几何
//! - [`block_group`] - 块组描述符
//! - [`bitmap`] - 位图操作和空闲位扫描
//! - [`rsv`] - 块保留窗口
//! - [`balloc`] - 块分配和释放
//! - [`fs`] - 挂载上下文

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

// ===== 核心模块 =====

/// 错误处理
pub mod error;

/// 块设备抽象
pub mod block;

/// 常量定义
pub mod consts;

/// 数据结构定义
pub mod types;

/// Superblock 操作
pub mod superblock;

/// 块组操作
pub mod block_group;

/// 块缓存
pub mod cache;

/// 位图操作
pub mod bitmap;

/// 块保留窗口
pub mod rsv;

/// 配额
pub mod quota;

/// Inode 分配状态
pub mod inode;

/// 块分配
pub mod balloc;

/// 挂载上下文
pub mod fs;

#[cfg(test)]
pub(crate) mod test_utils;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, Result};

// 块设备
pub use block::{BlockDev, BlockDevice};

// Superblock
pub use superblock::Superblock;

// BlockGroup
pub use block_group::{BlockGroup, BlockGroupRef};

// Cache
pub use cache::{BlockCache, BufferHead, CacheFlags, CacheStats, DEFAULT_CACHE_SIZE};

// 位图
pub use bitmap::BitmapBuffer;

// 保留窗口
pub use rsv::{ReservationRoot, ReserveWindow, ReserveWindowNode, RsvTree};

// 配额
pub use quota::{BlockLimitQuota, NoQuota, QuotaOps};

// Inode
pub use inode::{BlockAllocInfo, Ext2Inode};

// 块分配
pub use balloc::{FreeBlocksReport, GroupFreeMismatch};

// FileSystem
pub use fs::{
    format, AllocFlags, Credentials, ErrorsBehavior, Ext2Fs, FormatOptions, FsConfig,
    MountFlags, StatFs,
};
