//! 物理块分配模块
//!
//! 对应 Linux ext2 的 `balloc.c`：
//!
//! - `alloc`：块组内的分配（可选地限制在保留窗口内）
//! - `new_blocks`：跨块组的分配策略
//! - `free`：跨块组的释放
//! - `bitmap_load`：块位图读入和验证
//! - `stat`：空闲块统计
//! - `reservation`：inode 保留窗口的创建、丢弃和宽度控制
//!
//! 所有操作都是 [`crate::fs::Ext2Fs`] 上的方法，挂载上下文显式传递。

mod alloc;
mod bitmap_load;
mod free;
pub mod helpers;
mod new_blocks;
mod reservation;
mod stat;

pub use self::alloc::try_to_allocate;
pub use stat::{FreeBlocksReport, GroupFreeMismatch};
