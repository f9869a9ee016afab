//! Superblock 操作模块
//!
//! 这个模块提供 ext2 superblock 的读取、验证、几何计算和写回功能。
//! 分配器需要的只是其中的计数字段和块组几何。

mod read;
mod write;

pub use read::*;
pub use write::*;
