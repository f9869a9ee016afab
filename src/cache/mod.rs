//! 块缓存模块
//!
//! 这个模块提供块分配器所依赖的 buffer cache 协作者：
//! 按块号获取或分配缓存块、标脏、同步写回、读入并等待。
//!
//! # 主要组件
//!
//! - [`BufferHead`] - 单个缓存块，包含数据、数据锁和状态标志
//! - [`BlockCache`] - 块缓存索引，使用 lru crate 提供 LRU 驱逐
//! - [`CacheFlags`] - 缓存块状态标志
//! - [`CacheStats`] - 缓存统计信息
//!
//! # 与内核 buffer cache 的对应关系
//!
//! | Linux                      | ext2_balloc                         |
//! |----------------------------|-------------------------------------|
//! | `struct buffer_head`       | [`BufferHead`]                      |
//! | `sb_getblk()`              | [`crate::block::BlockDev::getblk`]  |
//! | `sb_bread()`               | [`crate::block::BlockDev::bread`]   |
//! | `mark_buffer_dirty()`      | [`BufferHead::mark_dirty`]          |
//! | `sync_dirty_buffer()`      | [`crate::block::BlockDev::sync_dirty_buffer`] |
//! | `brelse()`                 | *(drop `Arc<BufferHead>`)*          |
//!
//! 缓存块通过 `Arc` 共享，仍被外部持有的块不会被驱逐，
//! 因此同一块号在任何时刻只存在一份内存副本。

mod buffer;
mod block_cache;

pub use buffer::{BufferHead, CacheFlags};
pub use block_cache::{BlockCache, CacheStats, DEFAULT_CACHE_SIZE};
