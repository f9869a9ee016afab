//! 块缓存实现（使用 lru crate）
//!
//! 缓存中每个块以 `Arc<BufferHead>` 的形式存放：
//!
//! ```text
//! struct BlockCache {
//!     cache: LruCache<u64, Arc<BufferHead>>,  // O(1)，自动LRU
//!     block_size: usize,
//!     stats: CacheStats,
//! }
//! ```
//!
//! 驱逐规则：
//! - 只驱逐没有外部引用（`Arc::strong_count == 1`）的干净块
//! - 脏块留在缓存中，由调用者通过 [`BlockCache::dirty_victim`] 取出写回后才能驱逐
//! - 所有块都被引用时扩容，而不是报错

use super::buffer::BufferHead;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::num::NonZeroUsize;
use lru::LruCache;

/// 默认缓存块数量
pub const DEFAULT_CACHE_SIZE: usize = 256;

/// 缓存统计信息
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// 总访问次数
    pub total_accesses: u64,
    /// 缓存命中次数
    pub hits: u64,
    /// 缓存未命中次数
    pub misses: u64,
    /// 脏块写回次数
    pub writebacks: u64,
    /// 驱逐次数
    pub evictions: u64,
}

impl CacheStats {
    /// 计算命中率
    pub fn hit_rate(&self) -> f64 {
        if self.total_accesses == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_accesses as f64
        }
    }
}

/// 块缓存
pub struct BlockCache {
    /// LRU缓存核心
    cache: LruCache<u64, Arc<BufferHead>>,
    /// 配置容量（扩容后仍以此为目标）
    capacity: NonZeroUsize,
    /// 块大小（字节）
    block_size: usize,
    /// 统计信息
    stats: CacheStats,
}

impl BlockCache {
    /// 创建新的块缓存
    ///
    /// # 参数
    ///
    /// * `capacity` - 缓存容量（块数量），0 按 1 处理
    /// * `block_size` - 块大小（字节）
    pub fn new(capacity: usize, block_size: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
            capacity,
            block_size,
            stats: CacheStats::default(),
        }
    }

    /// 块大小
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// 修改块大小
    ///
    /// 挂载时读到 superblock 后调用；已缓存的块全部丢弃，
    /// 因此只能在没有外部引用时使用。
    pub fn set_block_size(&mut self, block_size: usize) {
        if block_size != self.block_size {
            self.cache.clear();
            self.block_size = block_size;
        }
    }

    /// 查找块（命中时更新 LRU 顺序）
    pub fn find_get(&mut self, blocknr: u64) -> Option<Arc<BufferHead>> {
        self.stats.total_accesses += 1;
        match self.cache.get(&blocknr) {
            Some(bh) => {
                self.stats.hits += 1;
                log::trace!("[CACHE] lookup block={:#x} HIT", blocknr);
                Some(Arc::clone(bh))
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// 缓存已满且 LRU 端可驱逐的块为脏时返回该块
    ///
    /// 块仍留在缓存中。调用者在持有缓存锁期间写回它并释放返回的引用，
    /// 之后 [`BlockCache::insert_new`] 才会驱逐它；写回失败时块保持脏，数据不丢。
    pub fn dirty_victim(&self) -> Option<Arc<BufferHead>> {
        if self.cache.len() < self.cache.cap().get() {
            return None;
        }
        self.cache
            .iter()
            .rev()
            .find(|(_, bh)| Arc::strong_count(bh) == 1)
            .map(|(_, bh)| bh)
            .filter(|bh| bh.is_dirty())
            .map(Arc::clone)
    }

    /// 记录一次驱逐前的写回
    pub fn note_writeback(&mut self) {
        self.stats.writebacks += 1;
    }

    /// 插入一个新的（未读入的）块
    ///
    /// 调用者必须先确认块不在缓存中。缓存已满时驱逐 LRU 端第一个
    /// 未被引用的干净块；脏块从不在这里被丢弃。
    pub fn insert_new(&mut self, blocknr: u64) -> Arc<BufferHead> {
        if self.cache.len() >= self.cache.cap().get()
            && !self.evict_one()
            && self.cache.len() >= self.cache.cap().get()
        {
            let grown = self.cache.cap().saturating_add(1);
            log::warn!(
                "[CACHE] no clean unreferenced block among {}, growing to {}",
                self.cache.len(),
                grown
            );
            self.cache.resize(grown);
        }

        let bh = Arc::new(BufferHead::new(blocknr, self.block_size));
        self.cache.put(blocknr, Arc::clone(&bh));
        log::debug!(
            "[CACHE] block={:#x} inserted, cache={}/{}",
            blocknr,
            self.cache.len(),
            self.cache.cap().get()
        );
        bh
    }

    /// 从 LRU 端驱逐一个未被引用的干净块
    fn evict_one(&mut self) -> bool {
        let Some(victim) = self
            .cache
            .iter()
            .rev()
            .find(|(_, bh)| Arc::strong_count(bh) == 1 && !bh.is_dirty())
            .map(|(k, _)| *k)
        else {
            return false;
        };

        self.cache.pop(&victim);
        self.stats.evictions += 1;
        log::debug!("[CACHE] evicted block={:#x}", victim);

        // 驱逐成功后，如果之前扩容过，尝试回落到配置容量
        if self.cache.cap() > self.capacity && self.cache.len() < self.capacity.get() {
            self.cache.resize(self.capacity);
        }
        true
    }

    /// 收集所有脏块（按块号顺序）
    pub fn dirty_buffers(&self) -> Vec<Arc<BufferHead>> {
        let mut dirty: Vec<Arc<BufferHead>> = self
            .cache
            .iter()
            .filter(|(_, bh)| bh.is_dirty())
            .map(|(_, bh)| Arc::clone(bh))
            .collect();
        dirty.sort_by_key(|bh| bh.blocknr());
        dirty
    }

    /// 当前缓存块数
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// 缓存是否为空
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// 当前容量
    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }

    /// 统计信息
    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }
}
