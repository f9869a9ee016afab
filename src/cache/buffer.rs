//! 缓存块结构
//!
//! 对应内核 buffer cache 中的 `struct buffer_head`

use alloc::vec::Vec;
use bitflags::bitflags;
use core::sync::atomic::{AtomicU8, Ordering};
use spin::{Mutex, MutexGuard};

bitflags! {
    /// 缓存块标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CacheFlags: u8 {
        /// 数据已更新（有效）
        const UPTODATE = 0x01;
        /// 数据已修改（脏）
        const DIRTY    = 0x02;
    }
}

/// 缓存块
///
/// 在多个调用者之间通过 `Arc<BufferHead>` 共享。
///
/// - `data` 的互斥锁同时充当块位图的"块组位锁"：所有对位图位的
///   test-and-set / test-and-clear 都在这把锁下完成
/// - `io` 锁串行化首次读盘，保证同一块只会被读入一次
/// - 状态标志使用原子字节，判断 uptodate / dirty 无需加锁
pub struct BufferHead {
    blocknr: u64,
    data: Mutex<Vec<u8>>,
    flags: AtomicU8,
    io: Mutex<()>,
}

impl core::fmt::Debug for BufferHead {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufferHead")
            .field("blocknr", &self.blocknr)
            .field("flags", &self.flags())
            .finish()
    }
}

impl BufferHead {
    /// 创建新的（未读入的）缓存块
    ///
    /// # 参数
    ///
    /// * `blocknr` - 块号
    /// * `block_size` - 块大小（字节）
    pub fn new(blocknr: u64, block_size: usize) -> Self {
        Self {
            blocknr,
            data: Mutex::new(alloc::vec![0u8; block_size]),
            flags: AtomicU8::new(0),
            io: Mutex::new(()),
        }
    }

    /// 块号
    pub fn blocknr(&self) -> u64 {
        self.blocknr
    }

    /// 当前状态标志
    pub fn flags(&self) -> CacheFlags {
        CacheFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// 锁定块数据
    pub fn lock_data(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock()
    }

    /// 在持有数据锁的情况下读取
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self.data.lock();
        f(&guard)
    }

    /// 在持有数据锁的情况下修改（不自动标脏）
    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self.data.lock();
        f(&mut guard)
    }

    /// 获取 I/O 锁（首次读入时使用）
    pub(crate) fn lock_io(&self) -> MutexGuard<'_, ()> {
        self.io.lock()
    }

    /// 标记为脏（已修改）
    pub fn mark_dirty(&self) {
        self.flags.fetch_or(CacheFlags::DIRTY.bits(), Ordering::AcqRel);
    }

    /// 标记为干净（已写入磁盘）
    pub fn mark_clean(&self) {
        self.flags.fetch_and(!CacheFlags::DIRTY.bits(), Ordering::AcqRel);
    }

    /// 检查是否是脏块
    pub fn is_dirty(&self) -> bool {
        self.flags().contains(CacheFlags::DIRTY)
    }

    /// 标记数据有效
    pub fn mark_uptodate(&self) {
        self.flags.fetch_or(CacheFlags::UPTODATE.bits(), Ordering::AcqRel);
    }

    /// 检查数据是否有效
    pub fn is_uptodate(&self) -> bool {
        self.flags().contains(CacheFlags::UPTODATE)
    }
}
