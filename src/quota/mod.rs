//! 配额协作者
//!
//! 块分配器在触碰位图之前为 inode 预扣配额，在提前退出和部分满足时
//! 退回多扣的部分，释放块时归还。对应内核的 `dquot_alloc_block()` /
//! `dquot_free_block()`。

use crate::{
    error::{Error, ErrorKind, Result},
    inode::Ext2Inode,
};
use core::sync::atomic::{AtomicU64, Ordering};

/// 配额操作
pub trait QuotaOps: Send + Sync {
    /// 为 inode 预扣 `count` 个块，超出配额时返回 `QuotaExceeded`
    fn alloc_block(&self, inode: &Ext2Inode, count: u64) -> Result<()>;

    /// 归还 inode 的 `count` 个块
    fn free_block(&self, inode: &Ext2Inode, count: u64);
}

/// 不做任何记账的配额实现（默认）
#[derive(Debug, Default, Clone, Copy)]
pub struct NoQuota;

impl QuotaOps for NoQuota {
    fn alloc_block(&self, _inode: &Ext2Inode, _count: u64) -> Result<()> {
        Ok(())
    }

    fn free_block(&self, _inode: &Ext2Inode, _count: u64) {}
}

/// 整个挂载共享一个块数上限的配额
#[derive(Debug)]
pub struct BlockLimitQuota {
    limit: u64,
    used: AtomicU64,
}

impl BlockLimitQuota {
    /// 创建上限为 `limit` 块的配额
    pub fn new(limit: u64) -> Self {
        Self { limit, used: AtomicU64::new(0) }
    }

    /// 已扣除的块数
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }
}

impl QuotaOps for BlockLimitQuota {
    fn alloc_block(&self, inode: &Ext2Inode, count: u64) -> Result<()> {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(count).filter(|n| *n <= self.limit)
            })
            .map(|_| ())
            .map_err(|used| {
                log::debug!(
                    "[BALLOC] quota: inode {} wants {} blocks, {}/{} used",
                    inode.ino(),
                    count,
                    used,
                    self.limit
                );
                Error::new(ErrorKind::QuotaExceeded, "Block quota exceeded")
            })
    }

    fn free_block(&self, _inode: &Ext2Inode, count: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(count))
            });
    }
}

impl<Q: QuotaOps + ?Sized> QuotaOps for alloc::sync::Arc<Q> {
    fn alloc_block(&self, inode: &Ext2Inode, count: u64) -> Result<()> {
        (**self).alloc_block(inode, count)
    }

    fn free_block(&self, inode: &Ext2Inode, count: u64) {
        (**self).free_block(inode, count)
    }
}
