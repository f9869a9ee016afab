//! 块组位图缓存块
//!
//! 包装一个缓存块，把缓存块的数据锁当作块组的位锁使用：
//! 单个位的 test-and-set / test-and-clear 在锁内完成，
//! 其他 CPU 上的分配者看到的要么是修改前、要么是修改后的状态。

use super::ops;
use crate::cache::BufferHead;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// 块组位图
#[derive(Debug, Clone)]
pub struct BitmapBuffer {
    group: u32,
    bh: Arc<BufferHead>,
}

impl BitmapBuffer {
    /// 包装已读入的位图块
    pub fn new(group: u32, bh: Arc<BufferHead>) -> Self {
        Self { group, bh }
    }

    /// 块组编号
    pub fn group(&self) -> u32 {
        self.group
    }

    /// 底层缓存块
    pub fn buffer(&self) -> &Arc<BufferHead> {
        &self.bh
    }

    /// 原子地设置一位
    ///
    /// 对应内核的 `ext2_set_bit_atomic()`
    ///
    /// # 返回
    ///
    /// 该位原先已被设置时返回 `true`（表示被其他分配者抢先）
    pub fn set_bit_atomic(&self, bit: u32) -> bool {
        let mut data = self.bh.lock_data();
        // 越界视为已占用
        ops::set_bit(&mut data, bit).unwrap_or(true)
    }

    /// 原子地清除一位
    ///
    /// 对应内核的 `ext2_clear_bit_atomic()`
    ///
    /// # 返回
    ///
    /// 该位原先为 0 时返回 `false`（重复释放）
    pub fn clear_bit_atomic(&self, bit: u32) -> bool {
        let mut data = self.bh.lock_data();
        ops::clear_bit(&mut data, bit).unwrap_or(false)
    }

    /// 测试一位
    pub fn test_bit(&self, bit: u32) -> bool {
        ops::test_bit(&self.bh.lock_data(), bit)
    }

    /// 在锁内读取位图数据
    ///
    /// 扫描器在闭包中运行，闭包返回后其他分配者才能修改位图，
    /// 因此结果只是提示，占用仍需 `set_bit_atomic`。
    pub fn with_bits<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        self.bh.with_data(f)
    }

    /// 复制一份位图快照
    pub fn snapshot(&self) -> Vec<u8> {
        self.bh.with_data(|d| d.to_vec())
    }

    /// 统计 `[0, nbits)` 中的空闲位
    pub fn count_free(&self, nbits: u32) -> u32 {
        self.bh.with_data(|d| ops::count_zeros(d, 0, nbits))
    }

    /// 标记位图块为脏
    pub fn mark_dirty(&self) {
        self.bh.mark_dirty();
    }
}
