//! 块组描述符写入和修改操作

use super::{get_block_group_desc_location, BlockGroup};
use crate::{
    block::{BlockDev, BlockDevice},
    cache::BufferHead,
    error::Result,
    superblock::Superblock,
};
use alloc::sync::Arc;
use spin::Mutex;

impl BlockGroup {
    /// 获取内部块组描述符的可变引用
    #[cfg(test)]
    pub(crate) fn inner_mut(&mut self) -> &mut crate::types::ext2_group_desc {
        &mut self.inner
    }

    /// 设置空闲块数
    pub fn set_free_blocks_count(&mut self, count: u32) {
        self.inner.free_blocks_count = count.min(u16::MAX as u32) as u16;
    }

    /// 编码到描述符表块的数据中
    pub fn encode(&self, data: &mut [u8], offset: usize) -> Result<()> {
        self.inner.write_to(&mut data[offset..])
    }
}

/// 块组引用
///
/// 挂载期间每个块组一份。描述符副本由一把自旋锁保护（内核中的
/// `ext2_bg_lock`），修改在锁内写穿到缓存中的描述符表块并标脏。
/// 描述符表块在挂载期间一直被引用，不会被缓存驱逐。
///
/// 锁顺序：描述符锁 → 描述符表块数据锁。
///
/// 位图的置位/清位不在这把锁下，而是在位图缓存块的数据锁下进行
/// （见 [`crate::bitmap::BitmapBuffer`]）。两把锁从不同时持有：分配路径
/// 先在位图锁内逐位认领，释放位图锁后再用 [`Self::adjust_free_blocks`]
/// 一次性扣减。两步之间其他线程可能看到位图比计数多占了几块，
/// 但每一步完成后位和计数的变化量相等，守恒在操作结束时成立。
pub struct BlockGroupRef {
    bgid: u32,
    desc: Mutex<BlockGroup>,
    gdt: Arc<BufferHead>,
    offset_in_block: usize,
}

impl BlockGroupRef {
    /// 从缓存中的描述符表块加载块组引用
    ///
    /// 对应 lwext4 的 `ext4_fs_get_block_group_ref()`
    pub fn load<D: BlockDevice>(bdev: &BlockDev<D>, sb: &Superblock, bgid: u32) -> Result<Self> {
        let (desc_block, offset_in_block) = get_block_group_desc_location(sb, bgid);
        let gdt = bdev.bread(desc_block)?;
        let desc = gdt.with_data(|data| BlockGroup::decode(data, offset_in_block, bgid))?;

        Ok(Self {
            bgid,
            desc: Mutex::new(desc),
            gdt,
            offset_in_block,
        })
    }

    /// 块组编号
    pub fn bgid(&self) -> u32 {
        self.bgid
    }

    /// 描述符副本
    pub fn snapshot(&self) -> BlockGroup {
        *self.desc.lock()
    }

    /// 空闲块数
    pub fn free_blocks_count(&self) -> u32 {
        self.desc.lock().get_free_blocks_count()
    }

    /// 描述符表块
    pub fn gdt_buffer(&self) -> &Arc<BufferHead> {
        &self.gdt
    }

    /// 调整空闲块数并写穿到描述符表块
    ///
    /// 对应内核的 `group_adjust_blocks()`：计数在块组锁内修改，
    /// 随后描述符表块被标脏。
    ///
    /// # 参数
    ///
    /// * `delta` - 空闲块数变化量（分配为负，释放为正）
    pub fn adjust_free_blocks(&self, delta: i64) -> Result<u32> {
        if delta == 0 {
            return Ok(self.free_blocks_count());
        }

        let mut desc = self.desc.lock();
        let free = (desc.get_free_blocks_count() as i64 + delta).max(0) as u32;
        desc.set_free_blocks_count(free);
        {
            let mut data = self.gdt.lock_data();
            desc.encode(&mut data, self.offset_in_block)?;
        }
        self.gdt.mark_dirty();

        log::trace!("[BALLOC] group {} free blocks {:+} -> {}", self.bgid, delta, free);
        Ok(free)
    }
}
