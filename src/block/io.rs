//! 经过 buffer cache 的块 I/O
//!
//! 所有读写都先操作缓存：缺失的块在缓存中分配后才从设备读入，
//! 脏块在 `sync_dirty_buffer` / `flush_all` / 驱逐时写回。

use super::device::{BlockDev, BlockDevice};
use crate::{
    cache::BufferHead,
    error::{Error, ErrorKind, Result},
};
use alloc::sync::Arc;
use core::sync::atomic::Ordering;

impl<D: BlockDevice> BlockDev<D> {
    /// 获取或分配缓存块（不读盘）
    ///
    /// 对应内核的 `sb_getblk()`。
    pub fn getblk(&self, blocknr: u64) -> Result<Arc<BufferHead>> {
        if blocknr >= self.total_blocks() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Block number beyond end of device",
            ));
        }

        let mut cache = self.bcache.lock();
        if let Some(bh) = cache.find_get(blocknr) {
            return Ok(bh);
        }

        if let Some(victim) = cache.dirty_victim() {
            // 写回期间受害块仍在缓存中；失败时保持脏并放弃本次插入，
            // 之后的读取不会拿到磁盘上的旧数据
            self.write_buffer(&victim)?;
            cache.note_writeback();
        }
        Ok(cache.insert_new(blocknr))
    }

    /// 读取块并等待完成
    ///
    /// 对应内核的 `sb_bread()`：已是最新的缓存块直接返回。
    pub fn bread(&self, blocknr: u64) -> Result<Arc<BufferHead>> {
        let bh = self.getblk(blocknr)?;
        self.read_buffer(&bh)?;
        Ok(bh)
    }

    /// 若缓存块尚未读入则从设备读入
    ///
    /// 返回 `true` 表示本次调用实际读了盘。
    /// I/O 锁保证同一块只被读一次，期间不持有任何分配器锁。
    pub fn read_buffer(&self, bh: &BufferHead) -> Result<bool> {
        if bh.is_uptodate() {
            return Ok(false);
        }

        let _io = bh.lock_io();
        if bh.is_uptodate() {
            return Ok(false);
        }

        let mut temp = alloc::vec![0u8; self.block_size as usize];
        {
            let mut dev = self.device.lock();
            dev.read_blocks(
                self.block_to_sector(bh.blocknr()),
                self.sectors_per_block(),
                &mut temp,
            )?;
        }
        self.physical_read_count.fetch_add(1, Ordering::Relaxed);

        bh.with_data_mut(|data| data.copy_from_slice(&temp));
        bh.mark_uptodate();
        log::trace!("[BLOCK] read block={:#x}", bh.blocknr());
        Ok(true)
    }

    /// 把缓存块写到设备（不论是否为脏）
    pub(super) fn write_buffer(&self, bh: &BufferHead) -> Result<()> {
        let mut dev = self.device.lock();
        if dev.is_read_only() {
            return Err(Error::new(ErrorKind::ReadOnly, "Device is read-only"));
        }

        bh.mark_clean();
        let result = {
            let data = bh.lock_data();
            dev.write_blocks(
                self.block_to_sector(bh.blocknr()),
                self.sectors_per_block(),
                &data,
            )
        };

        match result {
            Ok(_) => {
                self.physical_write_count.fetch_add(1, Ordering::Relaxed);
                log::trace!("[BLOCK] wrote block={:#x}", bh.blocknr());
                Ok(())
            }
            Err(e) => {
                bh.mark_dirty();
                log::error!("[BLOCK] write of block={:#x} failed: {}", bh.blocknr(), e);
                Err(e)
            }
        }
    }

    /// 同步写回一个脏块
    ///
    /// 对应内核的 `sync_dirty_buffer()`，干净块直接返回。
    pub fn sync_dirty_buffer(&self, bh: &BufferHead) -> Result<()> {
        if !bh.is_dirty() {
            return Ok(());
        }
        self.write_buffer(bh)
    }

    /// 写回所有脏块并刷新设备
    pub fn flush_all(&self) -> Result<()> {
        let dirty = self.bcache.lock().dirty_buffers();
        log::debug!("[BLOCK] flushing {} dirty blocks", dirty.len());
        for bh in dirty.iter() {
            self.sync_dirty_buffer(bh)?;
        }
        self.device.lock().flush()
    }
}
