//! 块设备核心类型

use crate::{
    cache::BlockCache,
    error::{Error, ErrorKind, Result},
};
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

/// 块设备接口
///
/// 实现此 trait 以提供底层块设备访问。
///
/// # 示例
///
/// ```rust,ignore
/// use ext2_balloc::{BlockDevice, Result};
///
/// struct MyDevice {
///     // ...
/// }
///
/// impl BlockDevice for MyDevice {
///     fn block_size(&self) -> u32 {
///         1024
///     }
///
///     fn sector_size(&self) -> u32 {
///         512
///     }
///
///     fn total_blocks(&self) -> u64 {
///         65536
///     }
///
///     fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
///         // 实现扇区读取
///         Ok(count as usize * self.sector_size() as usize)
///     }
///
///     fn write_blocks(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize> {
///         // 实现扇区写入
///         Ok(count as usize * self.sector_size() as usize)
///     }
/// }
/// ```
pub trait BlockDevice {
    /// 设备逻辑块大小
    fn block_size(&self) -> u32;

    /// 物理扇区大小（通常 512）
    fn sector_size(&self) -> u32;

    /// 总块数（以 `block_size` 为单位）
    fn total_blocks(&self) -> u64;

    /// 读取扇区
    ///
    /// # 参数
    ///
    /// * `lba` - 起始扇区号
    /// * `count` - 要读取的扇区数
    /// * `buf` - 目标缓冲区（大小至少为 count * sector_size）
    ///
    /// # 返回
    ///
    /// 成功返回实际读取的字节数
    fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize>;

    /// 写入扇区
    ///
    /// # 参数
    ///
    /// * `lba` - 起始扇区号
    /// * `count` - 要写入的扇区数
    /// * `buf` - 源缓冲区（大小至少为 count * sector_size）
    ///
    /// # 返回
    ///
    /// 成功返回实际写入的字节数
    fn write_blocks(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize>;

    /// 刷新设备缓存
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// 是否只读
    fn is_read_only(&self) -> bool {
        false
    }
}

/// 块设备包装器
///
/// 在 [`BlockDevice`] 之上提供文件系统块粒度的访问和 buffer cache。
///
/// # 并发使用
///
/// 设备与缓存索引各自由一把自旋锁保护，`BlockDev` 可以在多个线程之间
/// 以共享引用使用。锁顺序固定为：缓存 → 设备 → 缓存块数据。
pub struct BlockDev<D> {
    /// 底层设备
    pub(super) device: Mutex<D>,
    /// 块缓存
    pub(super) bcache: Mutex<BlockCache>,
    /// 文件系统块大小（字节）
    pub(super) block_size: u32,
    /// 物理扇区大小（字节）
    pub(super) sector_size: u32,
    /// 设备总字节数
    pub(super) device_bytes: u64,
    /// 物理读取次数
    pub(super) physical_read_count: AtomicU64,
    /// 物理写入次数
    pub(super) physical_write_count: AtomicU64,
}

impl<D: BlockDevice> BlockDev<D> {
    /// 创建带缓存的块设备包装器
    ///
    /// 初始块大小取设备的逻辑块大小，挂载时由 superblock 修正。
    ///
    /// # 参数
    ///
    /// * `device` - 底层块设备
    /// * `cache_blocks` - 缓存块数量
    pub fn new_with_cache(device: D, cache_blocks: usize) -> Result<Self> {
        let block_size = device.block_size();
        let sector_size = device.sector_size();

        if sector_size == 0 || block_size % sector_size != 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Block size must be a multiple of sector size",
            ));
        }

        let device_bytes = device.total_blocks() * block_size as u64;

        Ok(Self {
            device: Mutex::new(device),
            bcache: Mutex::new(BlockCache::new(cache_blocks, block_size as usize)),
            block_size,
            sector_size,
            device_bytes,
            physical_read_count: AtomicU64::new(0),
            physical_write_count: AtomicU64::new(0),
        })
    }

    /// 创建使用默认缓存大小的块设备包装器
    pub fn new(device: D) -> Result<Self> {
        Self::new_with_cache(device, crate::cache::DEFAULT_CACHE_SIZE)
    }

    /// 设置文件系统块大小
    ///
    /// 会清空缓存，只能在挂载阶段、没有缓存块被引用时调用。
    pub fn set_block_size(&mut self, block_size: u32) -> Result<()> {
        if block_size == 0 || block_size % self.sector_size != 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Block size must be a multiple of sector size",
            ));
        }
        self.block_size = block_size;
        self.bcache.get_mut().set_block_size(block_size as usize);
        Ok(())
    }

    /// 文件系统块大小
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// 物理扇区大小
    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    /// 以文件系统块为单位的设备总块数
    pub fn total_blocks(&self) -> u64 {
        self.device_bytes / self.block_size as u64
    }

    /// 设备是否只读
    pub fn is_read_only(&self) -> bool {
        self.device.lock().is_read_only()
    }

    /// 物理读取次数
    pub fn physical_read_count(&self) -> u64 {
        self.physical_read_count.load(Ordering::Relaxed)
    }

    /// 物理写入次数
    pub fn physical_write_count(&self) -> u64 {
        self.physical_write_count.load(Ordering::Relaxed)
    }

    /// 缓存统计信息
    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.bcache.lock().stats()
    }

    /// 取回底层设备
    pub fn into_inner(self) -> D {
        self.device.into_inner()
    }

    /// 访问底层设备（测试和工具使用）
    pub fn with_device<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        f(&mut self.device.lock())
    }

    // 内部辅助方法

    /// 将文件系统块号转换为物理扇区号
    pub(super) fn block_to_sector(&self, blocknr: u64) -> u64 {
        blocknr * (self.block_size / self.sector_size) as u64
    }

    /// 每个文件系统块包含的物理扇区数
    pub(super) fn sectors_per_block(&self) -> u32 {
        self.block_size / self.sector_size
    }

    // ===== 直接访问接口（绕过缓存）=====

    /// 直接读取字节（绕过缓存）
    ///
    /// 以扇区为粒度读取，用于挂载时读取 superblock。
    pub fn read_bytes_direct(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let sector = self.sector_size as u64;
        let start = offset / sector;
        let skip = (offset % sector) as usize;
        let count = (skip + buf.len()).div_ceil(sector as usize);

        let mut temp = alloc::vec![0u8; count * sector as usize];
        {
            let mut dev = self.device.lock();
            dev.read_blocks(start, count as u32, &mut temp)?;
        }
        self.physical_read_count.fetch_add(1, Ordering::Relaxed);

        let len = buf.len();
        buf.copy_from_slice(&temp[skip..skip + len]);
        Ok(len)
    }

    /// 直接写入字节（绕过缓存）
    ///
    /// 非扇区对齐时先读后写。
    pub fn write_bytes_direct(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        let sector = self.sector_size as u64;
        let start = offset / sector;
        let skip = (offset % sector) as usize;
        let count = (skip + buf.len()).div_ceil(sector as usize);

        let mut temp = alloc::vec![0u8; count * sector as usize];
        let mut dev = self.device.lock();
        if dev.is_read_only() {
            return Err(Error::new(ErrorKind::ReadOnly, "Device is read-only"));
        }
        if skip != 0 || buf.len() % sector as usize != 0 {
            dev.read_blocks(start, count as u32, &mut temp)?;
            self.physical_read_count.fetch_add(1, Ordering::Relaxed);
        }
        temp[skip..skip + buf.len()].copy_from_slice(buf);
        dev.write_blocks(start, count as u32, &temp)?;
        self.physical_write_count.fetch_add(1, Ordering::Relaxed);
        Ok(buf.len())
    }
}
