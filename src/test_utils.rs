//! 测试用内存设备和格式化辅助函数

use crate::{
    block::{BlockDev, BlockDevice},
    consts::EXT2_S_IFREG,
    error::{Error, ErrorKind, Result},
    fs::{format, Ext2Fs, FormatOptions, FsConfig},
    inode::Ext2Inode,
};
use alloc::vec;
use alloc::vec::Vec;

/// 内存块设备，可以注入读错误
pub(crate) struct MockDevice {
    block_size: u32,
    sector_size: u32,
    total_blocks: u64,
    storage: Vec<u8>,
    failing_blocks: Vec<u64>,
    read_only: bool,
}

impl MockDevice {
    pub(crate) fn new(block_size: u32, total_blocks: u64) -> Self {
        Self {
            block_size,
            sector_size: 512,
            total_blocks,
            storage: vec![0u8; (total_blocks * block_size as u64) as usize],
            failing_blocks: Vec::new(),
            read_only: false,
        }
    }

    pub(crate) fn storage(&self) -> &[u8] {
        &self.storage
    }

    pub(crate) fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.storage
    }

    /// 之后读到块 `block`（按设备块大小计）时返回 I/O 错误
    pub(crate) fn fail_reads_of_block(&mut self, block: u64) {
        self.failing_blocks.push(block);
    }

    pub(crate) fn clear_read_failures(&mut self) {
        self.failing_blocks.clear();
    }

    pub(crate) fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }
}

impl BlockDevice for MockDevice {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
        let start = (lba * self.sector_size as u64) as usize;
        let len = (count * self.sector_size) as usize;
        if start + len > self.storage.len() {
            return Err(Error::new(ErrorKind::Io, "Read beyond end of device"));
        }
        let bs = self.block_size as usize;
        let first = (start / bs) as u64;
        let last = ((start + len - 1) / bs) as u64;
        if self.failing_blocks.iter().any(|b| (first..=last).contains(b)) {
            return Err(Error::new(ErrorKind::Io, "Injected read error"));
        }
        buf[..len].copy_from_slice(&self.storage[start..start + len]);
        Ok(len)
    }

    fn write_blocks(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize> {
        let start = (lba * self.sector_size as u64) as usize;
        let len = (count * self.sector_size) as usize;
        if start + len > self.storage.len() {
            return Err(Error::new(ErrorKind::Io, "Write beyond end of device"));
        }
        self.storage[start..start + len].copy_from_slice(&buf[..len]);
        Ok(len)
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// 1K 块，每组 1024 块，4 组，每组 16 个 inode 表块
pub(crate) fn small_layout() -> FormatOptions {
    FormatOptions {
        block_size: 1024,
        blocks_count: 4097,
        blocks_per_group: 1024,
        inodes_per_group: 128,
        ..FormatOptions::default()
    }
}

/// 1K 块，每组 8192 块，3 组
pub(crate) fn wide_layout() -> FormatOptions {
    FormatOptions {
        block_size: 1024,
        blocks_count: 1 + 3 * 8192,
        blocks_per_group: 8192,
        inodes_per_group: 128,
        ..FormatOptions::default()
    }
}

/// 创建刚好容纳文件系统的内存设备并格式化
pub(crate) fn format_device(opts: FormatOptions) -> BlockDev<MockDevice> {
    let dev = MockDevice::new(opts.block_size, opts.blocks_count);
    let bdev = BlockDev::new(dev).unwrap();
    format(&bdev, &opts).unwrap();
    bdev
}

pub(crate) fn mount_layout(opts: FormatOptions, config: FsConfig) -> Ext2Fs<MockDevice> {
    let dev = format_device(opts).into_inner();
    Ext2Fs::mount(dev, config).unwrap()
}

pub(crate) fn mount_small(config: FsConfig) -> Ext2Fs<MockDevice> {
    mount_layout(small_layout(), config)
}

/// uid/gid 1000 的普通文件
pub(crate) fn reg_inode(ino: u32) -> Ext2Inode {
    Ext2Inode::new(ino, EXT2_S_IFREG | 0o644, 1000, 1000)
}
