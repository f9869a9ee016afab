//! ext2 挂载上下文
//!
//! 对应内核的 `struct ext2_sb_info`：一个挂载点的全部分配器状态都放在
//! [`Ext2Fs`] 中并显式传递，不存在任何全局状态。两个挂载互不影响。

use super::types::{ErrorsBehavior, FsConfig, MountFlags, StatFs};
use crate::{
    block::{BlockDev, BlockDevice},
    block_group::BlockGroupRef,
    consts::*,
    error::{Error, ErrorKind, Result},
    quota::{NoQuota, QuotaOps},
    rsv::ReservationRoot,
    superblock::{write_superblock, Superblock},
};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};

/// ext2 文件系统（块分配器视角）
///
/// `D: BlockDevice + Send` 时 `Ext2Fs<D>` 可以在线程之间共享，
/// 所有分配和释放都只需要 `&self`；同一 inode 的并发由调用者
/// 持有的 `&mut Ext2Inode` 排除。
///
/// # 示例
///
/// ```rust,ignore
/// use ext2_balloc::{Ext2Fs, FsConfig, Ext2Inode, Credentials, AllocFlags};
///
/// let fs = Ext2Fs::mount(device, FsConfig::default())?;
/// let mut inode = Ext2Inode::new(12, 0o100644, 1000, 1000);
/// fs.init_block_alloc_info(&mut inode);
///
/// let mut count = 8;
/// let first = fs.new_blocks(&mut inode, 0, &mut count, AllocFlags::empty(), &Credentials::root())?;
/// fs.free_blocks(&mut inode, first, count as u64)?;
/// fs.discard_reservation(&mut inode)?;
/// let device = fs.unmount()?;
/// ```
pub struct Ext2Fs<D: BlockDevice> {
    pub(crate) bdev: BlockDev<D>,
    pub(crate) sb: Superblock,
    pub(crate) groups: Vec<BlockGroupRef>,
    pub(crate) rsv_root: ReservationRoot,
    /// 文件系统级空闲块计数（`s_freeblocks_counter`）
    pub(crate) free_blocks: AtomicU64,
    /// 写回磁盘的 `s_state`
    state: AtomicU16,
    /// 挂载时的状态，卸载时恢复（`s_mount_state`）
    mount_state: AtomicU16,
    read_only: AtomicBool,
    ro_mount: bool,
    pub(crate) mount_flags: MountFlags,
    errors: ErrorsBehavior,
    pub(crate) resuid: u32,
    pub(crate) resgid: u32,
    pub(crate) quota: Box<dyn QuotaOps>,
}

impl<D: BlockDevice> Ext2Fs<D> {
    /// 挂载文件系统（不使用配额）
    pub fn mount(device: D, config: FsConfig) -> Result<Self> {
        Self::mount_with_quota(device, config, Box::new(NoQuota))
    }

    /// 挂载文件系统
    ///
    /// 对应内核 `ext2_fill_super()` 中与块分配相关的部分：
    ///
    /// 1. 读取并验证 superblock，设置缓存块大小
    /// 2. 读入全部块组描述符（描述符表块在挂载期间常驻缓存）并验证
    /// 3. 由描述符汇总空闲块计数，创建保留窗口树
    /// 4. 读写挂载时清除 superblock 的 VALID 位
    ///
    /// # 参数
    ///
    /// * `device` - 块设备
    /// * `config` - 挂载配置
    /// * `quota` - 配额实现
    pub fn mount_with_quota(device: D, config: FsConfig, quota: Box<dyn QuotaOps>) -> Result<Self> {
        let mut bdev = BlockDev::new_with_cache(device, config.bcache_size as usize)?;
        let sb = Superblock::load(&bdev)?;
        bdev.set_block_size(sb.block_size())?;

        if bdev.total_blocks() < sb.blocks_count() {
            log::error!(
                "[EXT2-fs] filesystem has {} blocks, device only {}",
                sb.blocks_count(),
                bdev.total_blocks()
            );
            return Err(Error::new(
                ErrorKind::Corrupted,
                "Filesystem larger than device",
            ));
        }

        let mut groups = Vec::with_capacity(sb.groups_count() as usize);
        for bgid in 0..sb.groups_count() {
            let group = BlockGroupRef::load(&bdev, &sb, bgid)?;
            group.snapshot().check(&sb)?;
            groups.push(group);
        }
        let free: u64 = groups.iter().map(|g| g.free_blocks_count() as u64).sum();

        let mount_state = sb.state();
        if mount_state & EXT2_VALID_FS == 0 {
            log::warn!("[EXT2-fs] mounting unchecked fs, running e2fsck is recommended");
        } else if mount_state & EXT2_ERROR_FS != 0 {
            log::warn!("[EXT2-fs] mounting fs with errors, running e2fsck is recommended");
        }

        let ro_mount = config.read_only || bdev.is_read_only();
        let errors = config
            .errors
            .unwrap_or_else(|| ErrorsBehavior::from_raw(sb.errors()));
        let resuid = config.resuid.unwrap_or_else(|| sb.def_resuid());
        let resgid = config.resgid.unwrap_or_else(|| sb.def_resgid());

        let fs = Self {
            bdev,
            state: AtomicU16::new(mount_state),
            mount_state: AtomicU16::new(mount_state),
            read_only: AtomicBool::new(ro_mount),
            ro_mount,
            mount_flags: config.mount_flags,
            errors,
            resuid,
            resgid,
            groups,
            rsv_root: ReservationRoot::new(),
            free_blocks: AtomicU64::new(free),
            sb,
            quota,
        };

        if !ro_mount {
            fs.state.fetch_and(!EXT2_VALID_FS, Ordering::AcqRel);
            fs.write_super()?;
        }

        log::info!(
            "[EXT2-fs] mounted: {} blocks of {} bytes, {} groups, {} free, reservation={}",
            fs.sb.blocks_count(),
            fs.sb.block_size(),
            fs.sb.groups_count(),
            free,
            fs.mount_flags.contains(MountFlags::RESERVATION)
        );
        Ok(fs)
    }

    /// 写回 superblock 和所有脏块
    ///
    /// 对应内核的 `ext2_sync_fs()`：空闲块数由描述符重新汇总。
    pub fn sync(&self) -> Result<()> {
        if self.ro_mount {
            return Ok(());
        }
        self.bdev.flush_all()?;
        self.write_super()
    }

    /// 卸载文件系统并取回设备
    ///
    /// 对应内核的 `ext2_put_super()`：恢复挂载时的状态（保留错误位）。
    pub fn unmount(self) -> Result<D> {
        if !self.ro_mount {
            let mount_state = self.mount_state.load(Ordering::Acquire);
            self.state.store(mount_state, Ordering::Release);
            self.bdev.flush_all()?;
            self.write_super()?;
        }
        log::info!("[EXT2-fs] unmounted");
        Ok(self.bdev.into_inner())
    }

    fn write_super(&self) -> Result<()> {
        let bytes = self
            .sb
            .encode(self.count_free_blocks(), self.state.load(Ordering::Acquire))?;
        write_superblock(&self.bdev, &bytes)
    }

    /// 报告文件系统错误
    ///
    /// 对应内核的 `ext2_error()`：以 error 级别记录，在 superblock 中
    /// 置错误位，然后按 `errors=` 策略继续、转为只读或 panic。
    pub fn ext2_error(&self, function: &str, args: fmt::Arguments<'_>) {
        log::error!("[EXT2-fs] error: {}: {}", function, args);

        if !self.ro_mount {
            self.mount_state.fetch_or(EXT2_ERROR_FS, Ordering::AcqRel);
            self.state.fetch_or(EXT2_ERROR_FS, Ordering::AcqRel);
            if let Err(e) = self.write_super() {
                log::error!("[EXT2-fs] failed to record error state: {}", e);
            }
        }

        match self.errors {
            ErrorsBehavior::Continue => {}
            ErrorsBehavior::RemountRo => {
                if !self.read_only.swap(true, Ordering::AcqRel) {
                    log::error!("[EXT2-fs] remounting filesystem read-only");
                }
            }
            ErrorsBehavior::Panic => panic!("EXT2-fs: panic from previous error"),
        }
    }

    /// 当前是否只读
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    /// 当前 superblock 状态位
    pub fn state(&self) -> u16 {
        self.state.load(Ordering::Acquire)
    }

    /// 是否记录过文件系统错误
    pub fn has_errors(&self) -> bool {
        self.state() & EXT2_ERROR_FS != 0
    }

    /// 拒绝只读挂载上的修改
    pub(crate) fn check_writable(&self) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::new(ErrorKind::ReadOnly, "Filesystem is read-only"));
        }
        Ok(())
    }

    /// 获取 superblock
    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    /// 获取块设备
    pub fn block_device(&self) -> &BlockDev<D> {
        &self.bdev
    }

    /// 挂载选项
    pub fn mount_flags(&self) -> MountFlags {
        self.mount_flags
    }

    /// 出错行为
    pub fn errors_behavior(&self) -> ErrorsBehavior {
        self.errors
    }

    /// 挂载级保留窗口根
    pub fn reservation_root(&self) -> &ReservationRoot {
        &self.rsv_root
    }

    /// 块组引用
    pub fn block_group(&self, bgid: u32) -> Option<&BlockGroupRef> {
        self.groups.get(bgid as usize)
    }

    /// 文件系统统计信息
    ///
    /// 对应内核的 `ext2_statfs()` 中与块相关的字段
    pub fn statfs(&self) -> StatFs {
        let free = self.free_blocks.load(Ordering::Acquire);
        let free_inodes = self
            .groups
            .iter()
            .map(|g| g.snapshot().get_free_inodes_count())
            .sum();
        StatFs {
            block_size: self.sb.block_size(),
            blocks_count: self.sb.blocks_count(),
            free_blocks_count: free,
            available_blocks: free.saturating_sub(self.sb.r_blocks_count()),
            inodes_count: self.sb.inner().inodes_count,
            free_inodes_count: free_inodes,
            groups_count: self.sb.groups_count(),
        }
    }
}

impl<D: BlockDevice> fmt::Debug for Ext2Fs<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ext2Fs")
            .field("blocks_count", &self.sb.blocks_count())
            .field("groups_count", &self.sb.groups_count())
            .field("free_blocks", &self.free_blocks.load(Ordering::Relaxed))
            .field("read_only", &self.is_read_only())
            .finish()
    }
}
