//! inode 的保留窗口管理
//!
//! 对应内核的 `ext2_init_block_alloc_info()`、`ext2_discard_reservation()`
//! 以及 `EXT2_IOC_SETRSVSZ` / `EXT2_IOC_GETRSVSZ`。

use crate::{
    block::BlockDevice,
    consts::{EXT2_DEFAULT_RESERVE_BLOCKS, EXT2_MAX_RESERVE_BLOCKS},
    error::{Error, ErrorKind, Result},
    fs::{Credentials, Ext2Fs, MountFlags},
    inode::{BlockAllocInfo, Ext2Inode},
};

impl<D: BlockDevice> Ext2Fs<D> {
    /// 为 inode 创建块分配信息
    ///
    /// 窗口为空；挂载启用保留窗口时宽度取默认值，否则为 0（不使用窗口）。
    pub fn init_block_alloc_info(&self, inode: &mut Ext2Inode) {
        let goal_size = if self.mount_flags.contains(MountFlags::RESERVATION) {
            EXT2_DEFAULT_RESERVE_BLOCKS
        } else {
            0
        };
        inode.set_block_alloc_info(BlockAllocInfo::new(inode.ino(), goal_size));
    }

    /// 丢弃 inode 的保留窗口
    ///
    /// 在文件关闭、截断和 inode 回收时调用。没有窗口时什么也不做。
    pub fn discard_reservation(&self, inode: &mut Ext2Inode) -> Result<()> {
        let Some(info) = inode.block_alloc_info_mut() else {
            return Ok(());
        };
        let node = &mut info.rsv_window_node;
        if node.is_empty() {
            return Ok(());
        }

        let window = node.window();
        if let Err(e) = self.rsv_root.lock().remove(node) {
            self.ext2_error(
                "ext2_discard_reservation",
                format_args!(
                    "window [{}, {}] of inode {} not in tree",
                    window.start,
                    window.end,
                    node.owner()
                ),
            );
            return Err(e);
        }
        log::trace!(
            "[RSV] inode {} discarded window [{}, {}]",
            inode.ino(),
            window.start,
            window.end
        );
        Ok(())
    }

    /// 设置 inode 的期望窗口宽度
    ///
    /// 只对保留窗口挂载上的普通文件有效；调用者必须是属主或持有
    /// `CAP_FOWNER`。超过上限的值被截断，宽度 0 关闭该文件的保留窗口。
    pub fn set_rsv_window_size(
        &self,
        inode: &mut Ext2Inode,
        size: u32,
        cred: &Credentials,
    ) -> Result<()> {
        if !self.mount_flags.contains(MountFlags::RESERVATION) || !inode.is_reg() {
            return Err(Error::new(
                ErrorKind::Unsupported,
                "Reservation not available for this inode",
            ));
        }
        if cred.fsuid != inode.uid() && !cred.cap_fowner {
            return Err(Error::new(ErrorKind::PermissionDenied, "Not the inode owner"));
        }
        self.check_writable()?;

        let size = size.min(EXT2_MAX_RESERVE_BLOCKS);
        if inode.block_alloc_info().is_none() {
            self.init_block_alloc_info(inode);
        }
        if let Some(info) = inode.block_alloc_info_mut() {
            info.rsv_window_node.goal_size = size;
        }
        Ok(())
    }

    /// inode 的期望窗口宽度
    pub fn rsv_window_size(&self, inode: &Ext2Inode) -> Result<u32> {
        match inode.block_alloc_info() {
            Some(info) if self.mount_flags.contains(MountFlags::RESERVATION) && inode.is_reg() => {
                Ok(info.rsv_window_node.goal_size)
            }
            _ => Err(Error::new(
                ErrorKind::Unsupported,
                "Reservation not available for this inode",
            )),
        }
    }
}
