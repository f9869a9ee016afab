//! 跨块组的块分配
//!
//! 对应内核的 `ext2_new_blocks()`。先在目标块组按目标偏移分配，
//! 失败后从下一个块组起轮询所有块组；带保留窗口的一轮全部失败时，
//! 关闭保留窗口从目标块组重新来一轮。

use super::helpers::clamp_goal;
use crate::{
    block::BlockDevice,
    consts::GLOBAL_ROOT_GID,
    error::{Error, ErrorKind, Result},
    fs::{AllocFlags, Credentials, Ext2Fs, MountFlags},
    inode::Ext2Inode,
    rsv::ReserveWindowNode,
};
use core::sync::atomic::Ordering;

impl<D: BlockDevice> Ext2Fs<D> {
    /// 为 inode 分配一段连续的块
    ///
    /// 对应内核的 `ext2_new_blocks()`
    ///
    /// # 参数
    ///
    /// * `inode` - 属主 inode
    /// * `goal` - 目标块号（越界时从数据区起点开始）
    /// * `count` - 输入请求的块数，成功时输出实际分配的块数（可能更少）
    /// * `flags` - 分配标志
    /// * `cred` - 调用者身份（决定能否使用保留块）
    ///
    /// # 返回
    ///
    /// 成功返回第一个块的块号
    ///
    /// # 错误
    ///
    /// - `ReadOnly` - 只读挂载
    /// - `QuotaExceeded` - 配额不足
    /// - `NoSpace` - 没有可用块，或请求超过文件系统的空闲块总数
    /// - `Io` - 读取位图失败
    ///
    /// 任何失败都会退回本次预扣的全部配额。
    pub fn new_blocks(
        &self,
        inode: &mut Ext2Inode,
        goal: u64,
        count: &mut u32,
        flags: AllocFlags,
        cred: &Credentials,
    ) -> Result<u64> {
        if *count == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "Zero-length allocation"));
        }
        self.check_writable()?;

        let requested = *count;
        self.quota.alloc_block(inode, requested as u64)?;

        // 有分配信息、未要求跳过、且窗口宽度非零时才使用保留窗口
        let my_rsv = if flags.contains(AllocFlags::NORESERVE) {
            None
        } else {
            inode
                .block_alloc_info_mut()
                .map(|info| &mut info.rsv_window_node)
                .filter(|node| node.goal_size > 0)
        };

        match self.alloc_from_groups(my_rsv, goal, count, cred) {
            Ok(block) => {
                if *count < requested {
                    self.quota.free_block(inode, (requested - *count) as u64);
                }
                inode.add_blocks(*count as u64);
                log::debug!(
                    "[BALLOC] inode {}: allocated {} blocks at {} (goal {}, asked {})",
                    inode.ino(),
                    *count,
                    block,
                    goal,
                    requested
                );
                Ok(block)
            }
            Err(e) => {
                self.quota.free_block(inode, requested as u64);
                log::debug!(
                    "[BALLOC] inode {}: allocation of {} blocks failed: {}",
                    inode.ino(),
                    requested,
                    e
                );
                Err(e)
            }
        }
    }

    /// 分配单个块
    ///
    /// 对应内核的 `ext2_new_block()`
    pub fn new_block(&self, inode: &mut Ext2Inode, goal: u64, cred: &Credentials) -> Result<u64> {
        let mut count = 1;
        self.new_blocks(inode, goal, &mut count, AllocFlags::empty(), cred)
    }

    /// 是否允许调用者继续分配
    ///
    /// 对应内核的 `ext2_has_free_blocks()`：空闲块降到保留块数时，
    /// 只有持有 `CAP_SYS_RESOURCE`、fsuid 等于 resuid、或属于 resgid
    /// （resgid 不是 root 组）的调用者可以继续。
    pub fn has_free_blocks(&self, cred: &Credentials) -> bool {
        let free = self.free_blocks.load(Ordering::Acquire);
        let root_blocks = self.sb.r_blocks_count();

        !(free < root_blocks + 1
            && !cred.cap_sys_resource
            && cred.fsuid != self.resuid
            && (self.resgid == GLOBAL_ROOT_GID || !cred.in_group(self.resgid)))
    }

    fn alloc_from_groups(
        &self,
        mut my_rsv: Option<&mut ReserveWindowNode>,
        goal: u64,
        count: &mut u32,
        cred: &Credentials,
    ) -> Result<u64> {
        let mut windowsz = my_rsv.as_ref().map_or(0, |node| node.goal_size);

        if !self.has_free_blocks(cred) {
            return Err(Error::new(ErrorKind::NoSpace, "Reserved blocks only"));
        }
        if *count as u64 > self.free_blocks.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::NoSpace, "Not enough free blocks"));
        }

        let goal = clamp_goal(&self.sb, goal);
        let (goal_group, grp_target) = self.sb.block_group_of(goal);
        let ngroups = self.sb.groups_count();
        let mut group_no = goal_group;
        let mut num = *count;

        loop {
            // 第一步：目标块组，按目标偏移分配
            let mut found = None;
            let free = self.group_ref(group_no)?.free_blocks_count();

            // 块组剩余不够一个窗口时，本次不申请新窗口
            if my_rsv
                .as_ref()
                .is_some_and(|node| free < windowsz && free > 0 && node.is_empty())
            {
                my_rsv = None;
            }

            if free > 0 {
                let bitmap = self.read_block_bitmap(group_no)?;
                if let Some(blk) = self.try_to_allocate_with_rsv(
                    group_no,
                    &bitmap,
                    Some(grp_target),
                    my_rsv.as_deref_mut(),
                    &mut num,
                )? {
                    found = Some((bitmap, blk));
                }
            }

            // 第二步：从下一个块组起轮询，不带目标
            if found.is_none() {
                for _ in 0..ngroups {
                    group_no = (group_no + 1) % ngroups;
                    let free = self.group_ref(group_no)?.free_blocks_count();
                    if free == 0 {
                        continue;
                    }
                    // 保留窗口下跳过所剩无几的块组，避免切碎最后的空闲区
                    if my_rsv.is_some() && free <= windowsz / 2 {
                        continue;
                    }
                    let bitmap = self.read_block_bitmap(group_no)?;
                    if let Some(blk) = self.try_to_allocate_with_rsv(
                        group_no,
                        &bitmap,
                        None,
                        my_rsv.as_deref_mut(),
                        &mut num,
                    )? {
                        found = Some((bitmap, blk));
                        break;
                    }
                }
            }

            let Some((bitmap, grp_alloc_blk)) = found else {
                // 第三步：关闭保留窗口，从目标块组重新来一轮
                if my_rsv.is_some() {
                    log::debug!("[BALLOC] retrying without reservation from group {}", goal_group);
                    my_rsv = None;
                    windowsz = 0;
                    group_no = goal_group;
                    continue;
                }
                return Err(Error::new(ErrorKind::NoSpace, "No free blocks"));
            };

            let ret_block = self.sb.group_first_block(group_no) + grp_alloc_blk as u64;
            let desc = self.group_ref(group_no)?.snapshot();

            // 位图损坏时分配结果可能落在元数据或卷外；这些位已被置上，
            // 保持置位并重新查找
            if desc.overlaps_metadata(&self.sb, ret_block, num as u64) {
                self.ext2_error(
                    "ext2_new_blocks",
                    format_args!(
                        "Allocating block in system zone - blocks from {}, length {}",
                        ret_block, num
                    ),
                );
                num = *count;
                continue;
            }
            if ret_block + num as u64 > self.sb.blocks_count() {
                self.ext2_error(
                    "ext2_new_blocks",
                    format_args!(
                        "block({}) >= blocks count({}) - block_group = {}",
                        ret_block + num as u64 - 1,
                        self.sb.blocks_count(),
                        group_no
                    ),
                );
                num = *count;
                continue;
            }

            self.group_ref(group_no)?.adjust_free_blocks(-(num as i64))?;
            self.sub_free_counter(num as u64);
            bitmap.mark_dirty();
            if self.mount_flags.contains(MountFlags::SYNC) {
                if let Err(e) = self.bdev.sync_dirty_buffer(bitmap.buffer()) {
                    log::warn!("[BALLOC] group {}: bitmap sync failed: {}", group_no, e);
                }
            }

            *count = num;
            return Ok(ret_block);
        }
    }

    pub(crate) fn sub_free_counter(&self, n: u64) {
        let _ = self
            .free_blocks
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |free| {
                Some(free.saturating_sub(n))
            });
    }

    pub(crate) fn add_free_counter(&self, n: u64) {
        self.free_blocks.fetch_add(n, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FsConfig;
    use crate::quota::BlockLimitQuota;
    use crate::rsv::{alloc_new_reservation, ReserveWindow};
    use crate::test_utils::{
        format_device, mount_layout, mount_small, reg_inode, small_layout, wide_layout,
        MockDevice,
    };
    use alloc::boxed::Box;
    use alloc::sync::Arc;
    use alloc::vec::Vec;

    fn bitmaps(fs: &Ext2Fs<MockDevice>) -> Vec<Vec<u8>> {
        (0..fs.superblock().groups_count())
            .map(|g| fs.read_block_bitmap(g).unwrap().snapshot())
            .collect()
    }

    fn group_free(fs: &Ext2Fs<MockDevice>) -> Vec<u32> {
        (0..fs.superblock().groups_count())
            .map(|g| fs.group_desc(g).unwrap().get_free_blocks_count())
            .collect()
    }

    /// 不带保留窗口占满块组 `group`
    fn fill_group(fs: &Ext2Fs<MockDevice>, group: u32) {
        let mut filler = reg_inode(99);
        let mut count = fs.group_desc(group).unwrap().get_free_blocks_count();
        let goal = fs.superblock().group_first_block(group);
        let cred = Credentials::root();
        fs.new_blocks(&mut filler, goal, &mut count, AllocFlags::NORESERVE, &cred)
            .unwrap();
        assert_eq!(fs.group_desc(group).unwrap().get_free_blocks_count(), 0);
    }

    #[test]
    fn test_allocates_goal_in_free_group() {
        let fs = mount_layout(wide_layout(), FsConfig::default());
        let first = fs.superblock().group_first_block(1);
        let goal = first + 500;
        let before = fs.group_desc(1).unwrap().get_free_blocks_count();
        let mut inode = reg_inode(12);

        let block = fs.new_block(&mut inode, goal, &Credentials::root()).unwrap();
        assert_eq!(block, goal);
        assert!(fs.read_block_bitmap(1).unwrap().test_bit(500));
        assert_eq!(fs.group_desc(1).unwrap().get_free_blocks_count(), before - 1);
        assert_eq!(inode.blocks(), 1);
    }

    #[test]
    fn test_skips_full_groups() {
        let fs = mount_small(FsConfig::default());
        fill_group(&fs, 0);
        fill_group(&fs, 1);

        let mut inode = reg_inode(12);
        fs.init_block_alloc_info(&mut inode);
        let block = fs.new_block(&mut inode, 10, &Credentials::root()).unwrap();

        let sb = fs.superblock();
        assert!(block >= sb.group_first_block(2) && block <= sb.group_last_block(2));
        let (group, _) = sb.block_group_of(block);
        assert_eq!(group, 2);
    }

    #[test]
    fn test_allocates_inside_existing_window() {
        let fs = mount_layout(wide_layout(), FsConfig::default());
        let mut inode = reg_inode(12);
        fs.init_block_alloc_info(&mut inode);
        fs.set_rsv_window_size(&mut inode, 64, &Credentials::root()).unwrap();

        // 预先放好窗口 [100, 163]
        let bitmap = fs.read_block_bitmap(0).unwrap();
        let node = &mut inode.block_alloc_info_mut().unwrap().rsv_window_node;
        assert!(alloc_new_reservation(fs.reservation_root(), node, Some(99), 1, 8192, &bitmap).unwrap());
        assert_eq!(node.window(), ReserveWindow { start: 100, end: 163 });

        let mut count = 5;
        let block = fs
            .new_blocks(&mut inode, 120, &mut count, AllocFlags::empty(), &Credentials::root())
            .unwrap();
        assert_eq!(block, 120);
        assert_eq!(count, 5);
        for bit in 119..124 {
            assert!(bitmap.test_bit(bit));
        }
        assert!(!bitmap.test_bit(124));

        let node = &inode.block_alloc_info().unwrap().rsv_window_node;
        assert_eq!(node.alloc_hit, 5);
        assert_eq!(node.window(), ReserveWindow { start: 100, end: 163 });
    }

    #[test]
    fn test_request_beyond_free_total_changes_nothing() {
        let quota = Arc::new(BlockLimitQuota::new(u64::MAX));
        let dev = format_device(small_layout()).into_inner();
        let fs = Ext2Fs::mount_with_quota(dev, FsConfig::default(), Box::new(quota.clone())).unwrap();

        let before_bits = bitmaps(&fs);
        let before_free = group_free(&fs);
        let mut inode = reg_inode(12);
        fs.init_block_alloc_info(&mut inode);

        let mut count = fs.count_free_blocks() as u32 + 1;
        let err = fs
            .new_blocks(&mut inode, 0, &mut count, AllocFlags::empty(), &Credentials::root())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoSpace);
        assert_eq!(bitmaps(&fs), before_bits);
        assert_eq!(group_free(&fs), before_free);
        assert_eq!(quota.used(), 0);
        assert_eq!(inode.blocks(), 0);
        assert!(fs.reservation_root().lock().is_empty());
    }

    #[test]
    fn test_neighbouring_inodes_get_disjoint_windows() {
        let fs = mount_small(FsConfig::default());
        let goal = fs.superblock().group_first_block(1) + 200;
        let cred = Credentials::root();

        let mut a = reg_inode(12);
        let mut b = reg_inode(13);
        fs.init_block_alloc_info(&mut a);
        fs.init_block_alloc_info(&mut b);

        let ba = fs.new_block(&mut a, goal, &cred).unwrap();
        let bb = fs.new_block(&mut b, goal + 3, &cred).unwrap();
        assert_eq!(ba, goal);
        assert_ne!(ba, bb);

        let wa = a.block_alloc_info().unwrap().rsv_window_node.window();
        let wb = b.block_alloc_info().unwrap().rsv_window_node.window();
        assert_eq!(wa, ReserveWindow { start: goal, end: goal + 7 });
        assert!(wb.start > wa.end);
        assert!(wb.contains(bb));

        let tree = fs.reservation_root().lock();
        assert_eq!(tree.len(), 2);
        tree.dump(false).unwrap();
    }

    #[test]
    fn test_partial_allocation_releases_quota() {
        let quota = Arc::new(BlockLimitQuota::new(100));
        let dev = format_device(small_layout()).into_inner();
        let fs = Ext2Fs::mount_with_quota(dev, FsConfig::default(), Box::new(quota.clone())).unwrap();
        let cred = Credentials::root();
        let goal = fs.superblock().group_first_block(1) + 300;

        let mut blocker = reg_inode(12);
        let mut one = 1;
        fs.new_blocks(&mut blocker, goal + 3, &mut one, AllocFlags::NORESERVE, &cred)
            .unwrap();

        let mut inode = reg_inode(13);
        let mut count = 10;
        let block = fs
            .new_blocks(&mut inode, goal, &mut count, AllocFlags::NORESERVE, &cred)
            .unwrap();
        assert_eq!(block, goal);
        assert_eq!(count, 3);
        assert_eq!(inode.blocks(), 3);
        assert_eq!(quota.used(), 4);
    }

    #[test]
    fn test_quota_exceeded_touches_nothing() {
        let quota = Arc::new(BlockLimitQuota::new(4));
        let dev = format_device(small_layout()).into_inner();
        let fs = Ext2Fs::mount_with_quota(dev, FsConfig::default(), Box::new(quota.clone())).unwrap();
        let before = bitmaps(&fs);

        let mut inode = reg_inode(12);
        let mut count = 5;
        let err = fs
            .new_blocks(&mut inode, 0, &mut count, AllocFlags::empty(), &Credentials::root())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
        assert_eq!(count, 5);
        assert_eq!(bitmaps(&fs), before);
        assert_eq!(quota.used(), 0);
    }

    #[test]
    fn test_bitmap_read_error_releases_quota() {
        let quota = Arc::new(BlockLimitQuota::new(100));
        let dev = format_device(small_layout()).into_inner();
        let fs = Ext2Fs::mount_with_quota(dev, FsConfig::default(), Box::new(quota.clone())).unwrap();
        let blk = fs.group_desc(0).unwrap().get_block_bitmap();
        fs.block_device().with_device(|d| d.fail_reads_of_block(blk));
        let free = fs.count_free_blocks();

        let mut inode = reg_inode(12);
        let err = fs.new_block(&mut inode, 100, &Credentials::root()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(quota.used(), 0);
        assert_eq!(fs.count_free_blocks(), free);
        assert_eq!(inode.blocks(), 0);
    }

    #[test]
    fn test_reserved_blocks_policy() {
        let mut opts = small_layout();
        opts.r_blocks_count = 4096;
        let dev = format_device(opts).into_inner();
        let config = FsConfig { resgid: Some(50), ..FsConfig::default() };
        let fs = Ext2Fs::mount(dev, config).unwrap();
        let user = Credentials::user(1000, 1000);

        let mut inode = reg_inode(12);
        assert!(!fs.has_free_blocks(&user));
        let err = fs.new_block(&mut inode, 0, &user).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoSpace);

        // 持有 CAP_SYS_RESOURCE 的 root 可以使用保留块
        fs.new_block(&mut inode, 0, &Credentials::root()).unwrap();

        // resgid 中的成员也可以
        let mut member = Credentials::user(1000, 1000);
        member.groups.push(50);
        fs.new_block(&mut inode, 0, &member).unwrap();
        assert_eq!(inode.blocks(), 2);
    }

    #[test]
    fn test_resuid_may_use_reserved_blocks() {
        let mut opts = small_layout();
        opts.r_blocks_count = 4096;
        let dev = format_device(opts).into_inner();
        let config = FsConfig { resuid: Some(1000), ..FsConfig::default() };
        let fs = Ext2Fs::mount(dev, config).unwrap();

        let mut inode = reg_inode(12);
        fs.new_block(&mut inode, 0, &Credentials::user(1000, 1000)).unwrap();
        assert!(fs.new_block(&mut inode, 0, &Credentials::user(1001, 1000)).is_err());
    }

    #[test]
    fn test_read_only_mount_rejects() {
        let config = FsConfig { read_only: true, ..FsConfig::default() };
        let fs = mount_small(config);
        let mut inode = reg_inode(12);
        let err = fs.new_block(&mut inode, 0, &Credentials::root()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadOnly);
    }

    #[test]
    fn test_system_zone_result_is_retried() {
        let bdev = format_device(small_layout());
        let mut dev = bdev.into_inner();
        // 组 1 的位图在块 1027，清掉 inode 表第一块（组内偏移 4）的位
        dev.storage_mut()[1027 * 1024] &= !(1 << 4);
        let fs = Ext2Fs::mount(dev, FsConfig::default()).unwrap();
        let first = fs.superblock().group_first_block(1);
        let before = fs.group_desc(1).unwrap().get_free_blocks_count();

        let mut inode = reg_inode(12);
        let block = fs.new_block(&mut inode, first + 4, &Credentials::root()).unwrap();
        assert!(fs.has_errors());
        let desc = fs.group_desc(1).unwrap();
        assert!(!desc.overlaps_metadata(fs.superblock(), block, 1));
        assert_eq!(block, first + 20);
        // 元数据位保持置位，描述符只记一块
        assert!(fs.read_block_bitmap(1).unwrap().test_bit(4));
        assert_eq!(desc.get_free_blocks_count(), before - 1);
    }

    #[test]
    fn test_falls_back_to_plain_allocation() {
        let fs = mount_small(FsConfig::default());
        let cred = Credentials::root();
        fill_group(&fs, 0);
        // 其余块组只剩不到半个窗口
        for g in 1..4 {
            let mut filler = reg_inode(90 + g);
            let mut count = 600;
            let goal = fs.superblock().group_first_block(g);
            fs.new_blocks(&mut filler, goal, &mut count, AllocFlags::NORESERVE, &cred)
                .unwrap();
        }

        let mut inode = reg_inode(12);
        fs.init_block_alloc_info(&mut inode);
        fs.set_rsv_window_size(&mut inode, 1027, &cred).unwrap();
        let block = fs.new_block(&mut inode, 10, &cred).unwrap();

        assert_eq!(fs.superblock().block_group_of(block).0, 1);
        assert!(inode.block_alloc_info().unwrap().rsv_window_node.is_empty());
        assert!(fs.reservation_root().lock().is_empty());
    }

    #[test]
    fn test_hot_window_doubles() {
        let fs = mount_small(FsConfig::default());
        let cred = Credentials::root();
        let goal = fs.superblock().group_first_block(2) + 100;
        let mut inode = reg_inode(12);
        fs.init_block_alloc_info(&mut inode);

        for i in 0..9 {
            let block = fs.new_block(&mut inode, goal + i, &cred).unwrap();
            assert_eq!(block, goal + i);
        }
        let node = &inode.block_alloc_info().unwrap().rsv_window_node;
        assert_eq!(node.goal_size, 16);
        assert_eq!(node.window(), ReserveWindow { start: goal + 8, end: goal + 23 });
        assert_eq!(node.alloc_hit, 1);
    }

    #[test]
    fn test_noreserve_leaves_window_alone() {
        let fs = mount_small(FsConfig::default());
        let mut inode = reg_inode(12);
        fs.init_block_alloc_info(&mut inode);

        let mut count = 4;
        fs.new_blocks(&mut inode, 300, &mut count, AllocFlags::NORESERVE, &Credentials::root())
            .unwrap();
        assert!(inode.block_alloc_info().unwrap().rsv_window_node.is_empty());
        assert!(fs.reservation_root().lock().is_empty());
    }

    #[test]
    fn test_sync_mount_writes_bitmap() {
        let config = FsConfig {
            mount_flags: MountFlags::RESERVATION | MountFlags::SYNC,
            ..FsConfig::default()
        };
        let fs = mount_small(config);
        let mut inode = reg_inode(12);
        let block = fs.new_block(&mut inode, 500, &Credentials::root()).unwrap();

        let bitmap = fs.read_block_bitmap(0).unwrap();
        assert!(!bitmap.buffer().is_dirty());
        let bitmap_blk = fs.group_desc(0).unwrap().get_block_bitmap();
        let bit = (block - 1) as usize;
        let on_disk = fs
            .block_device()
            .with_device(|d| d.storage()[bitmap_blk as usize * 1024 + bit / 8]);
        assert_ne!(on_disk & (1 << (bit % 8)), 0);
    }

    #[test]
    fn test_concurrent_allocation_is_disjoint() {
        let fs = Arc::new(mount_small(FsConfig::default()));
        let initial = fs.count_free_blocks();

        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let fs = Arc::clone(&fs);
                std::thread::spawn(move || {
                    let cred = Credentials::root();
                    let mut inode = reg_inode(20 + t);
                    fs.init_block_alloc_info(&mut inode);
                    let mut runs = Vec::new();
                    let mut goal = 0;
                    for i in 0..40u32 {
                        let mut count = 1 + (i + t) % 4;
                        let block = fs
                            .new_blocks(&mut inode, goal, &mut count, AllocFlags::empty(), &cred)
                            .unwrap();
                        runs.push((block, count as u64));
                        goal = block + count as u64;
                    }
                    fs.discard_reservation(&mut inode).unwrap();
                    runs
                })
            })
            .collect();

        let mut runs: Vec<(u64, u64)> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        runs.sort();
        for pair in runs.windows(2) {
            assert!(pair[0].0 + pair[0].1 <= pair[1].0, "overlap: {:?}", pair);
        }

        let total: u64 = runs.iter().map(|r| r.1).sum();
        assert_eq!(fs.count_free_blocks(), initial - total);
        assert!(fs.reservation_root().lock().is_empty());
        let report = fs.check_free_blocks().unwrap();
        assert!(report.mismatches.is_empty());
        assert_eq!(report.bitmap_total, report.desc_total);
    }
}
