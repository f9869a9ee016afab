//! 创建新的 ext2 映像
//!
//! 只写出分配器需要的结构：superblock（及备份）、块组描述符表（及备份）、
//! 块位图、inode 位图和清零的 inode 表。根目录等文件内容不在此处创建。

use super::types::ErrorsBehavior;
use crate::{
    bitmap::ops::set_bits,
    block::{BlockDev, BlockDevice},
    consts::*,
    error::{Error, ErrorKind, Result},
    superblock::Superblock,
    types::{ext2_group_desc, ext2_sblock},
};
use alloc::vec;
use alloc::vec::Vec;

/// 格式化参数
#[derive(Debug, Clone, Copy)]
pub struct FormatOptions {
    /// 块大小（字节）
    pub block_size: u32,
    /// 总块数，0 表示使用整个设备
    pub blocks_count: u64,
    /// 每组块数，0 表示 `8 * block_size`
    pub blocks_per_group: u32,
    /// 每组 inode 数
    pub inodes_per_group: u32,
    /// inode 大小
    pub inode_size: u16,
    /// 保留块数
    pub r_blocks_count: u32,
    /// 只在 0、1 和 3/5/7 的幂次组放置 superblock 备份
    pub sparse_super: bool,
    /// 出错行为
    pub errors: ErrorsBehavior,
    /// 可以使用保留块的 uid
    pub def_resuid: u16,
    /// 可以使用保留块的 gid
    pub def_resgid: u16,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            block_size: 1024,
            blocks_count: 0,
            blocks_per_group: 0,
            inodes_per_group: 128,
            inode_size: EXT2_GOOD_OLD_INODE_SIZE,
            r_blocks_count: 0,
            sparse_super: true,
            errors: ErrorsBehavior::Continue,
            def_resuid: EXT2_DEF_RESUID,
            def_resgid: EXT2_DEF_RESGID,
        }
    }
}

/// 在设备上创建 ext2 文件系统
///
/// 所有写入都绕过缓存直接落盘，调用后可以立即挂载。
///
/// # 参数
///
/// * `bdev` - 块设备
/// * `opts` - 格式化参数
pub fn format<D: BlockDevice>(bdev: &BlockDev<D>, opts: &FormatOptions) -> Result<()> {
    let bs = opts.block_size;
    if !(EXT2_MIN_BLOCK_SIZE..=EXT2_MAX_BLOCK_SIZE).contains(&bs) || !bs.is_power_of_two() {
        return Err(Error::new(ErrorKind::InvalidInput, "Unsupported block size"));
    }

    let device_blocks = bdev.total_blocks() * bdev.block_size() as u64 / bs as u64;
    let blocks_count = match opts.blocks_count {
        0 => device_blocks,
        n if n > device_blocks => {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Filesystem larger than device",
            ))
        }
        n => n,
    };
    if blocks_count > u32::MAX as u64 {
        return Err(Error::new(ErrorKind::InvalidInput, "Too many blocks for ext2"));
    }

    let bpg = match opts.blocks_per_group {
        0 => bs * 8,
        n => n,
    };
    let first_data_block: u32 = if bs == EXT2_MIN_BLOCK_SIZE { 1 } else { 0 };
    if blocks_count <= first_data_block as u64 {
        return Err(Error::new(ErrorKind::InvalidInput, "Device too small"));
    }
    let groups_count = (blocks_count as u32 - first_data_block).div_ceil(bpg);

    let sblock = ext2_sblock {
        inodes_count: opts.inodes_per_group * groups_count,
        blocks_count: blocks_count as u32,
        r_blocks_count: opts.r_blocks_count,
        first_data_block,
        log_block_size: (bs / EXT2_MIN_BLOCK_SIZE).trailing_zeros(),
        log_frag_size: (bs / EXT2_MIN_BLOCK_SIZE).trailing_zeros(),
        blocks_per_group: bpg,
        frags_per_group: bpg,
        inodes_per_group: opts.inodes_per_group,
        max_mnt_count: -1,
        magic: EXT2_SUPER_MAGIC,
        state: EXT2_VALID_FS,
        errors: opts.errors.to_raw(),
        rev_level: EXT2_DYNAMIC_REV,
        def_resuid: opts.def_resuid,
        def_resgid: opts.def_resgid,
        first_ino: EXT2_GOOD_OLD_FIRST_INO,
        inode_size: opts.inode_size,
        feature_ro_compat: if opts.sparse_super {
            EXT2_FEATURE_RO_COMPAT_SPARSE_SUPER
        } else {
            0
        },
        ..ext2_sblock::default()
    };

    // 借用 Superblock 的几何计算（组边界、备份位置）
    let mut raw = vec![0u8; EXT2_SUPERBLOCK_SIZE];
    sblock.write_to(&mut raw)?;
    let sb = Superblock::from_bytes(raw)?;

    let itb = sb.itb_per_group();
    let bits_per_block = bs * 8;
    if opts.inodes_per_group > bits_per_block {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "inodes_per_group exceeds inode bitmap capacity",
        ));
    }
    let mut descs = Vec::with_capacity(groups_count as usize);

    for g in 0..groups_count {
        let first = sb.group_first_block(g);
        let nblocks = sb.blocks_in_group(g);

        let mut cursor = first;
        if sb.bg_has_super(g) {
            cursor += 1 + sb.bg_num_gdb(g) as u64;
        }
        let block_bitmap = cursor;
        let inode_bitmap = cursor + 1;
        let inode_table = cursor + 2;
        let overhead = (inode_table + itb as u64 - first) as u32;
        if overhead >= nblocks {
            log::error!(
                "[FORMAT] group {}: {} metadata blocks leave no room in {} blocks",
                g,
                overhead,
                nblocks
            );
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Block group too small for its metadata",
            ));
        }

        let mut bitmap = vec![0u8; bs as usize];
        set_bits(&mut bitmap, 0, overhead)?;
        set_bits(&mut bitmap, nblocks, bits_per_block - nblocks)?;
        write_block(bdev, bs, block_bitmap, &bitmap)?;

        let used_inodes = if g == 0 { sb.inner().first_ino() - 1 } else { 0 };
        let mut ibitmap = vec![0u8; bs as usize];
        set_bits(&mut ibitmap, 0, used_inodes)?;
        set_bits(
            &mut ibitmap,
            opts.inodes_per_group,
            bits_per_block - opts.inodes_per_group,
        )?;
        write_block(bdev, bs, inode_bitmap, &ibitmap)?;

        let zero = vec![0u8; bs as usize];
        for blk in inode_table..inode_table + itb as u64 {
            write_block(bdev, bs, blk, &zero)?;
        }

        descs.push(ext2_group_desc {
            block_bitmap: block_bitmap as u32,
            inode_bitmap: inode_bitmap as u32,
            inode_table: inode_table as u32,
            free_blocks_count: (nblocks - overhead) as u16,
            free_inodes_count: (opts.inodes_per_group - used_inodes) as u16,
            used_dirs_count: 0,
        });
    }

    let mut gdt = vec![0u8; (sb.gdb_count() * bs) as usize];
    for (i, desc) in descs.iter().enumerate() {
        let off = i * EXT2_GROUP_DESC_SIZE;
        desc.write_to(&mut gdt[off..off + EXT2_GROUP_DESC_SIZE])?;
    }

    let mut sblock = sblock;
    sblock.free_blocks_count = descs.iter().map(|d| d.free_blocks_count as u32).sum();
    sblock.free_inodes_count = descs.iter().map(|d| d.free_inodes_count as u32).sum();

    for g in 0..groups_count {
        if !sb.bg_has_super(g) {
            continue;
        }
        let first = sb.group_first_block(g);
        bdev.write_bytes_direct((first + 1) * bs as u64, &gdt)?;

        sblock.block_group_nr = g as u16;
        let mut raw = vec![0u8; EXT2_SUPERBLOCK_SIZE];
        sblock.write_to(&mut raw)?;
        // 主 superblock 固定在字节 1024，备份位于组的第一块
        let offset = if g == 0 {
            EXT2_SUPERBLOCK_OFFSET
        } else {
            first * bs as u64
        };
        bdev.write_bytes_direct(offset, &raw)?;
    }
    bdev.with_device(|dev| dev.flush())?;

    log::info!(
        "[FORMAT] {} blocks of {} bytes, {} groups, {} free",
        blocks_count,
        bs,
        groups_count,
        sblock.free_blocks_count
    );
    Ok(())
}

fn write_block<D: BlockDevice>(bdev: &BlockDev<D>, bs: u32, blk: u64, data: &[u8]) -> Result<()> {
    bdev.write_bytes_direct(blk * bs as u64, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::ops::{count_zeros, test_bit};
    use crate::test_utils::{format_device, small_layout, MockDevice};

    #[test]
    fn test_format_small_layout() {
        let bdev = format_device(small_layout());
        let sb = Superblock::load(&bdev).unwrap();
        assert_eq!(sb.groups_count(), 4);
        assert_eq!(sb.first_data_block(), 1);
        assert_eq!(sb.blocks_in_group(3), 1024);
        assert_eq!(sb.itb_per_group(), 16);

        // 组 0：superblock(1) + GDT(2) + 块位图(3) + inode 位图(4) + inode 表(5..21)
        let mut gd = [0u8; EXT2_GROUP_DESC_SIZE];
        bdev.read_bytes_direct(2 * 1024, &mut gd).unwrap();
        let desc = ext2_group_desc::from_bytes(&gd).unwrap();
        assert_eq!(desc.block_bitmap, 3);
        assert_eq!(desc.inode_bitmap, 4);
        assert_eq!(desc.inode_table, 5);
        assert_eq!(desc.free_blocks_count, 1024 - 20);
        assert_eq!(desc.free_inodes_count, 128 - 10);

        let mut bitmap = vec![0u8; 1024];
        bdev.read_bytes_direct(3 * 1024, &mut bitmap).unwrap();
        assert!(test_bit(&bitmap, 19));
        assert!(!test_bit(&bitmap, 20));
        assert_eq!(count_zeros(&bitmap, 0, 1024), 1024 - 20);
        assert_eq!(sb.free_blocks_count(), sb.blocks_count() - 1 - 20 * 3 - 18);
    }

    #[test]
    fn test_sparse_group_without_backup() {
        let mut opts = small_layout();
        opts.blocks_count = 1 + 3 * 1024;
        opts.sparse_super = true;
        let bdev = format_device(opts);
        let sb = Superblock::load(&bdev).unwrap();

        // 组 2 不是 3/5/7 的幂，没有备份
        assert!(!sb.bg_has_super(2));
        let mut gd = [0u8; EXT2_GROUP_DESC_SIZE];
        bdev.read_bytes_direct(2 * 1024 + 2 * EXT2_GROUP_DESC_SIZE as u64, &mut gd)
            .unwrap();
        let desc = ext2_group_desc::from_bytes(&gd).unwrap();
        assert_eq!(desc.block_bitmap as u64, sb.group_first_block(2));
    }

    #[test]
    fn test_backup_superblock_records_group() {
        let bdev = format_device(small_layout());
        let mut raw = vec![0u8; EXT2_SUPERBLOCK_SIZE];
        bdev.read_bytes_direct(1025 * 1024, &mut raw).unwrap();
        let backup = ext2_sblock::from_bytes(&raw).unwrap();
        assert!(backup.is_valid());
        assert_eq!(backup.block_group_nr, 1);
    }

    #[test]
    fn test_format_rejects_tiny_group() {
        let dev = MockDevice::new(1024, 64);
        let bdev = BlockDev::new(dev).unwrap();
        let opts = FormatOptions {
            blocks_per_group: 16,
            ..FormatOptions::default()
        };
        assert_eq!(
            format(&bdev, &opts).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }
}
