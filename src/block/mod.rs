//! 块设备抽象
//!
//! 提供块设备接口和块级 I/O 操作：
//!
//! - `device`：设备 trait、包装器以及绕过缓存的直接字节读写
//! - `io`：经过 buffer cache 的 getblk / bread / sync_dirty_buffer / flush_all

mod device;
mod io;

pub use device::{BlockDevice, BlockDev};
