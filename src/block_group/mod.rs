//! 块组操作模块
//!
//! 这个模块提供 ext2 块组描述符的定位、解码、验证和写回。
//! 挂载期间每个块组的描述符副本由 [`BlockGroupRef`] 持有，
//! 所有修改都写穿到缓存中的描述符表块。

mod read;
mod write;

pub use read::*;
pub use write::*;
