//! 挂载上下文
//!
//! 这个模块提供 [`Ext2Fs`]（一个挂载点的全部分配器状态）、挂载配置、
//! 调用者身份以及创建新映像的 [`format`]。

mod filesystem;
mod format;
mod types;

pub use filesystem::Ext2Fs;
pub use format::{format, FormatOptions};
pub use types::{
    AllocFlags, Credentials, ErrorsBehavior, FsConfig, MountFlags, StatFs,
};
