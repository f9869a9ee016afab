//! 块位图
//!
//! - `ops`：位图基本操作（测试、设置、清除、查找零位、统计）
//! - `search`：带近目标快速路径的空闲位扫描器
//! - `atomic`：以缓存块数据锁为块组位锁的位图包装

pub mod ops;
mod search;
mod atomic;

pub use atomic::BitmapBuffer;
pub use search::{bitmap_search_next_usable_block, find_next_usable_block};
