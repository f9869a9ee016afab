//! 块保留窗口
//!
//! 每个正在写入的普通文件可以持有一个保留窗口：一段预留给它、
//! 尚未全部分配的连续块区间。同一挂载点上所有窗口按起始块号放在一棵
//! 有序树中，窗口之间两两不重叠。窗口只是"建议"，并不在位图中占位，
//! 其他 inode 在不使用窗口时仍可能占用其中的块。
//!
//! - `window`：窗口和 inode 持有的窗口节点
//! - `tree`：窗口树及其挂载级锁
//! - `reserve`：查找可保留区间、申请新窗口、扩展窗口

mod window;
mod tree;
mod reserve;

pub use window::{ReserveWindow, ReserveWindowNode};
pub use tree::{ReservationRoot, RsvTree};
pub use reserve::{alloc_new_reservation, find_next_reservable_window, try_to_extend_reservation};
