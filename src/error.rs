//! 错误类型定义
//!
//! 提供 ext2 块分配器操作的错误类型。

use core::fmt;

/// ext2 操作错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// I/O 错误（例如读取块位图失败）
    Io,
    /// 无效参数
    InvalidInput,
    /// 文件系统损坏（分配/释放的块与元数据重叠等）
    Corrupted,
    /// 内部不变量被破坏（保留窗口重叠、窗口越出块组等）
    InvariantViolation,
    /// 空间不足
    NoSpace,
    /// 超出配额
    QuotaExceeded,
    /// 权限错误
    PermissionDenied,
    /// 文件系统只读
    ReadOnly,
    /// 不支持的操作
    Unsupported,
}

impl Error {
    /// 创建新错误
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    /// 获取错误类型
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取错误消息
    pub const fn message(&self) -> &'static str {
        self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result 类型别名
pub type Result<T> = core::result::Result<T, Error>;
