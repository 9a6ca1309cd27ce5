//! 进度账本服务错误类型
//!
//! 定义服务层的业务错误和系统错误。
//! 对调用方暴露三类语义：记录不存在、输入非法、持久化失败，见 [`ErrorKind`]。

use progress_shared::error::InfraError;
use thiserror::Error;

/// 错误分类
///
/// 路由层据此映射为 404 / 400 / 500 一类的响应
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    PersistenceFailure,
}

/// 进度账本服务错误类型
#[derive(Debug, Error)]
pub enum ProgressError {
    // === 记录相关错误 ===
    #[error("用户进度不存在: user_id={0}")]
    LedgerNotFound(String),

    #[error("用户进度已存在: user_id={0}")]
    LedgerAlreadyExists(String),

    #[error("账户不存在: user_id={0}")]
    AccountNotFound(String),

    // === 输入错误 ===
    #[error("积分不能为负数: {0}")]
    NegativePoints(i64),

    #[error("增量不能为负数: {0}")]
    NegativeIncrement(i32),

    #[error("未知的学习板块: {0}")]
    UnknownSection(String),

    #[error("非法的活动类型: {0:?}")]
    InvalidActivityKind(String),

    #[error("参数校验失败: {0}")]
    Validation(String),

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("基础设施错误: {0}")]
    Infra(#[from] InfraError),

    #[error("Redis 错误: {0}")]
    Redis(String),

    #[error("持久化超时: operation={operation}, timeout_ms={timeout_ms}")]
    PersistenceTimeout { operation: String, timeout_ms: u64 },

    #[error("并发冲突，账本已被其他请求修改: user_id={user_id}")]
    ConcurrencyConflict { user_id: String },

    #[error("资源被锁定: {resource}")]
    LockConflict { resource: String },

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 进度账本服务 Result 类型别名
pub type Result<T> = std::result::Result<T, ProgressError>;

impl From<validator::ValidationErrors> for ProgressError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

impl ProgressError {
    /// 错误所属分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LedgerNotFound(_) | Self::AccountNotFound(_) => ErrorKind::NotFound,
            Self::LedgerAlreadyExists(_)
            | Self::NegativePoints(_)
            | Self::NegativeIncrement(_)
            | Self::UnknownSection(_)
            | Self::InvalidActivityKind(_)
            | Self::Validation(_) => ErrorKind::InvalidInput,
            Self::Database(_)
            | Self::Infra(_)
            | Self::Redis(_)
            | Self::PersistenceTimeout { .. }
            | Self::ConcurrencyConflict { .. }
            | Self::LockConflict { .. }
            | Self::Internal(_) => ErrorKind::PersistenceFailure,
        }
    }

    /// 检查是否为可重试的错误
    ///
    /// 服务本身从不重试，由调用方决定
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::Redis(_)
                | Self::PersistenceTimeout { .. }
                | Self::ConcurrencyConflict { .. }
                | Self::LockConflict { .. }
        )
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        self.kind() != ErrorKind::PersistenceFailure
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::LedgerNotFound(_) => "LEDGER_NOT_FOUND",
            Self::LedgerAlreadyExists(_) => "LEDGER_ALREADY_EXISTS",
            Self::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            Self::NegativePoints(_) => "NEGATIVE_POINTS",
            Self::NegativeIncrement(_) => "NEGATIVE_INCREMENT",
            Self::UnknownSection(_) => "UNKNOWN_SECTION",
            Self::InvalidActivityKind(_) => "INVALID_ACTIVITY_KIND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Infra(_) => "INFRASTRUCTURE_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::PersistenceTimeout { .. } => "PERSISTENCE_TIMEOUT",
            Self::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
            Self::LockConflict { .. } => "LOCK_CONFLICT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
