//! 学习进度账本服务
//!
//! 维护每个用户的积分、等级、连续活跃天数、活动流水、徽章和学习板块完成计数。
//!
//! ## 核心功能
//!
//! - **活动入账**：记录活动并累加积分，等级随积分自动重算
//! - **连续天数**：按整天间隔递增、重置或保持
//! - **徽章授予**：按名称幂等，新徽章附带 25 积分
//! - **学习板块**：累加 autism/adhd/dyslexia 完成次数
//! - **注册与登录**：首次活动时创建账本
//! - **排行榜**：按积分降序，关联账户显示名称
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `clock`: 时钟抽象
//! - `repository`: 仓储层（PostgreSQL 与内存实现）
//! - `lock`: 用户级分布式锁
//! - `service`: 业务服务层
//! - `bootstrap`: 服务装配

pub mod bootstrap;
pub mod clock;
pub mod error;
pub mod lock;
pub mod models;
pub mod repository;
pub mod service;

pub use bootstrap::{MemoryProgressServices, PgProgressServices, ProgressServices, start};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorKind, ProgressError, Result};
pub use lock::{LockConfig, LockGuard, LockManager};
pub use models::*;
pub use repository::{
    AccountRepository, MemoryAccountRepository, MemoryProgressRepository, ProgressRepository,
};
pub use service::{ProgressQueryService, ProgressService, dto};
