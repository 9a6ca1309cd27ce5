//! 仓储 Trait 定义
//!
//! 定义仓储接口，便于服务层依赖抽象而非具体实现，支持 mock 测试

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Account, LeaderboardRow, ProgressLedger};

/// 进度账本仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProgressRepositoryTrait: Send + Sync {
    /// 按用户加载完整账本（含活动流水和徽章）
    async fn find_by_user(&self, user_id: &str) -> Result<Option<ProgressLedger>>;

    /// 账本不存在时写入，返回是否写入成功
    async fn insert_if_absent(&self, ledger: &ProgressLedger) -> Result<bool>;

    /// 带版本校验的整体保存
    ///
    /// 存储中的版本必须等于 `expected_version`，否则返回 `ConcurrencyConflict`，
    /// 写入后存储版本为 `ledger.version()`
    async fn save(&self, ledger: &ProgressLedger, expected_version: i64) -> Result<()>;

    /// 按积分降序取前 limit 名，积分相同按 user_id 升序
    async fn top_by_points(&self, limit: i64) -> Result<Vec<LeaderboardRow>>;
}

/// 账户仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountRepositoryTrait: Send + Sync {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<Account>>;
    async fn find_by_ids(&self, user_ids: &[String]) -> Result<Vec<Account>>;
    /// 账户不存在时创建，返回是否新建
    async fn create(&self, account: &Account) -> Result<bool>;
    async fn touch_last_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<()>;
}
