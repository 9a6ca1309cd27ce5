//! 内存仓储
//!
//! 使用 DashMap 实现的并发安全内存存储，适用于测试和本地开发。
//! 版本校验语义与 PostgreSQL 实现一致。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::traits::{AccountRepositoryTrait, ProgressRepositoryTrait};
use crate::error::{ProgressError, Result};
use crate::models::{Account, LeaderboardRow, ProgressLedger};

/// 内存账本仓储
#[derive(Debug, Clone, Default)]
pub struct MemoryProgressRepository {
    ledgers: Arc<DashMap<String, ProgressLedger>>,
}

impl MemoryProgressRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已存储的账本数量
    pub fn count(&self) -> usize {
        self.ledgers.len()
    }
}

#[async_trait]
impl ProgressRepositoryTrait for MemoryProgressRepository {
    async fn find_by_user(&self, user_id: &str) -> Result<Option<ProgressLedger>> {
        Ok(self.ledgers.get(user_id).map(|l| l.clone()))
    }

    async fn insert_if_absent(&self, ledger: &ProgressLedger) -> Result<bool> {
        match self.ledgers.entry(ledger.user_id().to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(ledger.clone());
                Ok(true)
            }
        }
    }

    async fn save(&self, ledger: &ProgressLedger, expected_version: i64) -> Result<()> {
        let conflict = || ProgressError::ConcurrencyConflict {
            user_id: ledger.user_id().to_string(),
        };

        let mut stored = self.ledgers.get_mut(ledger.user_id()).ok_or_else(conflict)?;
        if stored.version() != expected_version {
            return Err(conflict());
        }
        *stored = ledger.clone();
        Ok(())
    }

    async fn top_by_points(&self, limit: i64) -> Result<Vec<LeaderboardRow>> {
        let mut rows: Vec<LeaderboardRow> = self
            .ledgers
            .iter()
            .map(|entry| {
                let ledger = entry.value();
                LeaderboardRow {
                    user_id: ledger.user_id().to_string(),
                    points: ledger.points(),
                    level: ledger.level(),
                    streak_days: ledger.streak_days(),
                    badge_count: ledger.badges().len() as i64,
                }
            })
            .collect();

        rows.sort_by(|a, b| {
            b.points
                .cmp(&a.points)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

/// 内存账户仓储
#[derive(Debug, Clone, Default)]
pub struct MemoryAccountRepository {
    accounts: Arc<DashMap<String, Account>>,
}

impl MemoryAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 移除账户，模拟账户被外部删除
    pub fn remove(&self, user_id: &str) -> Option<Account> {
        self.accounts.remove(user_id).map(|(_, v)| v)
    }
}

#[async_trait]
impl AccountRepositoryTrait for MemoryAccountRepository {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<Account>> {
        Ok(self.accounts.get(user_id).map(|a| a.clone()))
    }

    async fn find_by_ids(&self, user_ids: &[String]) -> Result<Vec<Account>> {
        Ok(user_ids
            .iter()
            .filter_map(|id| self.accounts.get(id).map(|a| a.clone()))
            .collect())
    }

    async fn create(&self, account: &Account) -> Result<bool> {
        match self.accounts.entry(account.user_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(account.clone());
                Ok(true)
            }
        }
    }

    async fn touch_last_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut account = self
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| ProgressError::AccountNotFound(user_id.to_string()))?;
        account.last_login_at = Some(at);
        account.updated_at = at;
        Ok(())
    }
}
