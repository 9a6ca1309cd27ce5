//! 账本查询服务
//!
//! 提供账本、进度概览和排行榜的只读查询，不获取用户锁。

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument};

use progress_shared::config::LedgerSettings;

use super::bounded;
use super::dto::{LeaderboardEntry, ProgressSummary};
use crate::error::{ProgressError, Result};
use crate::models::ProgressLedger;
use crate::repository::{AccountRepositoryTrait, ProgressRepositoryTrait};

/// 账本查询服务
pub struct ProgressQueryService<R, A>
where
    R: ProgressRepositoryTrait,
    A: AccountRepositoryTrait,
{
    progress_repo: Arc<R>,
    account_repo: Arc<A>,
    settings: LedgerSettings,
}

impl<R, A> ProgressQueryService<R, A>
where
    R: ProgressRepositoryTrait,
    A: AccountRepositoryTrait,
{
    pub fn new(progress_repo: Arc<R>, account_repo: Arc<A>, settings: LedgerSettings) -> Self {
        Self {
            progress_repo,
            account_repo,
            settings,
        }
    }

    /// 获取完整账本
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_ledger(&self, user_id: &str) -> Result<ProgressLedger> {
        bounded(
            self.settings.persistence_timeout(),
            "load",
            self.progress_repo.find_by_user(user_id),
        )
        .await?
        .ok_or_else(|| ProgressError::LedgerNotFound(user_id.to_string()))
    }

    /// 获取进度概览
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_summary(&self, user_id: &str) -> Result<ProgressSummary> {
        let ledger = self.get_ledger(user_id).await?;
        Ok(ProgressSummary::from_ledger(
            &ledger,
            self.settings.recent_activity_limit,
        ))
    }

    /// 获取排行榜
    ///
    /// 先按积分取前 limit 名再关联账户，账户已不存在的条目直接省略，
    /// 因此结果可能少于 limit 条
    #[instrument(skip(self))]
    pub async fn get_leaderboard(&self, limit: Option<u32>) -> Result<Vec<LeaderboardEntry>> {
        let limit = self.effective_limit(limit);
        let timeout = self.settings.persistence_timeout();

        let rows = bounded(
            timeout,
            "top_by_points",
            self.progress_repo.top_by_points(i64::from(limit)),
        )
        .await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let user_ids: Vec<String> = rows.iter().map(|r| r.user_id.clone()).collect();
        let names: HashMap<String, String> = bounded(
            timeout,
            "find_accounts",
            self.account_repo.find_by_ids(&user_ids),
        )
        .await?
        .into_iter()
        .map(|a| (a.user_id, a.name))
        .collect();

        let total = rows.len();
        let entries: Vec<LeaderboardEntry> = rows
            .into_iter()
            .filter_map(|row| {
                let name = names.get(&row.user_id)?.clone();
                Some(LeaderboardEntry {
                    user_id: row.user_id,
                    name,
                    points: row.points,
                    level: row.level,
                    streak_days: row.streak_days,
                    badge_count: row.badge_count,
                })
            })
            .collect();

        if entries.len() < total {
            debug!(omitted = total - entries.len(), "排行榜中存在已删除账户，已省略");
        }
        Ok(entries)
    }

    /// 排行榜条数：缺省取默认值，并限制在 `[1, leaderboard_max_limit]`
    fn effective_limit(&self, requested: Option<u32>) -> u32 {
        let max = self.settings.leaderboard_max_limit.max(1);
        requested
            .unwrap_or(self.settings.leaderboard_default_limit)
            .clamp(1, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Account, LeaderboardRow};
    use crate::repository::{MockAccountRepositoryTrait, MockProgressRepositoryTrait};
    use chrono::{TimeZone, Utc};

    fn row(user_id: &str, points: i64) -> LeaderboardRow {
        LeaderboardRow {
            user_id: user_id.to_string(),
            points,
            level: 1 + points / 100,
            streak_days: 1,
            badge_count: 0,
        }
    }

    fn account(user_id: &str) -> Account {
        Account::new(
            user_id,
            format!("name-{}", user_id),
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        )
    }

    fn service(
        progress_repo: MockProgressRepositoryTrait,
        account_repo: MockAccountRepositoryTrait,
    ) -> ProgressQueryService<MockProgressRepositoryTrait, MockAccountRepositoryTrait> {
        ProgressQueryService::new(
            Arc::new(progress_repo),
            Arc::new(account_repo),
            LedgerSettings::default(),
        )
    }

    #[test]
    fn test_effective_limit() {
        let service = service(
            MockProgressRepositoryTrait::new(),
            MockAccountRepositoryTrait::new(),
        );
        assert_eq!(service.effective_limit(None), 10);
        assert_eq!(service.effective_limit(Some(0)), 1);
        assert_eq!(service.effective_limit(Some(3)), 3);
        assert_eq!(service.effective_limit(Some(1_000)), 100);
    }

    #[tokio::test]
    async fn test_leaderboard_omits_missing_accounts() {
        let mut repo = MockProgressRepositoryTrait::new();
        repo.expect_top_by_points()
            .withf(|limit| *limit == 3)
            .returning(|_| Ok(vec![row("a", 300), row("b", 200), row("c", 100)]));

        let mut accounts = MockAccountRepositoryTrait::new();
        accounts
            .expect_find_by_ids()
            .returning(|_| Ok(vec![account("a"), account("c")]));

        let board = service(repo, accounts)
            .get_leaderboard(Some(3))
            .await
            .unwrap();

        let ids: Vec<_> = board.iter().map(|e| e.user_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(board[0].name, "name-a");
        assert_eq!(board[0].level, 4);
    }

    #[tokio::test]
    async fn test_leaderboard_empty_skips_account_lookup() {
        let mut repo = MockProgressRepositoryTrait::new();
        repo.expect_top_by_points().returning(|_| Ok(vec![]));
        let mut accounts = MockAccountRepositoryTrait::new();
        accounts.expect_find_by_ids().never();

        let board = service(repo, accounts).get_leaderboard(None).await.unwrap();
        assert!(board.is_empty());
    }

    #[tokio::test]
    async fn test_get_ledger_not_found() {
        let mut repo = MockProgressRepositoryTrait::new();
        repo.expect_find_by_user().returning(|_| Ok(None));

        let err = service(repo, MockAccountRepositoryTrait::new())
            .get_ledger("ghost")
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::LedgerNotFound(_)));
    }
}
