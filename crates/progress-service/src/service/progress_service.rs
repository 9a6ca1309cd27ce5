//! 账本写入服务
//!
//! 所有写操作都遵循同一流程：
//!
//! 1. 获取 `progress:{user_id}` 用户锁
//! 2. 加载账本（带超时）
//! 3. 在内存副本上执行领域操作
//! 4. 带版本校验保存（带超时），失败时丢弃内存副本
//! 5. 释放锁，记录指标
//!
//! 服务不做任何重试，所有错误原样返回调用方。

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use validator::Validate;

use progress_shared::config::LedgerSettings;
use progress_shared::observability::metrics as progress_metrics;

use super::bounded;
use super::dto::{
    ActivityOutcome, AwardBadgeRequest, BadgesOutcome, CompleteSectionRequest, ProgressTotals,
    RecordActivityRequest, RegisterRequest, SectionsOutcome, StreakOutcome,
};
use crate::clock::Clock;
use crate::error::{ProgressError, Result};
use crate::lock::LockManager;
use crate::models::{
    Account, ActivityKind, ProgressLedger, RewardEvent, Section, StreakTransition,
};
use crate::repository::{AccountRepositoryTrait, ProgressRepositoryTrait};

/// 注册奖励积分
pub const REGISTRATION_POINTS: i64 = 10;
/// 每日登录奖励积分
pub const LOGIN_POINTS: i64 = 5;

const REGISTRATION_DETAILS: &str = "Initial registration";
const LOGIN_DETAILS: &str = "Daily login";

/// 用户锁 key
fn lock_key(user_id: &str) -> String {
    format!("progress:{}", user_id)
}

/// 领域操作的结果
///
/// `Unchanged` 表示账本未被修改，跳过保存
enum Change<T> {
    Applied(T),
    Unchanged(T),
}

/// 账本写入服务
pub struct ProgressService<R, A>
where
    R: ProgressRepositoryTrait,
    A: AccountRepositoryTrait,
{
    progress_repo: Arc<R>,
    account_repo: Arc<A>,
    lock_manager: Arc<LockManager>,
    clock: Arc<dyn Clock>,
    settings: LedgerSettings,
}

impl<R, A> ProgressService<R, A>
where
    R: ProgressRepositoryTrait,
    A: AccountRepositoryTrait,
{
    pub fn new(
        progress_repo: Arc<R>,
        account_repo: Arc<A>,
        lock_manager: Arc<LockManager>,
        clock: Arc<dyn Clock>,
        settings: LedgerSettings,
    ) -> Self {
        Self {
            progress_repo,
            account_repo,
            lock_manager,
            clock,
            settings,
        }
    }

    // ==================== 注册与登录 ====================

    /// 注册用户
    ///
    /// 创建账户（已存在则沿用）和账本，账本以一条 10 积分的 `login` 活动开始，连续天数为 1。
    /// 账本已存在时返回 `LedgerAlreadyExists`。
    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn register(&self, request: RegisterRequest) -> Result<ProgressTotals> {
        request.validate()?;
        let user_id = request.user_id.as_str();

        self.observed(
            "register",
            self.locked(user_id, async {
                if self.load(user_id).await?.is_some() {
                    return Err(ProgressError::LedgerAlreadyExists(user_id.to_string()));
                }

                let now = self.clock.now();
                let account = Account::new(user_id, request.name.as_str(), now);
                let created = bounded(
                    self.settings.persistence_timeout(),
                    "create_account",
                    self.account_repo.create(&account),
                )
                .await?;
                if !created {
                    debug!("账户已存在，沿用现有账户");
                }

                let ledger = ProgressLedger::with_first_activity(
                    user_id,
                    ActivityKind::Login,
                    REGISTRATION_POINTS,
                    REGISTRATION_DETAILS,
                    now,
                )?;
                if !self.insert(&ledger).await? {
                    return Err(ProgressError::LedgerAlreadyExists(user_id.to_string()));
                }

                info!(points = ledger.points(), "用户注册完成");
                Ok(ProgressTotals::from(&ledger))
            }),
        )
        .await
    }

    /// 记录登录
    ///
    /// 账本不存在时以一条 5 积分的 `login` 活动创建；
    /// 否则先更新连续天数，再记录 5 积分的 `login` 活动。
    /// 账本写入前先刷新账户的最后登录时间。
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn record_login(&self, user_id: &str) -> Result<ProgressTotals> {
        self.observed(
            "record_login",
            self.locked(user_id, async {
                if self.find_account(user_id).await?.is_none() {
                    return Err(ProgressError::AccountNotFound(user_id.to_string()));
                }

                let now = self.clock.now();
                // 先刷新账户，失败时不写账本
                bounded(
                    self.settings.persistence_timeout(),
                    "touch_last_login",
                    self.account_repo.touch_last_login(user_id, now),
                )
                .await?;

                let totals = self
                    .streak_then_record(
                        user_id,
                        ActivityKind::Login,
                        LOGIN_POINTS,
                        LOGIN_DETAILS,
                        now,
                    )
                    .await?;

                info!(
                    points = totals.points,
                    streak_days = totals.streak_days,
                    "用户登录已记录"
                );
                Ok(totals)
            }),
        )
        .await
    }

    // ==================== 活动 ====================

    /// 记录一次活动
    ///
    /// 账本必须已存在。返回新的累计积分和等级。
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn record_activity(
        &self,
        user_id: &str,
        kind: ActivityKind,
        points: i64,
        details: &str,
    ) -> Result<ActivityOutcome> {
        let details = details.to_string();
        self.apply("record_activity", user_id, move |ledger, now| {
            ledger.record_activity(kind, points, details, now)?;
            Ok(Change::Applied(ActivityOutcome {
                points: ledger.points(),
                level: ledger.level(),
            }))
        })
        .await
    }

    /// 先更新连续天数再记录活动
    ///
    /// 账本不存在时直接以该活动创建账本（连续天数为 1）
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn record_activity_with_streak(
        &self,
        user_id: &str,
        kind: ActivityKind,
        points: i64,
        details: &str,
    ) -> Result<ProgressTotals> {
        self.observed(
            "record_activity_with_streak",
            self.locked(user_id, async {
                let now = self.clock.now();
                self.streak_then_record(user_id, kind, points, details, now)
                    .await
            }),
        )
        .await
    }

    /// 处理外部提交的活动请求
    ///
    /// 校验请求并解析活动标签，按 `update_streak` 分派到对应流程
    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn submit_activity(&self, request: RecordActivityRequest) -> Result<ProgressTotals> {
        request.validate()?;
        let kind = ActivityKind::parse(&request.activity_type)?;

        if request.update_streak {
            return self
                .record_activity_with_streak(
                    &request.user_id,
                    kind,
                    request.points,
                    &request.details,
                )
                .await;
        }

        let details = request.details;
        self.apply("submit_activity", &request.user_id, move |ledger, now| {
            ledger.record_activity(kind, request.points, details, now)?;
            Ok(Change::Applied(ProgressTotals::from(&*ledger)))
        })
        .await
    }

    /// 发放标准奖励
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn reward(&self, user_id: &str, event: RewardEvent) -> Result<ActivityOutcome> {
        self.apply("reward", user_id, move |ledger, now| {
            ledger.record_activity(event.kind(), event.points(), event.details(), now)?;
            Ok(Change::Applied(ActivityOutcome {
                points: ledger.points(),
                level: ledger.level(),
            }))
        })
        .await
    }

    // ==================== 连续天数 ====================

    /// 更新连续活跃天数
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn update_streak(&self, user_id: &str) -> Result<StreakOutcome> {
        let outcome = self
            .apply("update_streak", user_id, |ledger, now| {
                let transition = ledger.update_streak(now);
                Ok(Change::Applied(StreakOutcome {
                    streak_days: ledger.streak_days(),
                    transition,
                }))
            })
            .await?;

        self.observe_streak(user_id, outcome.transition);
        Ok(outcome)
    }

    // ==================== 徽章 ====================

    /// 授予徽章
    ///
    /// 同名徽章已存在时不做修改，`awarded` 为 false
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn award_badge(
        &self,
        user_id: &str,
        name: &str,
        description: &str,
        icon: Option<&str>,
    ) -> Result<BadgesOutcome> {
        let outcome = self
            .apply("award_badge", user_id, |ledger, now| {
                let awarded = ledger.award_badge(name, description, icon, now)?;
                let outcome = BadgesOutcome {
                    badges: ledger.badges().to_vec(),
                    awarded,
                };
                if awarded {
                    Ok(Change::Applied(outcome))
                } else {
                    Ok(Change::Unchanged(outcome))
                }
            })
            .await?;

        if outcome.awarded {
            info!(badge = %name, "徽章授予成功");
        } else {
            debug!(badge = %name, "徽章已存在，跳过授予");
        }
        Ok(outcome)
    }

    /// 处理外部提交的授予徽章请求
    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn submit_badge(&self, request: AwardBadgeRequest) -> Result<BadgesOutcome> {
        request.validate()?;
        self.award_badge(
            &request.user_id,
            &request.name,
            &request.description,
            request.icon.as_deref(),
        )
        .await
    }

    // ==================== 学习板块 ====================

    /// 累加学习板块完成次数
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn update_completed_sections(
        &self,
        user_id: &str,
        section: Section,
        increment: i32,
    ) -> Result<SectionsOutcome> {
        if increment < 0 {
            return Err(ProgressError::NegativeIncrement(increment));
        }

        self.apply("update_completed_sections", user_id, move |ledger, now| {
            let completed_sections = ledger.update_completed_sections(section, increment, now)?;
            Ok(Change::Applied(SectionsOutcome { completed_sections }))
        })
        .await
    }

    /// 处理外部提交的板块完成请求
    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn complete_section(&self, request: CompleteSectionRequest) -> Result<SectionsOutcome> {
        request.validate()?;
        let section: Section = request.section.parse()?;
        self.update_completed_sections(&request.user_id, section, request.increment)
            .await
    }

    // ==================== 内部流程 ====================

    /// 在用户锁内对已存在的账本执行领域操作并保存
    async fn apply<T, F>(&self, operation: &'static str, user_id: &str, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut ProgressLedger, DateTime<Utc>) -> Result<Change<T>>,
    {
        self.observed(
            operation,
            self.locked(user_id, async {
                let mut ledger = self
                    .load(user_id)
                    .await?
                    .ok_or_else(|| ProgressError::LedgerNotFound(user_id.to_string()))?;

                let before = ledger.activities().len();
                let now = self.clock.now();

                match mutate(&mut ledger, now)? {
                    Change::Unchanged(value) => Ok(value),
                    Change::Applied(value) => {
                        self.persist(&mut ledger, before).await?;
                        Ok(value)
                    }
                }
            }),
        )
        .await
    }

    /// 先更新连续天数再记录活动，账本不存在时以该活动创建
    ///
    /// 调用方必须已持有用户锁
    async fn streak_then_record(
        &self,
        user_id: &str,
        kind: ActivityKind,
        points: i64,
        details: &str,
        now: DateTime<Utc>,
    ) -> Result<ProgressTotals> {
        let Some(mut ledger) = self.load(user_id).await? else {
            let ledger = ProgressLedger::with_first_activity(user_id, kind, points, details, now)?;
            if !self.insert(&ledger).await? {
                return Err(ProgressError::ConcurrencyConflict {
                    user_id: user_id.to_string(),
                });
            }
            debug!("账本不存在，已按首次活动创建");
            return Ok(ProgressTotals::from(&ledger));
        };

        let before = ledger.activities().len();
        let transition = ledger.update_streak(now);
        ledger.record_activity(kind, points, details, now)?;
        self.persist(&mut ledger, before).await?;

        self.observe_streak(user_id, transition);
        Ok(ProgressTotals::from(&ledger))
    }

    async fn load(&self, user_id: &str) -> Result<Option<ProgressLedger>> {
        bounded(
            self.settings.persistence_timeout(),
            "load",
            self.progress_repo.find_by_user(user_id),
        )
        .await
    }

    async fn find_account(&self, user_id: &str) -> Result<Option<Account>> {
        bounded(
            self.settings.persistence_timeout(),
            "find_account",
            self.account_repo.find_by_id(user_id),
        )
        .await
    }

    /// 写入新账本并记录指标，返回是否写入
    async fn insert(&self, ledger: &ProgressLedger) -> Result<bool> {
        let inserted = bounded(
            self.settings.persistence_timeout(),
            "insert",
            self.progress_repo.insert_if_absent(ledger),
        )
        .await?;

        if inserted {
            self.observe_appended(ledger, 0);
        }
        Ok(inserted)
    }

    /// 带版本校验保存，并为新追加的活动记录指标
    ///
    /// 保存失败时调用方丢弃内存中的账本
    async fn persist(&self, ledger: &mut ProgressLedger, appended_from: usize) -> Result<()> {
        let expected_version = ledger.bump_version();
        bounded(
            self.settings.persistence_timeout(),
            "save",
            self.progress_repo.save(ledger, expected_version),
        )
        .await?;

        self.observe_appended(ledger, appended_from);
        Ok(())
    }

    fn observe_appended(&self, ledger: &ProgressLedger, appended_from: usize) {
        for activity in &ledger.activities()[appended_from..] {
            progress_metrics::record_activity(activity.kind.as_str(), activity.points);
            if activity.kind == ActivityKind::BadgeEarned {
                progress_metrics::record_badge_awarded();
            }
        }
    }

    fn observe_streak(&self, user_id: &str, transition: StreakTransition) {
        progress_metrics::record_streak_transition(transition.as_str());
        if transition == StreakTransition::ClockSkew {
            warn!(
                user_id = %user_id,
                "最后活跃时间晚于当前时间，连续天数保持不变"
            );
        }
    }

    /// 在用户锁内执行
    async fn locked<T>(&self, user_id: &str, work: impl Future<Output = Result<T>>) -> Result<T> {
        let key = lock_key(user_id);
        let guard = self.lock_manager.acquire(&key, None).await?;

        let result = work.await;

        if let Err(e) = guard.release().await {
            warn!(key = %key, error = %e, "释放用户锁失败");
        }
        result
    }

    /// 记录操作耗时和错误
    async fn observed<T>(
        &self,
        operation: &'static str,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let start = Instant::now();
        let result = work.await;
        let elapsed = start.elapsed().as_secs_f64();

        match &result {
            Ok(_) => progress_metrics::record_operation(operation, "success", elapsed),
            Err(e) => {
                progress_metrics::record_operation(operation, "error", elapsed);
                progress_metrics::record_error(operation, e.error_code());
                if e.is_business_error() {
                    debug!(operation, error = %e, "业务校验未通过");
                } else {
                    warn!(operation, error = %e, "账本操作失败");
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ErrorKind;
    use crate::lock::LockConfig;
    use crate::repository::{
        MemoryAccountRepository, MockAccountRepositoryTrait, MockProgressRepositoryTrait,
    };
    use chrono::{Duration, TimeZone};
    use progress_shared::test_utils::test_ledger_settings;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn seeded(points: i64) -> ProgressLedger {
        ProgressLedger::with_first_activity("u1", ActivityKind::Login, points, "seed", t0())
            .unwrap()
    }

    fn service_with(
        progress_repo: MockProgressRepositoryTrait,
        account_repo: MockAccountRepositoryTrait,
        clock: Arc<ManualClock>,
    ) -> ProgressService<MockProgressRepositoryTrait, MockAccountRepositoryTrait> {
        ProgressService::new(
            Arc::new(progress_repo),
            Arc::new(account_repo),
            Arc::new(LockManager::local(LockConfig::default())),
            clock,
            test_ledger_settings(),
        )
    }

    #[tokio::test]
    async fn test_record_activity_saves_with_expected_version() {
        let mut repo = MockProgressRepositoryTrait::new();
        repo.expect_find_by_user()
            .returning(|_| Ok(Some(seeded(90))));
        repo.expect_save()
            .withf(|ledger, expected| *expected == 0 && ledger.version() == 1 && ledger.points() == 100)
            .times(1)
            .returning(|_, _| Ok(()));

        let service = service_with(
            repo,
            MockAccountRepositoryTrait::new(),
            Arc::new(ManualClock::new(t0())),
        );

        let outcome = service
            .record_activity("u1", ActivityKind::QuizCompleted, 10, "quiz")
            .await
            .unwrap();
        assert_eq!(outcome, ActivityOutcome { points: 100, level: 2 });
    }

    #[tokio::test]
    async fn test_record_activity_missing_ledger() {
        let mut repo = MockProgressRepositoryTrait::new();
        repo.expect_find_by_user().returning(|_| Ok(None));
        repo.expect_save().never();

        let service = service_with(
            repo,
            MockAccountRepositoryTrait::new(),
            Arc::new(ManualClock::new(t0())),
        );

        let err = service
            .record_activity("u1", ActivityKind::Login, 5, "")
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::LedgerNotFound(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_negative_points_never_reach_repository() {
        let mut repo = MockProgressRepositoryTrait::new();
        repo.expect_find_by_user()
            .returning(|_| Ok(Some(seeded(10))));
        repo.expect_save().never();

        let service = service_with(
            repo,
            MockAccountRepositoryTrait::new(),
            Arc::new(ManualClock::new(t0())),
        );

        let err = service
            .record_activity("u1", ActivityKind::Login, -3, "")
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::NegativePoints(-3)));
    }

    #[tokio::test]
    async fn test_save_failure_is_surfaced() {
        let mut repo = MockProgressRepositoryTrait::new();
        repo.expect_find_by_user()
            .returning(|_| Ok(Some(seeded(10))));
        repo.expect_save()
            .returning(|_, _| Err(ProgressError::Database(sqlx::Error::PoolTimedOut)));

        let service = service_with(
            repo,
            MockAccountRepositoryTrait::new(),
            Arc::new(ManualClock::new(t0())),
        );

        let err = service
            .reward("u1", RewardEvent::ChatMessage)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::PersistenceFailure);
    }

    #[tokio::test]
    async fn test_duplicate_badge_skips_save() {
        let mut ledger = seeded(10);
        ledger.award_badge("Starter", "first", None, t0()).unwrap();

        let mut repo = MockProgressRepositoryTrait::new();
        repo.expect_find_by_user()
            .returning(move |_| Ok(Some(ledger.clone())));
        repo.expect_save().never();

        let service = service_with(
            repo,
            MockAccountRepositoryTrait::new(),
            Arc::new(ManualClock::new(t0())),
        );

        let outcome = service
            .award_badge("u1", "Starter", "again", None)
            .await
            .unwrap();
        assert!(!outcome.awarded);
        assert_eq!(outcome.badges.len(), 1);
    }

    #[tokio::test]
    async fn test_login_requires_account() {
        let mut accounts = MockAccountRepositoryTrait::new();
        accounts.expect_find_by_id().returning(|_| Ok(None));
        let mut repo = MockProgressRepositoryTrait::new();
        repo.expect_find_by_user().never();

        let service = service_with(repo, accounts, Arc::new(ManualClock::new(t0())));

        let err = service.record_login("ghost").await.unwrap_err();
        assert!(matches!(err, ProgressError::AccountNotFound(_)));
    }

    #[tokio::test]
    async fn test_login_updates_streak_before_recording() {
        let clock = Arc::new(ManualClock::new(t0() + Duration::hours(26)));

        let mut repo = MockProgressRepositoryTrait::new();
        repo.expect_find_by_user()
            .returning(|_| Ok(Some(seeded(10))));
        repo.expect_save()
            .withf(|ledger, _| {
                let last = ledger.activities().last().unwrap();
                ledger.streak_days() == 2 && last.kind == ActivityKind::Login && last.points == 5
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let mut accounts = MockAccountRepositoryTrait::new();
        accounts
            .expect_find_by_id()
            .returning(|id| Ok(Some(Account::new(id, "Alex", t0()))));
        accounts
            .expect_touch_last_login()
            .times(1)
            .returning(|_, _| Ok(()));

        let service = service_with(repo, accounts, clock);
        let totals = service.record_login("u1").await.unwrap();
        assert_eq!(
            totals,
            ProgressTotals {
                points: 15,
                level: 1,
                streak_days: 2
            }
        );
    }

    #[tokio::test]
    async fn test_login_account_failure_leaves_ledger_untouched() {
        let mut repo = MockProgressRepositoryTrait::new();
        repo.expect_find_by_user().never();
        repo.expect_save().never();

        let mut accounts = MockAccountRepositoryTrait::new();
        accounts
            .expect_find_by_id()
            .returning(|id| Ok(Some(Account::new(id, "Alex", t0()))));
        accounts
            .expect_touch_last_login()
            .times(1)
            .returning(|_, _| Err(ProgressError::Database(sqlx::Error::PoolTimedOut)));

        let service = service_with(repo, accounts, Arc::new(ManualClock::new(t0())));
        let err = service.record_login("u1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
    }

    #[tokio::test]
    async fn test_unknown_section_rejected() {
        let service = service_with(
            MockProgressRepositoryTrait::new(),
            MockAccountRepositoryTrait::new(),
            Arc::new(ManualClock::new(t0())),
        );

        let err = service
            .complete_section(CompleteSectionRequest {
                user_id: "u1".to_string(),
                section: "math".to_string(),
                increment: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::UnknownSection(_)));
    }

    #[tokio::test]
    async fn test_register_rejects_existing_ledger() {
        let mut repo = MockProgressRepositoryTrait::new();
        repo.expect_find_by_user()
            .returning(|_| Ok(Some(seeded(10))));
        repo.expect_insert_if_absent().never();

        let service = ProgressService::new(
            Arc::new(repo),
            Arc::new(MemoryAccountRepository::new()),
            Arc::new(LockManager::local(LockConfig::default())),
            Arc::new(ManualClock::new(t0())),
            test_ledger_settings(),
        );

        let err = service
            .register(RegisterRequest {
                user_id: "u1".to_string(),
                name: "Alex".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::LedgerAlreadyExists(_)));
    }
}
