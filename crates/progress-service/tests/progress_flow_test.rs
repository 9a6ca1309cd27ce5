//! 账本业务流程集成测试
//!
//! 使用内存仓储 + 进程内锁 + 手动时钟，覆盖注册、登录、活动、连续天数、
//! 徽章、学习板块、奖励、概览和排行榜的完整流程。

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fake::Fake;
use fake::faker::name::en::Name;
use tokio_test::{assert_err, assert_ok};

use progress_ledger::dto::{
    AwardBadgeRequest, CompleteSectionRequest, ProgressTotals, RecordActivityRequest,
    RegisterRequest,
};
use progress_ledger::repository::{AccountRepositoryTrait, ProgressRepositoryTrait};
use progress_ledger::{
    Account, ActivityKind, Clock, ErrorKind, LeaderboardRow, LockConfig, LockManager, ManualClock,
    MemoryAccountRepository, MemoryProgressRepository, MemoryProgressServices, ProgressError,
    ProgressLedger, ProgressServices, Result, RewardEvent, Section, StreakTransition,
};
use progress_shared::config::LedgerSettings;
use progress_shared::test_utils::{base_time, test_ledger_settings, test_user_id};

// ==================== 辅助函数 ====================

fn setup() -> (MemoryProgressServices, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(base_time()));
    let services = MemoryProgressServices::in_memory(test_ledger_settings(), clock.clone());
    (services, clock)
}

async fn register(services: &MemoryProgressServices, user_id: &str) -> ProgressTotals {
    services
        .ledger
        .register(RegisterRequest {
            user_id: user_id.to_string(),
            name: Name().fake::<String>(),
        })
        .await
        .expect("注册失败")
}

// ==================== 注册与登录 ====================

#[tokio::test]
async fn test_register_then_next_day_login() {
    let (services, clock) = setup();
    let user_id = test_user_id();

    let totals = register(&services, &user_id).await;
    assert_eq!(
        totals,
        ProgressTotals {
            points: 10,
            level: 1,
            streak_days: 1
        }
    );

    clock.advance(Duration::hours(25));
    let totals = assert_ok!(services.ledger.record_login(&user_id).await);
    assert_eq!(
        totals,
        ProgressTotals {
            points: 15,
            level: 1,
            streak_days: 2
        }
    );

    let ledger = services.queries.get_ledger(&user_id).await.unwrap();
    let kinds: Vec<_> = ledger.activities().iter().map(|a| a.kind.clone()).collect();
    assert_eq!(kinds, vec![ActivityKind::Login, ActivityKind::Login]);
    assert_eq!(ledger.activities()[0].details, "Initial registration");
    assert_eq!(ledger.activities()[1].details, "Daily login");

    let account = services.account_repo.find_by_id(&user_id).await.unwrap().unwrap();
    assert_eq!(account.last_login_at, Some(clock.now()));
}

#[tokio::test]
async fn test_register_twice_fails() {
    let (services, _clock) = setup();
    let user_id = test_user_id();
    register(&services, &user_id).await;

    let err = assert_err!(
        services
            .ledger
            .register(RegisterRequest {
                user_id: user_id.clone(),
                name: "Again".to_string(),
            })
            .await
    );
    assert!(matches!(err, ProgressError::LedgerAlreadyExists(_)));

    let ledger = services.queries.get_ledger(&user_id).await.unwrap();
    assert_eq!(ledger.points(), 10);
}

#[tokio::test]
async fn test_first_login_creates_ledger() {
    let (services, _clock) = setup();
    let user_id = test_user_id();

    // 账户存在但没有账本（例如历史数据）
    let account = progress_ledger::Account::new(user_id.as_str(), "Legacy", base_time());
    services.account_repo.create(&account).await.unwrap();

    let totals = services.ledger.record_login(&user_id).await.unwrap();
    assert_eq!(
        totals,
        ProgressTotals {
            points: 5,
            level: 1,
            streak_days: 1
        }
    );
}

// ==================== 活动与等级 ====================

#[tokio::test]
async fn test_record_activity_crosses_levels() {
    let (services, _clock) = setup();
    let user_id = test_user_id();
    register(&services, &user_id).await;

    let outcome = services
        .ledger
        .record_activity(&user_id, ActivityKind::LessonCompleted, 89, "Lesson 1")
        .await
        .unwrap();
    assert_eq!((outcome.points, outcome.level), (99, 1));

    let outcome = services
        .ledger
        .record_activity(&user_id, ActivityKind::QuizCompleted, 1, "Quiz 1")
        .await
        .unwrap();
    assert_eq!((outcome.points, outcome.level), (100, 2));

    let outcome = services
        .ledger
        .record_activity(&user_id, ActivityKind::QuizCompleted, 150, "Quiz 2")
        .await
        .unwrap();
    assert_eq!((outcome.points, outcome.level), (250, 3));
}

#[tokio::test]
async fn test_record_activity_is_additive_and_keeps_history() {
    let (services, clock) = setup();
    let user_id = test_user_id();
    register(&services, &user_id).await;

    let amounts = [0_i64, 7, 0, 3, 40];
    for p in amounts {
        clock.advance(Duration::minutes(1));
        services
            .ledger
            .record_activity(&user_id, ActivityKind::DiaryEntry, p, "same entry")
            .await
            .unwrap();
    }

    let ledger = services.queries.get_ledger(&user_id).await.unwrap();
    assert_eq!(ledger.points(), 10 + amounts.iter().sum::<i64>());
    assert_eq!(ledger.activities().len(), 1 + amounts.len());
    assert_eq!(ledger.last_active(), clock.now());
}

#[tokio::test]
async fn test_negative_points_rejected() {
    let (services, _clock) = setup();
    let user_id = test_user_id();
    register(&services, &user_id).await;

    let err = services
        .ledger
        .record_activity(&user_id, ActivityKind::Login, -5, "")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let ledger = services.queries.get_ledger(&user_id).await.unwrap();
    assert_eq!(ledger.points(), 10);
    assert_eq!(ledger.activities().len(), 1);
}

#[tokio::test]
async fn test_activity_on_missing_ledger_is_not_found() {
    let (services, _clock) = setup();

    let err = services
        .ledger
        .reward("nobody", RewardEvent::ChatMessage)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_submit_activity_with_custom_tag_and_streak() {
    let (services, clock) = setup();
    let user_id = test_user_id();

    // 账本不存在时按首次活动创建
    let totals = services
        .ledger
        .submit_activity(RecordActivityRequest {
            user_id: user_id.clone(),
            activity_type: "breathing_exercise".to_string(),
            points: 8,
            details: "Box breathing".to_string(),
            update_streak: true,
        })
        .await
        .unwrap();
    assert_eq!(totals.points, 8);
    assert_eq!(totals.streak_days, 1);

    clock.advance(Duration::days(1));
    let totals = services
        .ledger
        .submit_activity(RecordActivityRequest {
            user_id: user_id.clone(),
            activity_type: "meditation_session".to_string(),
            points: 12,
            details: String::new(),
            update_streak: true,
        })
        .await
        .unwrap();
    assert_eq!(totals.points, 20);
    assert_eq!(totals.streak_days, 2);

    let err = services
        .ledger
        .submit_activity(RecordActivityRequest {
            user_id,
            activity_type: "Not A Tag".to_string(),
            points: 1,
            details: String::new(),
            update_streak: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ProgressError::InvalidActivityKind(_)));
}

// ==================== 连续天数 ====================

#[tokio::test]
async fn test_update_streak_idempotent_within_day() {
    let (services, clock) = setup();
    let user_id = test_user_id();
    register(&services, &user_id).await;

    clock.advance(Duration::hours(2));
    let first = services.ledger.update_streak(&user_id).await.unwrap();
    clock.advance(Duration::hours(3));
    let second = services.ledger.update_streak(&user_id).await.unwrap();

    assert_eq!(first.streak_days, 1);
    assert_eq!(second.streak_days, 1);
    assert_eq!(second.transition, StreakTransition::Unchanged);
}

#[tokio::test]
async fn test_update_streak_increments_within_second_day() {
    for hours in [24, 36, 47] {
        let (services, clock) = setup();
        let user_id = test_user_id();
        register(&services, &user_id).await;

        clock.advance(Duration::hours(hours));
        let outcome = services.ledger.update_streak(&user_id).await.unwrap();
        assert_eq!(outcome.streak_days, 2, "{}h later", hours);
        assert_eq!(outcome.transition, StreakTransition::Incremented);
    }
}

#[tokio::test]
async fn test_long_streak_resets_after_gap() {
    let (services, clock) = setup();
    let user_id = test_user_id();
    register(&services, &user_id).await;

    for _ in 0..49 {
        clock.advance(Duration::days(1));
        services.ledger.record_login(&user_id).await.unwrap();
    }
    let ledger = services.queries.get_ledger(&user_id).await.unwrap();
    assert_eq!(ledger.streak_days(), 50);

    clock.advance(Duration::days(3));
    let outcome = services.ledger.update_streak(&user_id).await.unwrap();
    assert_eq!(outcome.streak_days, 1);
    assert_eq!(outcome.transition, StreakTransition::Reset);
}

#[tokio::test]
async fn test_clock_skew_leaves_streak_unchanged() {
    let (services, clock) = setup();
    let user_id = test_user_id();
    register(&services, &user_id).await;

    clock.set(base_time() - Duration::hours(5));
    let outcome = services.ledger.update_streak(&user_id).await.unwrap();
    assert_eq!(outcome.transition, StreakTransition::ClockSkew);
    assert_eq!(outcome.streak_days, 1);

    let ledger = services.queries.get_ledger(&user_id).await.unwrap();
    assert_eq!(ledger.last_active(), base_time() - Duration::hours(5));
}

// ==================== 徽章与学习板块 ====================

#[tokio::test]
async fn test_award_same_badge_twice() {
    let (services, _clock) = setup();
    let user_id = test_user_id();
    register(&services, &user_id).await;

    let first = services
        .ledger
        .submit_badge(AwardBadgeRequest {
            user_id: user_id.clone(),
            name: "First Steps".to_string(),
            description: "Completed onboarding".to_string(),
            icon: Some("star".to_string()),
        })
        .await
        .unwrap();
    assert!(first.awarded);

    let second = services
        .ledger
        .award_badge(&user_id, "First Steps", "Completed onboarding", None)
        .await
        .unwrap();
    assert!(!second.awarded);
    assert_eq!(second.badges.len(), 1);
    assert_eq!(second.badges[0].icon, "star");

    let ledger = services.queries.get_ledger(&user_id).await.unwrap();
    let earned = ledger
        .activities()
        .iter()
        .filter(|a| a.kind == ActivityKind::BadgeEarned)
        .count();
    assert_eq!(earned, 1);
    assert_eq!(ledger.points(), 35);
}

#[tokio::test]
async fn test_complete_sections() {
    let (services, _clock) = setup();
    let user_id = test_user_id();
    register(&services, &user_id).await;

    services
        .ledger
        .update_completed_sections(&user_id, Section::Dyslexia, 1)
        .await
        .unwrap();
    let outcome = services
        .ledger
        .complete_section(CompleteSectionRequest {
            user_id: user_id.clone(),
            section: "dyslexia".to_string(),
            increment: 2,
        })
        .await
        .unwrap();
    assert_eq!(outcome.completed_sections.dyslexia, 3);
    assert_eq!(outcome.completed_sections.adhd, 0);

    let err = services
        .ledger
        .update_completed_sections(&user_id, Section::Adhd, -1)
        .await
        .unwrap_err();
    assert!(matches!(err, ProgressError::NegativeIncrement(-1)));

    let summary = services.queries.get_summary(&user_id).await.unwrap();
    assert_eq!(summary.points, 10 + 2 * 15);
    assert_eq!(
        summary.recent_activities.last().unwrap().details,
        "Completed dyslexia section"
    );
}

// ==================== 奖励与概览 ====================

#[tokio::test]
async fn test_standard_rewards() {
    let (services, _clock) = setup();
    let user_id = test_user_id();
    register(&services, &user_id).await;

    let events = [
        RewardEvent::ChatMessage,
        RewardEvent::TeacherBooked {
            teacher: "Ms. Rivera".to_string(),
        },
        RewardEvent::TeacherSessionCompleted {
            teacher: "Ms. Rivera".to_string(),
        },
        RewardEvent::FeedbackSubmitted {
            title: "Helpful".to_string(),
        },
        RewardEvent::TaskCreated {
            title: "Read chapter".to_string(),
        },
        RewardEvent::TaskCompleted {
            title: "Read chapter".to_string(),
        },
    ];

    let mut last = None;
    for event in events {
        last = Some(services.ledger.reward(&user_id, event).await.unwrap());
    }

    let outcome = last.unwrap();
    assert_eq!(outcome.points, 10 + 2 + 20 + 30 + 10 + 5 + 10);
    assert_eq!(outcome.level, 1);

    let ledger = services.queries.get_ledger(&user_id).await.unwrap();
    let details: Vec<_> = ledger.activities()[1..]
        .iter()
        .map(|a| a.details.as_str())
        .collect();
    assert_eq!(
        details,
        vec![
            "Chatbot interaction",
            "Booked session with Ms. Rivera",
            "Completed session with Ms. Rivera",
            "Submitted feedback: Helpful",
            "Created task: Read chapter",
            "Completed task: Read chapter",
        ]
    );
}

#[tokio::test]
async fn test_summary_returns_last_ten_in_order() {
    let (services, clock) = setup();
    let user_id = test_user_id();
    register(&services, &user_id).await;

    for i in 0..12 {
        clock.advance(Duration::minutes(1));
        services
            .ledger
            .record_activity(&user_id, ActivityKind::ResourceAccessed, 1, &format!("r{}", i))
            .await
            .unwrap();
    }

    let summary = services.queries.get_summary(&user_id).await.unwrap();
    assert_eq!(summary.recent_activities.len(), 10);
    assert_eq!(summary.recent_activities[0].details, "r2");
    assert_eq!(summary.recent_activities[9].details, "r11");
    assert_eq!(summary.points, 22);
}

// ==================== 排行榜 ====================

#[tokio::test]
async fn test_leaderboard_sorted_by_points() {
    let (services, _clock) = setup();

    for (user_id, extra) in [("lb-a", 290), ("lb-b", 90), ("lb-c", 190)] {
        register(&services, user_id).await;
        services
            .ledger
            .record_activity(user_id, ActivityKind::QuizCompleted, extra, "")
            .await
            .unwrap();
    }

    let board = services.queries.get_leaderboard(Some(3)).await.unwrap();
    let points: Vec<_> = board.iter().map(|e| e.points).collect();
    assert_eq!(points, vec![300, 200, 100]);
    assert_eq!(board[0].user_id, "lb-a");
    assert_eq!(board[0].level, 4);
    assert!(!board[0].name.is_empty());
}

#[tokio::test]
async fn test_leaderboard_omits_deleted_accounts() {
    let (services, _clock) = setup();
    register(&services, "lb-x").await;
    register(&services, "lb-y").await;

    services.account_repo.remove("lb-x");

    let board = services.queries.get_leaderboard(None).await.unwrap();
    let ids: Vec<_> = board.iter().map(|e| e.user_id.as_str()).collect();
    assert_eq!(ids, vec!["lb-y"]);
}

// ==================== 并发与故障 ====================

#[tokio::test]
async fn test_concurrent_rewards_lose_no_updates() {
    let (services, _clock) = setup();
    let user_id = test_user_id();
    register(&services, &user_id).await;

    let calls = (0..25).map(|_| services.ledger.reward(&user_id, RewardEvent::ChatMessage));
    let results = futures::future::join_all(calls).await;
    assert!(results.iter().all(|r| r.is_ok()));

    let ledger = services.queries.get_ledger(&user_id).await.unwrap();
    assert_eq!(ledger.points(), 10 + 25 * 2);
    assert_eq!(ledger.activities().len(), 26);
    assert_eq!(ledger.version(), 25);
}

#[tokio::test]
async fn test_concurrent_badge_awards_are_idempotent() {
    let (services, _clock) = setup();
    let user_id = test_user_id();
    register(&services, &user_id).await;

    let calls = (0..10).map(|_| {
        services
            .ledger
            .award_badge(&user_id, "Chatterbox", "Sent many messages", None)
    });
    let results = futures::future::join_all(calls).await;

    let awarded = results
        .into_iter()
        .filter(|r| r.as_ref().map(|o| o.awarded).unwrap_or(false))
        .count();
    assert_eq!(awarded, 1);

    let ledger = services.queries.get_ledger(&user_id).await.unwrap();
    assert_eq!(ledger.badges().len(), 1);
    assert_eq!(ledger.points(), 35);
}

/// 保存时阻塞的仓储，用于验证持久化超时
struct StalledSaveRepository {
    inner: MemoryProgressRepository,
    stall: StdDuration,
}

#[async_trait]
impl ProgressRepositoryTrait for StalledSaveRepository {
    async fn find_by_user(&self, user_id: &str) -> Result<Option<ProgressLedger>> {
        self.inner.find_by_user(user_id).await
    }

    async fn insert_if_absent(&self, ledger: &ProgressLedger) -> Result<bool> {
        self.inner.insert_if_absent(ledger).await
    }

    async fn save(&self, ledger: &ProgressLedger, expected_version: i64) -> Result<()> {
        tokio::time::sleep(self.stall).await;
        self.inner.save(ledger, expected_version).await
    }

    async fn top_by_points(&self, limit: i64) -> Result<Vec<LeaderboardRow>> {
        self.inner.top_by_points(limit).await
    }
}

#[tokio::test]
async fn test_save_timeout_discards_mutation() {
    let clock = Arc::new(ManualClock::new(base_time()));
    let settings = LedgerSettings {
        persistence_timeout_ms: 20,
        ..test_ledger_settings()
    };
    let repo = Arc::new(StalledSaveRepository {
        inner: MemoryProgressRepository::new(),
        stall: StdDuration::from_millis(500),
    });
    let services = ProgressServices::assemble(
        repo.clone(),
        Arc::new(MemoryAccountRepository::new()),
        Arc::new(LockManager::local(LockConfig::from(&settings))),
        clock,
        settings,
    );

    services
        .ledger
        .register(RegisterRequest {
            user_id: "slow".to_string(),
            name: "Slow Sam".to_string(),
        })
        .await
        .unwrap();

    let err = services
        .ledger
        .reward("slow", RewardEvent::ChatMessage)
        .await
        .unwrap_err();
    assert!(matches!(err, ProgressError::PersistenceTimeout { .. }));
    assert_eq!(err.kind(), ErrorKind::PersistenceFailure);

    let ledger = repo.inner.find_by_user("slow").await.unwrap().unwrap();
    assert_eq!(ledger.points(), 10);
    assert_eq!(ledger.activities().len(), 1);
}

/// 刷新登录时间总是失败的账户仓储
struct FailingTouchAccounts {
    inner: MemoryAccountRepository,
}

#[async_trait]
impl AccountRepositoryTrait for FailingTouchAccounts {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<Account>> {
        self.inner.find_by_id(user_id).await
    }

    async fn find_by_ids(&self, user_ids: &[String]) -> Result<Vec<Account>> {
        self.inner.find_by_ids(user_ids).await
    }

    async fn create(&self, account: &Account) -> Result<bool> {
        self.inner.create(account).await
    }

    async fn touch_last_login(&self, _user_id: &str, _at: DateTime<Utc>) -> Result<()> {
        Err(ProgressError::Database(sqlx::Error::PoolTimedOut))
    }
}

#[tokio::test]
async fn test_failed_login_commits_nothing() {
    let clock = Arc::new(ManualClock::new(base_time()));
    let settings = test_ledger_settings();
    let repo = Arc::new(MemoryProgressRepository::new());
    let services = ProgressServices::assemble(
        repo.clone(),
        Arc::new(FailingTouchAccounts {
            inner: MemoryAccountRepository::new(),
        }),
        Arc::new(LockManager::local(LockConfig::from(&settings))),
        clock.clone(),
        settings,
    );
    let user_id = test_user_id();

    services
        .ledger
        .register(RegisterRequest {
            user_id: user_id.clone(),
            name: Name().fake::<String>(),
        })
        .await
        .unwrap();

    clock.advance(Duration::hours(25));
    for _ in 0..2 {
        let err = assert_err!(services.ledger.record_login(&user_id).await);
        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
    }

    let ledger = repo.find_by_user(&user_id).await.unwrap().unwrap();
    assert_eq!(ledger.points(), 10);
    assert_eq!(ledger.activities().len(), 1);
    assert_eq!(ledger.streak_days(), 1);
    assert_eq!(ledger.version(), 0);
}
