//! 进度账本仓储
//!
//! 账本拆分为四部分存储：标量行（`user_progress`）、活动流水（`progress_activities`）、
//! 徽章（`progress_badges`）。保存在一个事务内完成，标量行通过 `version` 列做乐观锁。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::{debug, instrument};

use super::traits::ProgressRepositoryTrait;
use crate::error::{ProgressError, Result};
use crate::models::{
    Activity, ActivityKind, BadgeRecord, CompletedSections, LeaderboardRow, ProgressLedger,
};

#[derive(Debug, FromRow)]
struct ProgressRow {
    user_id: String,
    points: i64,
    streak_days: i32,
    last_active: DateTime<Utc>,
    autism_sections: i32,
    adhd_sections: i32,
    dyslexia_sections: i32,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct ActivityRow {
    activity_type: String,
    points: i64,
    occurred_at: DateTime<Utc>,
    details: String,
}

impl TryFrom<ActivityRow> for Activity {
    type Error = ProgressError;

    fn try_from(row: ActivityRow) -> Result<Self> {
        Ok(Activity {
            kind: ActivityKind::parse(&row.activity_type)?,
            points: row.points,
            timestamp: row.occurred_at,
            details: row.details,
        })
    }
}

#[derive(Debug, FromRow)]
struct BadgeRow {
    name: String,
    description: String,
    icon: String,
    earned_at: DateTime<Utc>,
}

impl From<BadgeRow> for BadgeRecord {
    fn from(row: BadgeRow) -> Self {
        BadgeRecord {
            name: row.name,
            description: row.description,
            earned_at: row.earned_at,
            icon: row.icon,
        }
    }
}

/// 进度账本仓储（PostgreSQL）
pub struct ProgressRepository {
    pool: PgPool,
}

impl ProgressRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 加载完整账本
    #[instrument(skip(self))]
    pub async fn find_by_user(&self, user_id: &str) -> Result<Option<ProgressLedger>> {
        let row = sqlx::query_as::<_, ProgressRow>(
            r#"
            SELECT user_id, points, streak_days, last_active,
                   autism_sections, adhd_sections, dyslexia_sections,
                   version, created_at, updated_at
            FROM user_progress
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let activities = sqlx::query_as::<_, ActivityRow>(
            r#"
            SELECT activity_type, points, occurred_at, details
            FROM progress_activities
            WHERE user_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Activity::try_from)
        .collect::<Result<Vec<_>>>()?;

        let badges = sqlx::query_as::<_, BadgeRow>(
            r#"
            SELECT name, description, icon, earned_at
            FROM progress_badges
            WHERE user_id = $1
            ORDER BY earned_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(BadgeRecord::from)
        .collect();

        Ok(Some(ProgressLedger::restore(
            row.user_id,
            row.points,
            row.streak_days,
            row.last_active,
            activities,
            badges,
            CompletedSections {
                autism: row.autism_sections,
                adhd: row.adhd_sections,
                dyslexia: row.dyslexia_sections,
            },
            row.version,
            row.created_at,
            row.updated_at,
        )))
    }

    /// 账本不存在时写入
    #[instrument(skip(self, ledger), fields(user_id = %ledger.user_id()))]
    pub async fn insert_if_absent(&self, ledger: &ProgressLedger) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let sections = ledger.completed_sections();
        let result = sqlx::query(
            r#"
            INSERT INTO user_progress (
                user_id, points, level, streak_days, last_active,
                autism_sections, adhd_sections, dyslexia_sections,
                version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(ledger.user_id())
        .bind(ledger.points())
        .bind(ledger.level())
        .bind(ledger.streak_days())
        .bind(ledger.last_active())
        .bind(sections.autism)
        .bind(sections.adhd)
        .bind(sections.dyslexia)
        .bind(ledger.version())
        .bind(ledger.created_at())
        .bind(ledger.updated_at())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            debug!("账本已存在，跳过写入");
            return Ok(false);
        }

        Self::append_activities_in_tx(&mut tx, ledger, 0).await?;
        Self::insert_badges_in_tx(&mut tx, ledger).await?;

        tx.commit().await?;
        Ok(true)
    }

    /// 带版本校验的整体保存
    #[instrument(skip(self, ledger), fields(user_id = %ledger.user_id()))]
    pub async fn save(&self, ledger: &ProgressLedger, expected_version: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let sections = ledger.completed_sections();
        let result = sqlx::query(
            r#"
            UPDATE user_progress
            SET points = $2, level = $3, streak_days = $4, last_active = $5,
                autism_sections = $6, adhd_sections = $7, dyslexia_sections = $8,
                version = $9, updated_at = $10
            WHERE user_id = $1 AND version = $11
            "#,
        )
        .bind(ledger.user_id())
        .bind(ledger.points())
        .bind(ledger.level())
        .bind(ledger.streak_days())
        .bind(ledger.last_active())
        .bind(sections.autism)
        .bind(sections.adhd)
        .bind(sections.dyslexia)
        .bind(ledger.version())
        .bind(ledger.updated_at())
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(ProgressError::ConcurrencyConflict {
                user_id: ledger.user_id().to_string(),
            });
        }

        let persisted: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM progress_activities WHERE user_id = $1"#,
        )
        .bind(ledger.user_id())
        .fetch_one(&mut *tx)
        .await?;

        Self::append_activities_in_tx(&mut tx, ledger, persisted as usize).await?;
        Self::insert_badges_in_tx(&mut tx, ledger).await?;

        tx.commit().await?;
        debug!(version = ledger.version(), "账本已保存");
        Ok(())
    }

    /// 积分排行
    #[instrument(skip(self))]
    pub async fn top_by_points(&self, limit: i64) -> Result<Vec<LeaderboardRow>> {
        let rows = sqlx::query_as::<_, LeaderboardRow>(
            r#"
            SELECT p.user_id, p.points, p.level, p.streak_days,
                   (SELECT COUNT(*) FROM progress_badges b WHERE b.user_id = p.user_id) AS badge_count
            FROM user_progress p
            ORDER BY p.points DESC, p.user_id ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// 追加从 `from` 开始的活动流水
    ///
    /// 流水只追加，`seq` 即活动在账本中的下标
    async fn append_activities_in_tx(
        tx: &mut PgConnection,
        ledger: &ProgressLedger,
        from: usize,
    ) -> Result<()> {
        for (seq, activity) in ledger.activities().iter().enumerate().skip(from) {
            sqlx::query(
                r#"
                INSERT INTO progress_activities (user_id, seq, activity_type, points, occurred_at, details)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(ledger.user_id())
            .bind(seq as i64)
            .bind(activity.kind.as_str())
            .bind(activity.points)
            .bind(activity.timestamp)
            .bind(&activity.details)
            .execute(&mut *tx)
            .await?;
        }
        Ok(())
    }

    async fn insert_badges_in_tx(tx: &mut PgConnection, ledger: &ProgressLedger) -> Result<()> {
        for badge in ledger.badges() {
            sqlx::query(
                r#"
                INSERT INTO progress_badges (user_id, name, description, icon, earned_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (user_id, name) DO NOTHING
                "#,
            )
            .bind(ledger.user_id())
            .bind(&badge.name)
            .bind(&badge.description)
            .bind(&badge.icon)
            .bind(badge.earned_at)
            .execute(&mut *tx)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProgressRepositoryTrait for ProgressRepository {
    async fn find_by_user(&self, user_id: &str) -> Result<Option<ProgressLedger>> {
        self.find_by_user(user_id).await
    }

    async fn insert_if_absent(&self, ledger: &ProgressLedger) -> Result<bool> {
        self.insert_if_absent(ledger).await
    }

    async fn save(&self, ledger: &ProgressLedger, expected_version: i64) -> Result<()> {
        self.save(ledger, expected_version).await
    }

    async fn top_by_points(&self, limit: i64) -> Result<Vec<LeaderboardRow>> {
        self.top_by_points(limit).await
    }
}
