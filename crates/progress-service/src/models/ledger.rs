//! 用户进度账本
//!
//! 每个用户一份账本，聚合积分、等级、连续天数、活动流水、徽章和板块完成计数。
//!
//! ## 不变量
//!
//! - `level == 1 + points / 100`，任何积分变化后立即重算
//! - 活动流水只追加，不修改不删除
//! - 徽章按名称唯一
//! - 连续天数只会被置 1、加 1 或保持不变

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{ActivityKind, Section, StreakTransition};
use crate::error::{ProgressError, Result};

/// 每升一级所需积分
pub const POINTS_PER_LEVEL: i64 = 100;
/// 获得徽章奖励的积分
pub const BADGE_POINTS: i64 = 25;
/// 完成一个学习板块奖励的积分
pub const SECTION_POINTS: i64 = 15;
/// 徽章默认图标
pub const DEFAULT_BADGE_ICON: &str = "trophy";

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// 根据积分计算等级
pub fn level_for_points(points: i64) -> i64 {
    1 + points.max(0) / POINTS_PER_LEVEL
}

/// 两个时间点之间经过的整天数（向下取整，可为负）
pub fn day_difference(last_active: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - last_active)
        .num_milliseconds()
        .div_euclid(MILLIS_PER_DAY)
}

/// 活动流水
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub points: i64,
    pub timestamp: DateTime<Utc>,
    pub details: String,
}

/// 已获得的徽章
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeRecord {
    pub name: String,
    pub description: String,
    pub earned_at: DateTime<Utc>,
    pub icon: String,
}

/// 各学习板块完成次数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedSections {
    pub autism: i32,
    pub adhd: i32,
    pub dyslexia: i32,
}

impl CompletedSections {
    pub fn get(&self, section: Section) -> i32 {
        match section {
            Section::Autism => self.autism,
            Section::Adhd => self.adhd,
            Section::Dyslexia => self.dyslexia,
        }
    }

    fn slot_mut(&mut self, section: Section) -> &mut i32 {
        match section {
            Section::Autism => &mut self.autism,
            Section::Adhd => &mut self.adhd,
            Section::Dyslexia => &mut self.dyslexia,
        }
    }
}

/// 用户进度账本
///
/// 字段只在 crate 内可写，外部只能通过业务方法修改，保证不变量始终成立。
/// `version` 是乐观锁版本号，每次持久化加一。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressLedger {
    pub(crate) user_id: String,
    pub(crate) points: i64,
    pub(crate) level: i64,
    pub(crate) streak_days: i32,
    pub(crate) last_active: DateTime<Utc>,
    pub(crate) activities: Vec<Activity>,
    pub(crate) badges: Vec<BadgeRecord>,
    pub(crate) completed_sections: CompletedSections,
    #[serde(skip)]
    pub(crate) version: i64,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl ProgressLedger {
    fn empty(user_id: String, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            points: 0,
            level: 1,
            streak_days: 0,
            last_active: now,
            activities: Vec::new(),
            badges: Vec::new(),
            completed_sections: CompletedSections::default(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// 以首次活动创建账本
    ///
    /// 首次活动即视为连续活跃的第一天
    pub fn with_first_activity(
        user_id: impl Into<String>,
        kind: ActivityKind,
        points: i64,
        details: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let mut ledger = Self::empty(user_id.into(), now);
        ledger.record_activity(kind, points, details, now)?;
        ledger.streak_days = 1;
        Ok(ledger)
    }

    /// 从持久化数据还原账本
    ///
    /// 等级不取存储值，始终按积分重算
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        user_id: String,
        points: i64,
        streak_days: i32,
        last_active: DateTime<Utc>,
        activities: Vec<Activity>,
        badges: Vec<BadgeRecord>,
        completed_sections: CompletedSections,
        version: i64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            points,
            level: level_for_points(points),
            streak_days,
            last_active,
            activities,
            badges,
            completed_sections,
            version,
            created_at,
            updated_at,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn points(&self) -> i64 {
        self.points
    }

    pub fn level(&self) -> i64 {
        self.level
    }

    pub fn streak_days(&self) -> i32 {
        self.streak_days
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active
    }

    pub fn activities(&self) -> &[Activity] {
        &self.activities
    }

    pub fn badges(&self) -> &[BadgeRecord] {
        &self.badges
    }

    pub fn completed_sections(&self) -> CompletedSections {
        self.completed_sections
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// 最近 limit 条活动，按时间正序
    pub fn recent_activities(&self, limit: usize) -> &[Activity] {
        let start = self.activities.len().saturating_sub(limit);
        &self.activities[start..]
    }

    pub fn has_badge(&self, name: &str) -> bool {
        self.badges.iter().any(|b| b.name == name)
    }

    /// 记录一次活动
    ///
    /// 追加流水、累加积分、重算等级并刷新最后活跃时间，返回新的累计积分。
    /// 不做去重，同一天的多次同类活动都会留下流水。
    pub fn record_activity(
        &mut self,
        kind: ActivityKind,
        points: i64,
        details: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        if points < 0 {
            return Err(ProgressError::NegativePoints(points));
        }
        let total = self
            .points
            .checked_add(points)
            .ok_or_else(|| ProgressError::Validation("积分累计溢出".to_string()))?;

        self.activities.push(Activity {
            kind,
            points,
            timestamp: now,
            details: details.into(),
        });
        self.points = total;
        self.recompute_level();
        self.last_active = now;
        self.updated_at = now;

        Ok(self.points)
    }

    /// 更新连续活跃天数
    ///
    /// | 间隔整天数 | 连续天数 |
    /// |---|---|
    /// | 0 | 不变 |
    /// | 1 | +1 |
    /// | >1 | 置为 1 |
    /// | <0 | 不变，返回 `ClockSkew` 供调用方记录 |
    ///
    /// 无论哪个分支，最后活跃时间都会被设置为 `now`。
    pub fn update_streak(&mut self, now: DateTime<Utc>) -> StreakTransition {
        let transition = match day_difference(self.last_active, now) {
            0 => StreakTransition::Unchanged,
            1 => {
                self.streak_days = self.streak_days.saturating_add(1);
                StreakTransition::Incremented
            }
            d if d > 1 => {
                self.streak_days = 1;
                StreakTransition::Reset
            }
            _ => StreakTransition::ClockSkew,
        };

        self.last_active = now;
        self.updated_at = now;
        transition
    }

    /// 授予徽章
    ///
    /// 同名徽章已存在时不做任何修改并返回 `false`；
    /// 否则追加徽章并记录一条 `badge_earned` 活动（25 积分）。
    pub fn award_badge(
        &mut self,
        name: &str,
        description: &str,
        icon: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if name.trim().is_empty() {
            return Err(ProgressError::Validation("徽章名称不能为空".to_string()));
        }
        if self.has_badge(name) {
            return Ok(false);
        }

        self.badges.push(BadgeRecord {
            name: name.to_string(),
            description: description.to_string(),
            earned_at: now,
            icon: icon.unwrap_or(DEFAULT_BADGE_ICON).to_string(),
        });
        self.record_activity(
            ActivityKind::BadgeEarned,
            BADGE_POINTS,
            format!("Earned badge: {}", name),
            now,
        )?;

        Ok(true)
    }

    /// 累加学习板块完成次数，并记录一条 `resource_accessed` 活动（15 积分）
    pub fn update_completed_sections(
        &mut self,
        section: Section,
        increment: i32,
        now: DateTime<Utc>,
    ) -> Result<CompletedSections> {
        if increment < 0 {
            return Err(ProgressError::NegativeIncrement(increment));
        }
        let current = self.completed_sections.get(section);
        let next = current
            .checked_add(increment)
            .ok_or_else(|| ProgressError::Validation("板块完成次数溢出".to_string()))?;

        self.record_activity(
            ActivityKind::ResourceAccessed,
            SECTION_POINTS,
            format!("Completed {} section", section),
            now,
        )?;
        *self.completed_sections.slot_mut(section) = next;

        Ok(self.completed_sections)
    }

    /// 按积分重算等级
    pub fn recompute_level(&mut self) -> i64 {
        self.level = level_for_points(self.points);
        self.level
    }

    /// 持久化前推进版本号，返回推进前的版本（即写入时的期望版本）
    pub(crate) fn bump_version(&mut self) -> i64 {
        let expected = self.version;
        self.version += 1;
        expected
    }
}
