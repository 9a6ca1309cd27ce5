//! 服务层数据传输对象
//!
//! 请求 DTO 在边界处通过 `validator` 校验，响应 DTO 与内部账本模型解耦

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{
    Activity, BadgeRecord, CompletedSections, ProgressLedger, StreakTransition,
};

// ==================== 请求 ====================

/// 注册请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 64, message = "用户ID长度必须在1-64个字符之间"))]
    pub user_id: String,
    #[validate(length(min = 1, max = 255, message = "用户名称长度必须在1-255个字符之间"))]
    pub name: String,
}

/// 记录活动请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RecordActivityRequest {
    #[validate(length(min = 1, max = 64, message = "用户ID长度必须在1-64个字符之间"))]
    pub user_id: String,
    /// 活动标签，内容格式由 `ActivityKind::parse` 校验
    #[validate(length(min = 1, max = 64, message = "活动类型长度必须在1-64个字符之间"))]
    pub activity_type: String,
    #[validate(range(min = 0, message = "积分不能为负数"))]
    pub points: i64,
    #[serde(default)]
    #[validate(length(max = 500, message = "活动描述不能超过500个字符"))]
    pub details: String,
    /// 是否先更新连续天数（账本不存在时自动创建）
    #[serde(default)]
    pub update_streak: bool,
}

/// 授予徽章请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AwardBadgeRequest {
    #[validate(length(min = 1, max = 64, message = "用户ID长度必须在1-64个字符之间"))]
    pub user_id: String,
    #[validate(length(min = 1, max = 255, message = "徽章名称长度必须在1-255个字符之间"))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 500, message = "徽章描述不能超过500个字符"))]
    pub description: String,
    #[validate(length(min = 1, max = 64, message = "徽章图标长度必须在1-64个字符之间"))]
    pub icon: Option<String>,
}

fn default_increment() -> i32 {
    1
}

/// 完成学习板块请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CompleteSectionRequest {
    #[validate(length(min = 1, max = 64, message = "用户ID长度必须在1-64个字符之间"))]
    pub user_id: String,
    pub section: String,
    #[serde(default = "default_increment")]
    #[validate(range(min = 0, message = "增量不能为负数"))]
    pub increment: i32,
}

// ==================== 响应 ====================

/// 记录活动结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityOutcome {
    pub points: i64,
    pub level: i64,
}

/// 积分、等级和连续天数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressTotals {
    pub points: i64,
    pub level: i64,
    pub streak_days: i32,
}

impl From<&ProgressLedger> for ProgressTotals {
    fn from(ledger: &ProgressLedger) -> Self {
        Self {
            points: ledger.points(),
            level: ledger.level(),
            streak_days: ledger.streak_days(),
        }
    }
}

/// 更新连续天数结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakOutcome {
    pub streak_days: i32,
    pub transition: StreakTransition,
}

/// 授予徽章结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgesOutcome {
    pub badges: Vec<BadgeRecord>,
    /// 本次是否新授予（同名徽章已存在时为 false）
    pub awarded: bool,
}

/// 板块完成结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionsOutcome {
    pub completed_sections: CompletedSections,
}

/// 进度概览
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    pub level: i64,
    pub points: i64,
    pub streak_days: i32,
    pub badges: Vec<BadgeRecord>,
    pub completed_sections: CompletedSections,
    /// 最近的活动，按时间正序
    pub recent_activities: Vec<Activity>,
}

impl ProgressSummary {
    pub fn from_ledger(ledger: &ProgressLedger, recent_limit: usize) -> Self {
        Self {
            level: ledger.level(),
            points: ledger.points(),
            streak_days: ledger.streak_days(),
            badges: ledger.badges().to_vec(),
            completed_sections: ledger.completed_sections(),
            recent_activities: ledger.recent_activities(recent_limit).to_vec(),
        }
    }
}

/// 排行榜条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub name: String,
    pub points: i64,
    pub level: i64,
    pub streak_days: i32,
    pub badge_count: i64,
}
