//! 领域模型
//!
//! - [`ProgressLedger`]: 用户进度账本（聚合根）
//! - [`Account`]: 账户显示信息
//! - [`RewardEvent`]: 标准积分奖励

mod account;
mod enums;
mod ledger;
mod reward;

pub use account::Account;
pub use enums::{ActivityKind, Section, StreakTransition};
pub use ledger::{
    Activity, BadgeRecord, CompletedSections, ProgressLedger, BADGE_POINTS, DEFAULT_BADGE_ICON,
    POINTS_PER_LEVEL, SECTION_POINTS, day_difference, level_for_points,
};
pub use reward::RewardEvent;

use sqlx::FromRow;

/// 排行榜查询行
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct LeaderboardRow {
    pub user_id: String,
    pub points: i64,
    pub level: i64,
    pub streak_days: i32,
    pub badge_count: i64,
}
