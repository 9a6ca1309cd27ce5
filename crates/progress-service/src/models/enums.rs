//! 进度账本枚举类型定义
//!
//! 活动类型以字符串标签持久化，学习板块为固定集合

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ProgressError;

/// 自定义活动标签格式：小写字母开头，仅含小写字母、数字和下划线
static CUSTOM_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,63}$").unwrap());

/// 活动类型
///
/// 内置类型覆盖平台已知的积分来源，`Custom` 承载调用方扩展的标签。
/// 所有入口都应经过 [`ActivityKind::parse`]，保证已知标签不会落入 `Custom`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ActivityKind {
    Login,
    LessonCompleted,
    QuizCompleted,
    TeacherBooking,
    DiaryEntry,
    MeditationSession,
    ChatInteraction,
    ResourceAccessed,
    BadgeEarned,
    TaskCreated,
    TaskCompleted,
    Feedback,
    /// 调用方扩展的活动标签
    Custom(String),
}

impl ActivityKind {
    /// 解析并校验活动标签
    pub fn parse(tag: &str) -> Result<Self, ProgressError> {
        let kind = match tag {
            "login" => Self::Login,
            "lesson_completed" => Self::LessonCompleted,
            "quiz_completed" => Self::QuizCompleted,
            "teacher_booking" => Self::TeacherBooking,
            "diary_entry" => Self::DiaryEntry,
            "meditation_session" => Self::MeditationSession,
            "chat_interaction" => Self::ChatInteraction,
            "resource_accessed" => Self::ResourceAccessed,
            "badge_earned" => Self::BadgeEarned,
            "task_created" => Self::TaskCreated,
            "task_completed" => Self::TaskCompleted,
            "feedback" => Self::Feedback,
            other if CUSTOM_TAG.is_match(other) => Self::Custom(other.to_string()),
            other => return Err(ProgressError::InvalidActivityKind(other.to_string())),
        };
        Ok(kind)
    }

    /// 持久化使用的标签
    pub fn as_str(&self) -> &str {
        match self {
            Self::Login => "login",
            Self::LessonCompleted => "lesson_completed",
            Self::QuizCompleted => "quiz_completed",
            Self::TeacherBooking => "teacher_booking",
            Self::DiaryEntry => "diary_entry",
            Self::MeditationSession => "meditation_session",
            Self::ChatInteraction => "chat_interaction",
            Self::ResourceAccessed => "resource_accessed",
            Self::BadgeEarned => "badge_earned",
            Self::TaskCreated => "task_created",
            Self::TaskCompleted => "task_completed",
            Self::Feedback => "feedback",
            Self::Custom(tag) => tag,
        }
    }

    /// 是否为内置类型
    pub fn is_builtin(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = ProgressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ActivityKind {
    type Error = ProgressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ActivityKind> for String {
    fn from(kind: ActivityKind) -> Self {
        kind.as_str().to_string()
    }
}

/// 学习板块
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Autism,
    Adhd,
    Dyslexia,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Autism, Section::Adhd, Section::Dyslexia];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Autism => "autism",
            Self::Adhd => "adhd",
            Self::Dyslexia => "dyslexia",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = ProgressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "autism" => Ok(Self::Autism),
            "adhd" => Ok(Self::Adhd),
            "dyslexia" => Ok(Self::Dyslexia),
            other => Err(ProgressError::UnknownSection(other.to_string())),
        }
    }
}

/// 连续天数状态迁移结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreakTransition {
    /// 同一天内重复活动
    Unchanged,
    /// 恰好间隔一天
    Incremented,
    /// 间隔超过一天，重新从 1 开始
    Reset,
    /// 上次活跃时间晚于当前时间
    ClockSkew,
}

impl StreakTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Incremented => "incremented",
            Self::Reset => "reset",
            Self::ClockSkew => "clock_skew",
        }
    }
}
