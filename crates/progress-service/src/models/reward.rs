//! 标准积分奖励
//!
//! 平台各业务入口（聊天、预约、反馈、任务）产生的固定积分奖励

use super::enums::ActivityKind;

/// 聊天互动奖励
pub const CHAT_MESSAGE_POINTS: i64 = 2;
/// 预约老师奖励
pub const TEACHER_BOOKED_POINTS: i64 = 20;
/// 完成老师辅导奖励
pub const TEACHER_SESSION_COMPLETED_POINTS: i64 = 30;
/// 提交反馈奖励
pub const FEEDBACK_SUBMITTED_POINTS: i64 = 10;
/// 创建任务奖励
pub const TASK_CREATED_POINTS: i64 = 5;
/// 完成任务奖励
pub const TASK_COMPLETED_POINTS: i64 = 10;

/// 奖励事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewardEvent {
    ChatMessage,
    TeacherBooked { teacher: String },
    TeacherSessionCompleted { teacher: String },
    FeedbackSubmitted { title: String },
    TaskCreated { title: String },
    TaskCompleted { title: String },
}

impl RewardEvent {
    pub fn kind(&self) -> ActivityKind {
        match self {
            Self::ChatMessage => ActivityKind::ChatInteraction,
            Self::TeacherBooked { .. } | Self::TeacherSessionCompleted { .. } => {
                ActivityKind::TeacherBooking
            }
            Self::FeedbackSubmitted { .. } => ActivityKind::Feedback,
            Self::TaskCreated { .. } => ActivityKind::TaskCreated,
            Self::TaskCompleted { .. } => ActivityKind::TaskCompleted,
        }
    }

    pub fn points(&self) -> i64 {
        match self {
            Self::ChatMessage => CHAT_MESSAGE_POINTS,
            Self::TeacherBooked { .. } => TEACHER_BOOKED_POINTS,
            Self::TeacherSessionCompleted { .. } => TEACHER_SESSION_COMPLETED_POINTS,
            Self::FeedbackSubmitted { .. } => FEEDBACK_SUBMITTED_POINTS,
            Self::TaskCreated { .. } => TASK_CREATED_POINTS,
            Self::TaskCompleted { .. } => TASK_COMPLETED_POINTS,
        }
    }

    /// 活动流水中的描述文本
    pub fn details(&self) -> String {
        match self {
            Self::ChatMessage => "Chatbot interaction".to_string(),
            Self::TeacherBooked { teacher } => format!("Booked session with {}", teacher),
            Self::TeacherSessionCompleted { teacher } => {
                format!("Completed session with {}", teacher)
            }
            Self::FeedbackSubmitted { title } => format!("Submitted feedback: {}", title),
            Self::TaskCreated { title } => format!("Created task: {}", title),
            Self::TaskCompleted { title } => format!("Completed task: {}", title),
        }
    }
}
