//! 时钟抽象
//!
//! 账本的所有时间戳都来自注入的 [`Clock`]，测试中可以用 [`ManualClock`] 精确控制时间流逝。

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// 当前时间来源
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动推进的时钟
///
/// 时间只会在调用 `set` 或 `advance` 时变化
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(at) }
    }

    /// 设置为指定时间（允许回拨，用于模拟时钟偏移）
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    /// 向前推进一段时间
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
