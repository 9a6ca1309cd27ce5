//! 服务层
//!
//! 实现账本业务流程，协调仓储、锁和时钟。
//!
//! ## 模块结构
//!
//! - `dto`: 数据传输对象定义
//! - `progress_service`: 账本写入服务（加锁的读改写）
//! - `query_service`: 账本查询服务（只读操作）

pub mod dto;
pub mod progress_service;
pub mod query_service;

pub use dto::*;
pub use progress_service::ProgressService;
pub use query_service::ProgressQueryService;

use std::future::Future;
use std::time::Duration;

use crate::error::{ProgressError, Result};

/// 为一次持久化调用加上超时
pub(crate) async fn bounded<T, F>(limit: Duration, operation: &str, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, work).await {
        Ok(result) => result,
        Err(_) => Err(ProgressError::PersistenceTimeout {
            operation: operation.to_string(),
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}
