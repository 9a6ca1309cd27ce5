//! 用户级锁模块
//!
//! 每个用户的「加载 → 修改 → 保存」序列都在 `progress:{user_id}` 锁内执行。
//!
//! ## 后端选择
//!
//! - **Redis**: 配置了 Redis 时优先使用，资源被占用时重试后返回 `LockConflict`
//! - **数据库**: Redis 出错时降级到 PostgreSQL `distributed_locks` 表
//! - **进程内**: 两者都未配置时使用按 key 的 tokio 互斥锁
//!
//! ```ignore
//! let guard = lock_manager.acquire("progress:user-1", None).await?;
//! do_critical_work().await?;
//! guard.release().await?;
//! ```

mod lock_manager;

pub use lock_manager::{LockConfig, LockGuard, LockManager};
