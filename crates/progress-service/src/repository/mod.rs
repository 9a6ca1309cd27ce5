//! 数据库仓储层
//!
//! 提供账本和账户的数据访问接口，封装 SQL 操作细节。
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，不包含业务逻辑
//! - 账本整体保存，使用 `version` 列做乐观并发控制
//! - 内存实现与 PostgreSQL 实现遵循相同的版本语义，用于测试和本地开发
//! - 定义 trait 接口以支持 mock 测试

mod account_repo;
mod memory;
mod progress_repo;
mod traits;

pub use account_repo::AccountRepository;
pub use memory::{MemoryAccountRepository, MemoryProgressRepository};
pub use progress_repo::ProgressRepository;
pub use traits::*;
