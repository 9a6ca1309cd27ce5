//! 服务装配
//!
//! 由 [`AppConfig`] 组装仓储、锁管理器和服务。
//! PostgreSQL 装配用于部署，内存装配用于测试和本地开发。

use std::sync::Arc;

use tracing::{info, instrument};

use progress_shared::config::{AppConfig, LedgerSettings};
use progress_shared::database::Database;
use progress_shared::error::InfraError;
use progress_shared::observability::{self, ObservabilityGuard};

use crate::clock::{Clock, SystemClock};
use crate::error::{ProgressError, Result};
use crate::lock::{LockConfig, LockManager};
use crate::repository::{
    AccountRepository, AccountRepositoryTrait, MemoryAccountRepository, MemoryProgressRepository,
    ProgressRepository, ProgressRepositoryTrait,
};
use crate::service::{ProgressQueryService, ProgressService};

/// 装配完成的服务集合
pub struct ProgressServices<R, A>
where
    R: ProgressRepositoryTrait,
    A: AccountRepositoryTrait,
{
    pub progress_repo: Arc<R>,
    pub account_repo: Arc<A>,
    pub ledger: ProgressService<R, A>,
    pub queries: ProgressQueryService<R, A>,
}

impl<R, A> ProgressServices<R, A>
where
    R: ProgressRepositoryTrait,
    A: AccountRepositoryTrait,
{
    pub fn assemble(
        progress_repo: Arc<R>,
        account_repo: Arc<A>,
        lock_manager: Arc<LockManager>,
        clock: Arc<dyn Clock>,
        settings: LedgerSettings,
    ) -> Self {
        let ledger = ProgressService::new(
            progress_repo.clone(),
            account_repo.clone(),
            lock_manager,
            clock,
            settings.clone(),
        );
        let queries = ProgressQueryService::new(progress_repo.clone(), account_repo.clone(), settings);

        Self {
            progress_repo,
            account_repo,
            ledger,
            queries,
        }
    }
}

/// PostgreSQL 装配
pub type PgProgressServices = ProgressServices<ProgressRepository, AccountRepository>;

/// 内存装配
pub type MemoryProgressServices = ProgressServices<MemoryProgressRepository, MemoryAccountRepository>;

impl PgProgressServices {
    /// 连接数据库（按配置执行迁移）和可选的 Redis，组装服务
    ///
    /// 用户锁优先使用 Redis，Redis 出错时降级到数据库锁表
    #[instrument(skip(config), fields(service = %config.service_name))]
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let db = Database::connect(&config.database).await?;
        db.health_check().await?;
        info!("Database connection established");

        let redis_client = config.redis.client()?;
        if redis_client.is_some() {
            info!("Redis lock backend enabled");
        }

        let pool = db.pool().clone();
        let lock_manager = Arc::new(LockManager::new(
            redis_client,
            Some(pool.clone()),
            LockConfig::from(&config.ledger),
        ));

        Ok(Self::assemble(
            Arc::new(ProgressRepository::new(pool.clone())),
            Arc::new(AccountRepository::new(pool)),
            lock_manager,
            Arc::new(SystemClock),
            config.ledger.clone(),
        ))
    }
}

/// 宿主进程启动入口
///
/// 加载配置、初始化日志与指标、连接存储并组装服务。
/// 返回的 guard 需要在进程生命周期内持有。
pub async fn start(service_name: &str) -> Result<(PgProgressServices, ObservabilityGuard)> {
    let config = AppConfig::load(service_name).map_err(InfraError::from)?;

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let guard = observability::init(&obs_config)
        .await
        .map_err(|e| ProgressError::Internal(format!("可观测性初始化失败: {}", e)))?;

    info!(
        environment = %config.environment,
        production = config.is_production(),
        "Configuration loaded"
    );

    let services = PgProgressServices::connect(&config).await?;
    info!("Progress services ready");
    Ok((services, guard))
}

impl MemoryProgressServices {
    /// 内存仓储 + 进程内锁
    pub fn in_memory(settings: LedgerSettings, clock: Arc<dyn Clock>) -> Self {
        let lock_manager = Arc::new(LockManager::local(LockConfig::from(&settings)));
        Self::assemble(
            Arc::new(MemoryProgressRepository::new()),
            Arc::new(MemoryAccountRepository::new()),
            lock_manager,
            clock,
            settings,
        )
    }
}
