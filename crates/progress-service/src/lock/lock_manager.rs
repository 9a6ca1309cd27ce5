//! 分布式锁管理器
//!
//! Redis 优先、数据库后备；两者都未配置时使用进程内互斥锁。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use redis::Client as RedisClient;
use sqlx::PgPool;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::{ProgressError, Result};
use progress_shared::config::LedgerSettings;

/// 进程内锁表，按 key 存放互斥锁
type LocalLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// 锁配置
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// 默认锁超时时间
    pub default_ttl: Duration,
    /// 获取锁重试次数
    pub retry_count: u32,
    /// 重试间隔
    pub retry_delay: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(30),
            retry_count: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl From<&LedgerSettings> for LockConfig {
    fn from(settings: &LedgerSettings) -> Self {
        Self {
            default_ttl: settings.lock_ttl(),
            retry_count: settings.lock_retry_count,
            retry_delay: settings.lock_retry_delay(),
        }
    }
}

/// 分布式锁管理器
///
/// 优先使用 Redis 实现分布式锁，Redis 操作失败时降级到 PostgreSQL 锁表。
/// 单进程部署（两者都未配置）时退化为按 key 的进程内互斥锁。
pub struct LockManager {
    redis_client: Option<RedisClient>,
    pool: Option<PgPool>,
    local: LocalLocks,
    config: LockConfig,
    /// 实例唯一标识，用于区分不同服务实例持有的锁
    instance_id: String,
}

impl LockManager {
    /// 创建锁管理器
    ///
    /// # Arguments
    /// - `redis_client`: Redis 客户端（可选）
    /// - `pool`: PostgreSQL 连接池（可选，作为 Redis 的后备）
    /// - `config`: 锁配置
    pub fn new(redis_client: Option<RedisClient>, pool: Option<PgPool>, config: LockConfig) -> Self {
        Self {
            redis_client,
            pool,
            local: Arc::new(DashMap::new()),
            config,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// 仅使用进程内互斥锁
    pub fn local(config: LockConfig) -> Self {
        Self::new(None, None, config)
    }

    /// 获取锁
    ///
    /// 资源被占用时按配置重试，仍无法获取则返回 `LockConflict`。
    /// 只有 Redis 本身出错时才降级到数据库锁。
    ///
    /// # Arguments
    /// - `key`: 锁的唯一标识
    /// - `ttl`: 锁的过期时间（可选，默认使用配置中的 default_ttl）
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn acquire(&self, key: &str, ttl: Option<Duration>) -> Result<LockGuard> {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        // owner 格式: instance_id:uuid
        let owner = format!("{}:{}", self.instance_id, Uuid::new_v4());

        if let Some(ref client) = self.redis_client {
            match self.acquire_redis(client, key, &owner, ttl).await {
                Ok(Some(guard)) => return Ok(guard),
                Ok(None) => {
                    return Err(ProgressError::LockConflict {
                        resource: key.to_string(),
                    });
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Redis lock failed, falling back");
                }
            }
        }

        match self.pool {
            Some(ref pool) => self.try_db_lock(pool, key, &owner, ttl).await,
            None => self.acquire_local(key, owner, ttl).await,
        }
    }

    /// 在重试次数内尝试 Redis 锁
    ///
    /// 返回 `Ok(None)` 表示资源一直被占用，`Err` 表示 Redis 不可用
    async fn acquire_redis(
        &self,
        client: &RedisClient,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> std::result::Result<Option<LockGuard>, String> {
        let attempts = self.config.retry_count.max(1);
        for attempt in 0..attempts {
            if self.try_redis_lock(client, key, owner, ttl).await? {
                debug!(key = %key, owner = %owner, attempt = attempt, "Redis lock acquired");
                return Ok(Some(LockGuard::new_redis(
                    key.to_string(),
                    owner.to_string(),
                    client.clone(),
                )));
            }
            if attempt + 1 < attempts {
                debug!(key = %key, attempt = attempt, "Redis lock busy, retrying");
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }
        Ok(None)
    }

    /// 尝试获取 Redis 锁
    ///
    /// 使用 SET NX PX 原子操作
    async fn try_redis_lock(
        &self,
        client: &RedisClient,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> std::result::Result<bool, String> {
        let lock_key = format!("lock:{}", key);
        let ttl_ms = ttl.as_millis() as u64;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| e.to_string())?;

        // SET NX 成功时返回 "OK"，失败时返回 None
        let result: Option<String> = redis::cmd("SET")
            .arg(&lock_key)
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| e.to_string())?;

        Ok(result.is_some())
    }

    /// 尝试获取数据库锁
    ///
    /// INSERT ON CONFLICT DO NOTHING 获取，先清理过期锁
    async fn try_db_lock(
        &self,
        pool: &PgPool,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<LockGuard> {
        let expires_at = chrono::Utc::now()
            + chrono::Duration::from_std(ttl).map_err(|e| ProgressError::Internal(e.to_string()))?;
        let attempts = self.config.retry_count.max(1);

        for attempt in 0..attempts {
            let deleted = sqlx::query(
                r#"DELETE FROM distributed_locks WHERE lock_key = $1 AND expires_at < NOW()"#,
            )
            .bind(key)
            .execute(pool)
            .await?;

            if deleted.rows_affected() > 0 {
                debug!(key = %key, "Cleaned up expired database lock");
            }

            let result = sqlx::query(
                r#"
                INSERT INTO distributed_locks (lock_key, owner_id, expires_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (lock_key) DO NOTHING
                "#,
            )
            .bind(key)
            .bind(owner)
            .bind(expires_at)
            .execute(pool)
            .await?;

            if result.rows_affected() > 0 {
                debug!(key = %key, owner = %owner, attempt = attempt, "Database lock acquired");
                return Ok(LockGuard::new_db(
                    key.to_string(),
                    owner.to_string(),
                    pool.clone(),
                ));
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        Err(ProgressError::LockConflict {
            resource: key.to_string(),
        })
    }

    /// 进程内互斥锁
    ///
    /// 排队等待，最长等待 ttl。守卫释放后若无人等待，条目从锁表移除
    async fn acquire_local(&self, key: &str, owner: String, ttl: Duration) -> Result<LockGuard> {
        let mutex = self
            .local
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let acquired = tokio::time::timeout(ttl, mutex.lock_owned()).await;
        match acquired {
            Ok(guard) => Ok(LockGuard::new_local(
                key.to_string(),
                owner,
                guard,
                self.local.clone(),
            )),
            Err(_) => {
                self.local
                    .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
                Err(ProgressError::LockConflict {
                    resource: key.to_string(),
                })
            }
        }
    }
}

/// 锁守卫
///
/// 应使用 `release()` 显式释放。Redis/数据库锁在未释放时被 drop
/// 只会记录警告，锁最终通过 TTL 过期；进程内锁随 drop 立即释放。
pub struct LockGuard {
    key: String,
    owner: String,
    backend: LockBackend,
    released: bool,
}

enum LockBackend {
    Redis(RedisClient),
    Database(PgPool),
    Local {
        guard: Option<OwnedMutexGuard<()>>,
        registry: LocalLocks,
    },
}

impl LockBackend {
    fn name(&self) -> &'static str {
        match self {
            Self::Redis(_) => "redis",
            Self::Database(_) => "database",
            Self::Local { .. } => "local",
        }
    }
}

impl LockGuard {
    fn new_redis(key: String, owner: String, client: RedisClient) -> Self {
        Self {
            key,
            owner,
            backend: LockBackend::Redis(client),
            released: false,
        }
    }

    fn new_db(key: String, owner: String, pool: PgPool) -> Self {
        Self {
            key,
            owner,
            backend: LockBackend::Database(pool),
            released: false,
        }
    }

    fn new_local(
        key: String,
        owner: String,
        guard: OwnedMutexGuard<()>,
        registry: LocalLocks,
    ) -> Self {
        Self {
            key,
            owner,
            backend: LockBackend::Local {
                guard: Some(guard),
                registry,
            },
            released: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// 显式释放锁
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        match &self.backend {
            LockBackend::Redis(client) => self.release_redis(client).await,
            LockBackend::Database(pool) => self.release_db(pool).await,
            // 守卫随 self 一起 drop
            LockBackend::Local { .. } => Ok(()),
        }
    }

    /// 释放 Redis 锁
    ///
    /// Lua 脚本原子校验 owner 后删除
    async fn release_redis(&self, client: &RedisClient) -> Result<()> {
        let lock_key = format!("lock:{}", self.key);

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| ProgressError::Redis(e.to_string()))?;

        let script = r#"
            if redis.call("get", KEYS[1]) == ARGV[1] then
                return redis.call("del", KEYS[1])
            else
                return 0
            end
        "#;

        let result: i32 = redis::Script::new(script)
            .key(&lock_key)
            .arg(&self.owner)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| ProgressError::Redis(e.to_string()))?;

        if result == 0 {
            // 锁已过期，临界区可能与其他持有者重叠，由版本校验兜底
            warn!(
                key = %self.key,
                owner = %self.owner,
                "Lock was already released or owned by another client"
            );
        } else {
            debug!(key = %self.key, "Redis lock released");
        }

        Ok(())
    }

    async fn release_db(&self, pool: &PgPool) -> Result<()> {
        let result =
            sqlx::query(r#"DELETE FROM distributed_locks WHERE lock_key = $1 AND owner_id = $2"#)
                .bind(&self.key)
                .bind(&self.owner)
                .execute(pool)
                .await?;

        if result.rows_affected() == 0 {
            warn!(
                key = %self.key,
                owner = %self.owner,
                "Lock was already released or owned by another client"
            );
        } else {
            debug!(key = %self.key, "Database lock released");
        }

        Ok(())
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .field("backend", &self.backend.name())
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let LockBackend::Local { guard, registry } = &mut self.backend {
            drop(guard.take());
            // 只剩锁表自身的引用时说明没有等待者
            registry.remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
            return;
        }

        if !self.released {
            warn!(
                lock_key = %self.key,
                owner = %self.owner,
                "LockGuard dropped without explicit release - lock will expire via TTL"
            );
        }
    }
}
