//! 用户目录
//!
//! 分发器通过 `UserDirectory` 一次性读取全部用户。接口只提供读取，
//! 分发流程因此不存在回写用户文档的路径。

use async_trait::async_trait;
use parking_shared::events::UserRecord;
use sqlx::PgPool;
use tracing::{debug, instrument};

use crate::error::NotificationError;

/// 用户目录读取接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// 读取全部用户，不分页、不过滤
    async fn list_users(&self) -> Result<Vec<UserRecord>, NotificationError>;
}

/// 基于 PostgreSQL `users` 表的用户目录
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    #[instrument(skip(self))]
    async fn list_users(&self) -> Result<Vec<UserRecord>, NotificationError> {
        let users = sqlx::query_as::<_, UserRecord>("SELECT id, fcm_token FROM users")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| NotificationError::DirectoryReadFailed(e.to_string()))?;

        debug!(count = users.len(), "用户目录读取完成");
        Ok(users)
    }
}
