//! 文档模型与变更事件
//!
//! 定义文档存储推送过来的变更事件信封、停车位与用户文档的类型化视图，
//! 以及下发到推送服务的通知负载。分发器只读取这些文档，从不回写。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParkingError;

/// 集合名称常量
pub mod collections {
    pub const PARKINGS: &str = "parkings";
    pub const USERS: &str = "users";
}

// ---------------------------------------------------------------------------
// ChangeType / DocumentChangeEvent — 触发源信封
// ---------------------------------------------------------------------------

/// 文档变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Updated => "UPDATED",
            Self::Deleted => "DELETED",
        };
        write!(f, "{s}")
    }
}

/// 文档变更事件
///
/// 由文档存储的变更流产生，携带变更前后的完整快照。
/// 快照保持为原始 JSON，由具体集合的类型化视图按需解析。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChangeEvent {
    pub event_id: String,
    pub collection: String,
    pub document_id: String,
    pub change_type: ChangeType,
    #[serde(default)]
    pub before: Option<serde_json::Value>,
    #[serde(default)]
    pub after: Option<serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

impl DocumentChangeEvent {
    pub fn new(
        collection: impl Into<String>,
        document_id: impl Into<String>,
        change_type: ChangeType,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7().to_string(),
            collection: collection.into(),
            document_id: document_id.into(),
            change_type,
            before,
            after,
            occurred_at: Utc::now(),
        }
    }

    /// 是否为停车位文档的更新事件（唯一会触发通知的变更）
    pub fn is_parking_update(&self) -> bool {
        self.collection == collections::PARKINGS && self.change_type == ChangeType::Updated
    }
}

// ---------------------------------------------------------------------------
// ParkingRecord / ParkingChange
// ---------------------------------------------------------------------------

/// 停车位文档
///
/// 只关心 `lotNumber`；其类型不做约束，可能是字符串、数字，也可能缺失。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParkingRecord {
    #[serde(rename = "lotNumber", default)]
    pub lot_number: Option<serde_json::Value>,
}

/// 停车位更新的类型化视图
#[derive(Debug, Clone, PartialEq)]
pub struct ParkingChange {
    pub parking_id: String,
    /// 变更前状态，分发逻辑不使用
    pub before: Option<ParkingRecord>,
    pub after: ParkingRecord,
}

impl TryFrom<&DocumentChangeEvent> for ParkingChange {
    type Error = ParkingError;

    fn try_from(event: &DocumentChangeEvent) -> Result<Self, Self::Error> {
        let invalid = |reason: String| ParkingError::InvalidDocument {
            collection: event.collection.clone(),
            document_id: event.document_id.clone(),
            reason,
        };

        let after = event
            .after
            .as_ref()
            .ok_or_else(|| invalid("缺少 after 快照".to_string()))?;
        let after: ParkingRecord = serde_json::from_value(after.clone())
            .map_err(|e| invalid(format!("after 快照解析失败: {e}")))?;

        // before 快照不参与分发，解析失败时直接忽略
        let before = event
            .before
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok());

        Ok(Self {
            parking_id: event.document_id.clone(),
            before,
            after,
        })
    }
}

// ---------------------------------------------------------------------------
// UserRecord
// ---------------------------------------------------------------------------

/// 用户文档
///
/// 生命周期由注册子系统负责；`fcm_token` 可能缺失或已失效。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRecord {
    pub id: String,
    #[serde(rename = "fcmToken", default)]
    pub fcm_token: Option<String>,
}

// ---------------------------------------------------------------------------
// PushPayload — 推送负载
// ---------------------------------------------------------------------------

/// 通知展示内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
}

/// 单条推送负载，形如 `{ notification: { title, body } }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub notification: PushNotification,
}

impl PushPayload {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            notification: PushNotification {
                title: title.into(),
                body: body.into(),
            },
        }
    }
}
