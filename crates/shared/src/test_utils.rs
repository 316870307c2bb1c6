//! 测试工具模块
//!
//! 提供测试数据生成器，用于构造停车位变更事件与用户文档，
//! 让各 crate 的单元测试与集成测试共用同一套样例数据。

use serde_json::{Value, json};
use uuid::Uuid;

use crate::events::{ChangeType, DocumentChangeEvent, UserRecord, collections};

/// 生成唯一的测试用户 ID
pub fn test_user_id() -> String {
    format!("test-user-{}", Uuid::new_v4())
}

/// 测试数据生成器
pub struct TestDataGenerator;

impl TestDataGenerator {
    /// 停车位更新事件，after 快照中带指定的 lotNumber
    pub fn parking_update(parking_id: &str, lot_number: Value) -> DocumentChangeEvent {
        DocumentChangeEvent::new(
            collections::PARKINGS,
            parking_id,
            ChangeType::Updated,
            Some(json!({ "lotNumber": Value::Null })),
            Some(json!({ "lotNumber": lot_number })),
        )
    }

    /// after 快照中没有 lotNumber 字段的停车位更新事件
    pub fn parking_update_without_lot(parking_id: &str) -> DocumentChangeEvent {
        DocumentChangeEvent::new(
            collections::PARKINGS,
            parking_id,
            ChangeType::Updated,
            None,
            Some(json!({})),
        )
    }

    /// 任意集合、任意变更类型的事件
    pub fn document_change(
        collection: &str,
        document_id: &str,
        change_type: ChangeType,
    ) -> DocumentChangeEvent {
        let snapshot = match change_type {
            ChangeType::Deleted => None,
            _ => Some(json!({ "lotNumber": "1" })),
        };
        DocumentChangeEvent::new(collection, document_id, change_type, None, snapshot)
    }

    /// 带推送 token 的用户
    pub fn user(token: &str) -> UserRecord {
        UserRecord {
            id: test_user_id(),
            fcm_token: Some(token.to_string()),
        }
    }

    /// 没有推送 token 的用户
    pub fn user_without_token() -> UserRecord {
        UserRecord {
            id: test_user_id(),
            fcm_token: None,
        }
    }

    /// 按 token 列表批量生成用户
    pub fn users(tokens: &[&str]) -> Vec<UserRecord> {
        tokens.iter().map(|t| Self::user(t)).collect()
    }
}
