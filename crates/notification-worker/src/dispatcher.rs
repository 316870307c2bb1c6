//! 停车位通知分发器
//!
//! 每次停车位更新触发一次扇出：读取更新后的文档，一次性读取全部用户，
//! 为每个用户的推送 token 并发投递同一份负载，等待全部投递结束后汇总结果。
//! 任一环节失败都只记录一条诊断日志，并以单一的 `DispatchFailure` 返回。

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use futures::future::join_all;
use futures::stream;
use parking_shared::events::{ParkingChange, PushPayload, UserRecord};
use parking_shared::observability::metrics::{record_delivery, record_dispatch};
use tracing::{debug, error, info, instrument, warn};

use crate::directory::UserDirectory;
use crate::error::{DispatchFailure, mask_token};
use crate::sender::PushTransport;
use crate::templates::ParkingNotificationTemplate;

/// 单个接收者的投递结果
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub user_id: String,
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

/// 通知分发器
///
/// 持有的客户端在进程启动时构造一次，分发过程中只读共享。
pub struct NotificationDispatcher {
    directory: Arc<dyn UserDirectory>,
    transport: Arc<dyn PushTransport>,
    /// 同时在途的投递上限；`None` 表示全部同时发出
    max_concurrency: Option<usize>,
}

impl NotificationDispatcher {
    pub fn new(directory: Arc<dyn UserDirectory>, transport: Arc<dyn PushTransport>) -> Self {
        Self {
            directory,
            transport,
            max_concurrency: None,
        }
    }

    /// 限制单次扇出中同时在途的投递数，0 按 1 处理
    pub fn with_max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.max_concurrency = limit.map(|n| n.max(1));
        self
    }

    /// 处理一次停车位更新
    ///
    /// 全部投递成功时返回 `Ok(())`。用户目录读取失败时不发起任何投递；
    /// 投递失败时仍等待其余投递全部结束后才返回错误。
    #[instrument(skip(self, change), fields(parking_id = %change.parking_id))]
    pub async fn on_parking_updated(&self, change: &ParkingChange) -> Result<(), DispatchFailure> {
        let start = Instant::now();
        let payload = ParkingNotificationTemplate::render(&change.after);

        let users = match self.directory.list_users().await {
            Ok(users) => users,
            Err(e) => {
                error!(
                    parking_id = %change.parking_id,
                    error = %e,
                    "发送通知失败: 无法读取用户目录"
                );
                record_dispatch("directory_failed", 0, start.elapsed().as_secs_f64());
                return Err(DispatchFailure);
            }
        };

        let recipients = users.len();
        debug!(recipients, body = %payload.notification.body, "开始扇出投递");

        let results = self.deliver_all(&users, &payload).await;
        let failed: Vec<&DeliveryResult> = results.iter().filter(|r| !r.success).collect();
        let elapsed = start.elapsed().as_secs_f64();

        if let Some(first) = failed.first() {
            error!(
                parking_id = %change.parking_id,
                recipients,
                failed_count = failed.len(),
                first_failed_user = %first.user_id,
                first_error = first.error.as_deref().unwrap_or_default(),
                "发送通知失败"
            );
            record_dispatch("delivery_failed", recipients, elapsed);
            return Err(DispatchFailure);
        }

        info!(
            parking_id = %change.parking_id,
            recipients,
            elapsed_ms = (elapsed * 1000.0) as u64,
            "停车位通知已全部投递"
        );
        record_dispatch("success", recipients, elapsed);
        Ok(())
    }

    /// 为每个用户发起一次投递，等待全部结束
    ///
    /// 不会因为某次失败提前返回；结果顺序不保证与用户顺序一致。
    pub async fn deliver_all(
        &self,
        users: &[UserRecord],
        payload: &PushPayload,
    ) -> Vec<DeliveryResult> {
        let deliveries = users.iter().map(|user| self.deliver(user, payload));

        match self.max_concurrency {
            Some(limit) => {
                stream::iter(deliveries)
                    .buffer_unordered(limit)
                    .collect::<Vec<_>>()
                    .await
            }
            None => join_all(deliveries).await,
        }
    }

    async fn deliver(&self, user: &UserRecord, payload: &PushPayload) -> DeliveryResult {
        // 不检查 token 是否存在，缺失时以空 token 交给推送通道判定
        let token = user.fcm_token.as_deref().unwrap_or_default();

        match self.transport.send(token, payload).await {
            Ok(receipt) => {
                record_delivery("success");
                DeliveryResult {
                    user_id: user.id.clone(),
                    success: true,
                    message_id: Some(receipt.message_id),
                    error: None,
                }
            }
            Err(e) => {
                warn!(
                    user_id = %user.id,
                    token = %mask_token(token),
                    transport = self.transport.name(),
                    error = %e,
                    "推送投递失败"
                );
                record_delivery(e.kind());
                DeliveryResult {
                    user_id: user.id.clone(),
                    success: false,
                    message_id: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MockUserDirectory;
    use crate::error::NotificationError;
    use crate::sender::{MockPushTransport, SendReceipt};
    use mockall::predicate::eq;
    use parking_shared::events::ParkingRecord;
    use parking_shared::test_utils::TestDataGenerator;
    use serde_json::json;

    fn change(lot_number: serde_json::Value) -> ParkingChange {
        ParkingChange {
            parking_id: "lot-42".to_string(),
            before: None,
            after: ParkingRecord {
                lot_number: Some(lot_number),
            },
        }
    }

    fn directory_with(users: Vec<UserRecord>) -> MockUserDirectory {
        let mut directory = MockUserDirectory::new();
        directory
            .expect_list_users()
            .times(1)
            .returning(move || Ok(users.clone()));
        directory
    }

    fn transport() -> MockPushTransport {
        let mut transport = MockPushTransport::new();
        transport.expect_name().return_const("mock");
        transport
    }

    fn receipt(token: &str) -> SendReceipt {
        SendReceipt {
            message_id: format!("msg-{token}"),
        }
    }

    #[tokio::test]
    async fn test_two_users_both_delivered() {
        let directory = directory_with(TestDataGenerator::users(&["A", "B"]));
        let mut transport = transport();
        for token in ["A", "B"] {
            transport
                .expect_send()
                .with(eq(token), eq(PushPayload::new("Близкая парковка!", "Lot #42")))
                .times(1)
                .returning(|token, _| Ok(receipt(token)));
        }

        let dispatcher = NotificationDispatcher::new(Arc::new(directory), Arc::new(transport));
        assert_eq!(dispatcher.on_parking_updated(&change(json!("42"))).await, Ok(()));
    }

    #[tokio::test]
    async fn test_no_users_succeeds_without_deliveries() {
        let directory = directory_with(Vec::new());
        let mut transport = transport();
        transport.expect_send().never();

        let dispatcher = NotificationDispatcher::new(Arc::new(directory), Arc::new(transport));
        assert!(dispatcher.on_parking_updated(&change(json!("1"))).await.is_ok());
    }

    #[tokio::test]
    async fn test_directory_failure_skips_deliveries() {
        let mut directory = MockUserDirectory::new();
        directory
            .expect_list_users()
            .times(1)
            .returning(|| Err(NotificationError::DirectoryReadFailed("超时".to_string())));
        let mut transport = transport();
        transport.expect_send().never();

        let dispatcher = NotificationDispatcher::new(Arc::new(directory), Arc::new(transport));
        assert_eq!(
            dispatcher.on_parking_updated(&change(json!("1"))).await,
            Err(DispatchFailure)
        );
    }

    #[tokio::test]
    async fn test_single_failure_fails_whole_dispatch_after_all_attempts() {
        let directory = directory_with(TestDataGenerator::users(&["A", "B", "C"]));
        let mut transport = transport();
        transport
            .expect_send()
            .times(3)
            .returning(|token, _| match token {
                "B" => Err(NotificationError::InvalidToken {
                    token: token.to_string(),
                }),
                _ => Ok(receipt(token)),
            });

        let dispatcher = NotificationDispatcher::new(Arc::new(directory), Arc::new(transport));
        assert_eq!(
            dispatcher.on_parking_updated(&change(json!("9"))).await,
            Err(DispatchFailure)
        );
    }

    #[tokio::test]
    async fn test_missing_token_is_sent_as_empty() {
        let directory = directory_with(vec![TestDataGenerator::user_without_token()]);
        let mut transport = transport();
        transport
            .expect_send()
            .with(eq(""), mockall::predicate::always())
            .times(1)
            .returning(|token, _| {
                Err(NotificationError::InvalidToken {
                    token: token.to_string(),
                })
            });

        let dispatcher = NotificationDispatcher::new(Arc::new(directory), Arc::new(transport));
        assert!(dispatcher.on_parking_updated(&change(json!("3"))).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_lot_number_renders_placeholder() {
        let directory = directory_with(TestDataGenerator::users(&["A"]));
        let mut transport = transport();
        transport
            .expect_send()
            .withf(|_, payload| payload.notification.body == "Lot #undefined")
            .times(1)
            .returning(|token, _| Ok(receipt(token)));

        let dispatcher = NotificationDispatcher::new(Arc::new(directory), Arc::new(transport));
        let change = ParkingChange {
            parking_id: "lot-x".to_string(),
            before: None,
            after: ParkingRecord::default(),
        };
        assert!(dispatcher.on_parking_updated(&change).await.is_ok());
    }

    #[tokio::test]
    async fn test_deliver_all_reports_each_recipient() {
        let users = TestDataGenerator::users(&["A", "B"]);
        let mut transport = transport();
        transport.expect_send().times(2).returning(|token, _| {
            if token == "A" {
                Ok(receipt(token))
            } else {
                Err(NotificationError::SendFailed {
                    token: token.to_string(),
                    reason: "HTTP 503".to_string(),
                })
            }
        });

        let dispatcher =
            NotificationDispatcher::new(Arc::new(MockUserDirectory::new()), Arc::new(transport))
                .with_max_concurrency(Some(1));
        let results = dispatcher
            .deliver_all(&users, &PushPayload::new("t", "b"))
            .await;

        assert_eq!(results.len(), 2);
        let ok = results.iter().find(|r| r.user_id == users[0].id).unwrap();
        assert!(ok.success);
        assert_eq!(ok.message_id.as_deref(), Some("msg-A"));
        let failed = results.iter().find(|r| r.user_id == users[1].id).unwrap();
        assert!(!failed.success);
        assert!(failed.error.as_deref().unwrap().contains("HTTP 503"));
    }

    #[test]
    fn test_zero_concurrency_limit_is_clamped() {
        let dispatcher = NotificationDispatcher::new(
            Arc::new(MockUserDirectory::new()),
            Arc::new(MockPushTransport::new()),
        )
        .with_max_concurrency(Some(0));
        assert_eq!(dispatcher.max_concurrency, Some(1));
    }
}
