//! 触发事件消费者
//!
//! 从 Kafka 消费文档变更事件，只把停车位的更新事件交给分发器。
//! 分发失败的事件原样投递到失败 topic，由平台侧决定是否重放；本服务不做重试。

use std::sync::Arc;

use async_trait::async_trait;
use parking_shared::config::AppConfig;
use parking_shared::error::ParkingError;
use parking_shared::events::{DocumentChangeEvent, ParkingChange};
use parking_shared::kafka::{ConsumerMessage, KafkaConsumer, KafkaProducer, topics};
use parking_shared::observability::metrics::record_trigger_event;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::dispatcher::NotificationDispatcher;
use crate::error::NotificationError;

/// 分发失败上报接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FailureReporter: Send + Sync {
    async fn report(&self, event: &DocumentChangeEvent) -> Result<(), ParkingError>;
}

#[async_trait]
impl FailureReporter for KafkaProducer {
    async fn report(&self, event: &DocumentChangeEvent) -> Result<(), ParkingError> {
        let (partition, offset) = self
            .send_json(topics::FAILED_NOTIFICATIONS, &event.document_id, event)
            .await?;
        debug!(
            event_id = %event.event_id,
            partition,
            offset,
            "失败事件已上报"
        );
        Ok(())
    }
}

/// 停车位更新触发器
pub struct TriggerConsumer {
    consumer: KafkaConsumer,
    dispatcher: Arc<NotificationDispatcher>,
    reporter: Arc<dyn FailureReporter>,
}

impl TriggerConsumer {
    pub fn new(
        config: &AppConfig,
        dispatcher: Arc<NotificationDispatcher>,
        reporter: Arc<dyn FailureReporter>,
    ) -> Result<Self, NotificationError> {
        let consumer = KafkaConsumer::new(&config.kafka, Some("notifications"))?;
        Ok(Self {
            consumer,
            dispatcher,
            reporter,
        })
    }

    /// 启动消费循环，直到收到 shutdown 信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), NotificationError> {
        self.consumer.subscribe(&[topics::DOCUMENT_CHANGES])?;

        info!(topic = topics::DOCUMENT_CHANGES, "停车位触发器已启动");

        let dispatcher = self.dispatcher;
        let reporter = self.reporter;

        self.consumer
            .start(shutdown, |msg| {
                let dispatcher = &dispatcher;
                let reporter = &reporter;
                async move {
                    if let Err(e) = handle_message(dispatcher, reporter.as_ref(), &msg).await {
                        error!(
                            error = %e,
                            topic = %msg.topic,
                            partition = msg.partition,
                            offset = msg.offset,
                            "处理触发事件失败"
                        );
                    }
                    Ok(())
                }
            })
            .await;

        info!("停车位触发器已停止");
        Ok(())
    }
}

/// 解析一条变更消息
///
/// 非停车位集合、或非更新类型的变更返回 `None`。
pub fn parse_trigger(
    msg: &ConsumerMessage,
) -> Result<Option<(DocumentChangeEvent, ParkingChange)>, NotificationError> {
    let event: DocumentChangeEvent = msg
        .deserialize_payload()
        .map_err(|e| NotificationError::DeserializationFailed(e.to_string()))?;

    record_trigger_event(&event.collection, &event.change_type.to_string());

    if !event.is_parking_update() {
        debug!(
            collection = %event.collection,
            change_type = %event.change_type,
            document_id = %event.document_id,
            "忽略非停车位更新事件"
        );
        return Ok(None);
    }

    let change = ParkingChange::try_from(&event)
        .map_err(|e| NotificationError::DeserializationFailed(e.to_string()))?;

    Ok(Some((event, change)))
}

/// 处理单条变更消息
///
/// 拆分为独立函数，测试中可以直接调用而无需构造 Kafka 消费者。
/// 分发失败本身不算处理失败；失败事件上报不成功时返回错误。
pub async fn handle_message(
    dispatcher: &NotificationDispatcher,
    reporter: &dyn FailureReporter,
    msg: &ConsumerMessage,
) -> Result<(), NotificationError> {
    let Some((event, change)) = parse_trigger(msg)? else {
        return Ok(());
    };

    info!(
        event_id = %event.event_id,
        parking_id = %change.parking_id,
        "收到停车位更新事件"
    );

    if dispatcher.on_parking_updated(&change).await.is_err() {
        warn!(
            event_id = %event.event_id,
            parking_id = %change.parking_id,
            "停车位通知分发失败，上报失败事件"
        );
        reporter.report(&event).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MockUserDirectory;
    use crate::sender::{MockPushTransport, SendReceipt};
    use parking_shared::events::{ChangeType, UserRecord, collections};
    use parking_shared::test_utils::TestDataGenerator;
    use serde_json::json;
    use std::collections::HashMap;

    fn message(event: &DocumentChangeEvent) -> ConsumerMessage {
        ConsumerMessage {
            topic: topics::DOCUMENT_CHANGES.to_string(),
            partition: 0,
            offset: 1,
            key: Some(event.document_id.clone()),
            payload: serde_json::to_vec(event).expect("序列化测试事件失败"),
            timestamp: None,
            headers: HashMap::new(),
        }
    }

    fn dispatcher(users: Vec<UserRecord>, deliveries_fail: bool) -> NotificationDispatcher {
        let mut directory = MockUserDirectory::new();
        directory
            .expect_list_users()
            .returning(move || Ok(users.clone()));

        let mut transport = MockPushTransport::new();
        transport.expect_name().return_const("mock");
        transport.expect_send().returning(move |token, _| {
            if deliveries_fail {
                Err(NotificationError::SendFailed {
                    token: token.to_string(),
                    reason: "HTTP 500".to_string(),
                })
            } else {
                Ok(SendReceipt {
                    message_id: format!("msg-{token}"),
                })
            }
        });

        NotificationDispatcher::new(Arc::new(directory), Arc::new(transport))
    }

    #[test]
    fn test_parse_parking_update() {
        let event = TestDataGenerator::parking_update("lot-42", json!("42"));
        let (parsed, change) = parse_trigger(&message(&event)).unwrap().unwrap();

        assert_eq!(parsed, event);
        assert_eq!(change.parking_id, "lot-42");
        assert_eq!(change.after.lot_number, Some(json!("42")));
    }

    #[test]
    fn test_parse_ignores_create_and_delete() {
        for change_type in [ChangeType::Created, ChangeType::Deleted] {
            let event =
                TestDataGenerator::document_change(collections::PARKINGS, "lot-1", change_type);
            assert!(parse_trigger(&message(&event)).unwrap().is_none());
        }
    }

    #[test]
    fn test_parse_ignores_other_collections() {
        let event =
            TestDataGenerator::document_change(collections::USERS, "u-1", ChangeType::Updated);
        assert!(parse_trigger(&message(&event)).unwrap().is_none());
    }

    #[test]
    fn test_parse_invalid_json() {
        let msg = ConsumerMessage {
            topic: topics::DOCUMENT_CHANGES.to_string(),
            partition: 0,
            offset: 0,
            key: None,
            payload: b"not valid json".to_vec(),
            timestamp: None,
            headers: HashMap::new(),
        };
        assert!(matches!(
            parse_trigger(&msg),
            Err(NotificationError::DeserializationFailed(_))
        ));
    }

    #[test]
    fn test_parse_update_without_after_snapshot() {
        let event = DocumentChangeEvent::new(
            collections::PARKINGS,
            "lot-1",
            ChangeType::Updated,
            Some(json!({"lotNumber": "1"})),
            None,
        );
        assert!(matches!(
            parse_trigger(&message(&event)),
            Err(NotificationError::DeserializationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_successful_dispatch_is_not_reported() {
        let dispatcher = dispatcher(TestDataGenerator::users(&["A", "B"]), false);
        let mut reporter = MockFailureReporter::new();
        reporter.expect_report().never();

        let event = TestDataGenerator::parking_update("lot-42", json!("42"));
        handle_message(&dispatcher, &reporter, &message(&event))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_dispatch_reports_original_event_once() {
        let dispatcher = dispatcher(TestDataGenerator::users(&["A"]), true);
        let event = TestDataGenerator::parking_update("lot-42", json!("42"));

        let expected_id = event.event_id.clone();
        let mut reporter = MockFailureReporter::new();
        reporter
            .expect_report()
            .withf(move |reported| reported.event_id == expected_id)
            .times(1)
            .returning(|_| Ok(()));

        handle_message(&dispatcher, &reporter, &message(&event))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_report_error_is_returned_to_caller() {
        let dispatcher = dispatcher(TestDataGenerator::users(&["A"]), true);
        let mut reporter = MockFailureReporter::new();
        reporter
            .expect_report()
            .times(1)
            .returning(|_| Err(ParkingError::Kafka("broker 不可用".to_string())));

        let event = TestDataGenerator::parking_update("lot-42", json!("42"));
        let result = handle_message(&dispatcher, &reporter, &message(&event)).await;

        assert!(matches!(
            result,
            Err(NotificationError::Shared(ParkingError::Kafka(_)))
        ));
    }

    #[test]
    fn test_unknown_collection_is_ignored() {
        let event = TestDataGenerator::document_change("audit-log", "a-1", ChangeType::Updated);
        assert!(parse_trigger(&message(&event)).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ignored_event_never_reaches_dispatcher() {
        let mut directory = MockUserDirectory::new();
        directory.expect_list_users().never();
        let dispatcher = NotificationDispatcher::new(
            Arc::new(directory),
            Arc::new(MockPushTransport::new()),
        );
        let mut reporter = MockFailureReporter::new();
        reporter.expect_report().never();

        let event =
            TestDataGenerator::document_change(collections::PARKINGS, "lot-1", ChangeType::Created);
        handle_message(&dispatcher, &reporter, &message(&event))
            .await
            .unwrap();
    }
}
