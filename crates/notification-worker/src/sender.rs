//! 推送发送器
//!
//! 通过 `PushTransport` trait 抽象单接收者投递：一次调用只投递一个 token，
//! 成功或失败都只针对这一次调用，内部不做重试。
//! `FcmSender` 对接 FCM HTTP v1 接口，`LogOnlySender` 只记录日志，供本地开发使用。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_shared::config::PushConfig;
use parking_shared::error::ParkingError;
use parking_shared::events::{PushNotification, PushPayload};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{NotificationError, mask_token};

/// 投递回执
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// 推送服务返回的消息标识
    pub message_id: String,
}

/// 单接收者推送通道
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(&self, token: &str, payload: &PushPayload)
    -> Result<SendReceipt, NotificationError>;

    /// 通道名称，用于日志
    fn name(&self) -> &'static str;
}

/// 按配置选择推送通道
pub fn build_transport(config: &PushConfig) -> Result<Arc<dyn PushTransport>, NotificationError> {
    if config.is_fcm() {
        Ok(Arc::new(FcmSender::new(config)?))
    } else {
        info!(provider = %config.provider, "使用仅记录日志的推送通道");
        Ok(Arc::new(LogOnlySender))
    }
}

// ---------------------------------------------------------------------------
// FCM HTTP v1 发送器
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct FcmRequest<'a> {
    message: FcmMessage<'a>,
}

#[derive(Serialize)]
struct FcmMessage<'a> {
    token: &'a str,
    notification: &'a PushNotification,
}

#[derive(Deserialize)]
struct FcmResponse {
    name: String,
}

/// FCM HTTP v1 发送器
///
/// 访问令牌由部署平台注入，这里只负责携带。
pub struct FcmSender {
    client: reqwest::Client,
    send_url: String,
    access_token: Option<String>,
}

impl FcmSender {
    pub fn new(config: &PushConfig) -> Result<Self, NotificationError> {
        if config.project_id.is_empty() {
            return Err(ParkingError::Internal("push.project_id 未配置".to_string()).into());
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ParkingError::ExternalService {
                service: "fcm".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            send_url: send_url(&config.endpoint, &config.project_id),
            access_token: config.access_token.clone(),
        })
    }
}

fn send_url(endpoint: &str, project_id: &str) -> String {
    format!(
        "{}/v1/projects/{}/messages:send",
        endpoint.trim_end_matches('/'),
        project_id
    )
}

#[async_trait]
impl PushTransport for FcmSender {
    async fn send(
        &self,
        token: &str,
        payload: &PushPayload,
    ) -> Result<SendReceipt, NotificationError> {
        if token.is_empty() {
            return Err(NotificationError::InvalidToken {
                token: token.to_string(),
            });
        }

        let body = FcmRequest {
            message: FcmMessage {
                token,
                notification: &payload.notification,
            },
        };

        let mut request = self.client.post(&self.send_url).json(&body);
        if let Some(access_token) = &self.access_token {
            request = request.bearer_auth(access_token);
        }

        let send_failed = |reason: String| NotificationError::SendFailed {
            token: token.to_string(),
            reason,
        };

        let response = request.send().await.map_err(|e| send_failed(e.to_string()))?;
        let status = response.status();

        if status.is_success() {
            let receipt: FcmResponse = response
                .json()
                .await
                .map_err(|e| send_failed(format!("响应解析失败: {e}")))?;
            debug!(token = %mask_token(token), message_id = %receipt.name, "FCM 推送已受理");
            return Ok(SendReceipt {
                message_id: receipt.name,
            });
        }

        // 400/404 表示 token 格式错误或已注销
        if status == StatusCode::BAD_REQUEST || status == StatusCode::NOT_FOUND {
            return Err(NotificationError::InvalidToken {
                token: token.to_string(),
            });
        }

        let text = response.text().await.unwrap_or_default();
        Err(send_failed(format!("HTTP {status}: {text}")))
    }

    fn name(&self) -> &'static str {
        "fcm"
    }
}

// ---------------------------------------------------------------------------
// 仅记录日志的发送器
// ---------------------------------------------------------------------------

/// 模拟推送发送器，不访问网络
pub struct LogOnlySender;

#[async_trait]
impl PushTransport for LogOnlySender {
    async fn send(
        &self,
        token: &str,
        payload: &PushPayload,
    ) -> Result<SendReceipt, NotificationError> {
        if token.is_empty() {
            return Err(NotificationError::InvalidToken {
                token: token.to_string(),
            });
        }

        let message_id = Uuid::now_v7().to_string();

        info!(
            channel = "LOG",
            token = %mask_token(token),
            message_id = %message_id,
            title = %payload.notification.title,
            body = %payload.notification.body,
            "模拟发送推送通知"
        );

        Ok(SendReceipt { message_id })
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
