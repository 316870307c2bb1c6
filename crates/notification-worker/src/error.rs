//! 通知服务错误类型
//!
//! `NotificationError` 描述单次投递、用户目录读取与触发事件解析中的具体故障；
//! `DispatchFailure` 是分发器对外暴露的唯一错误，所有原因都折叠到它上面。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("推送发送失败: token={}, 原因={reason}", mask_token(.token))]
    SendFailed { token: String, reason: String },

    #[error("推送 token 无效: token={}", mask_token(.token))]
    InvalidToken { token: String },

    #[error("用户目录读取失败: {0}")]
    DirectoryReadFailed(String),

    #[error("触发事件反序列化失败: {0}")]
    DeserializationFailed(String),

    #[error(transparent)]
    Shared(#[from] parking_shared::error::ParkingError),
}

impl NotificationError {
    /// 指标标签
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SendFailed { .. } => "send_failed",
            Self::InvalidToken { .. } => "invalid_token",
            Self::DirectoryReadFailed(_) => "directory_failed",
            Self::DeserializationFailed(_) => "deserialization_failed",
            Self::Shared(_) => "shared",
        }
    }
}

/// 通知分发失败
///
/// 不区分失败原因，也不报告部分成功；细节只写入诊断日志。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("通知分发失败")]
pub struct DispatchFailure;

/// token 只保留首尾各 4 个字符，避免完整设备标识进入日志
pub(crate) fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.is_empty() {
        return "<empty>".to_string();
    }
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}
