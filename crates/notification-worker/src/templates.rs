//! 停车位通知模板
//!
//! 每次更新只生成一份负载，所有接收者共用。标题固定，正文由 lotNumber 拼出。

use parking_shared::events::{ParkingRecord, PushPayload};

/// 通知标题
pub const PARKING_TITLE: &str = "Близкая парковка!";

/// lotNumber 缺失或为 null 时的占位文本
pub const MISSING_LOT_PLACEHOLDER: &str = "undefined";

pub struct ParkingNotificationTemplate;

impl ParkingNotificationTemplate {
    /// 根据更新后的停车位文档生成推送负载
    pub fn render(parking: &ParkingRecord) -> PushPayload {
        let lot = Self::render_lot_number(parking.lot_number.as_ref());
        PushPayload::new(PARKING_TITLE, format!("Lot #{lot}"))
    }

    /// 渲染 lotNumber
    ///
    /// 不做校验：字符串原样输出，其他 JSON 值输出其文本形式，缺失时输出占位符。
    pub fn render_lot_number(lot_number: Option<&serde_json::Value>) -> String {
        match lot_number {
            None | Some(serde_json::Value::Null) => MISSING_LOT_PLACEHOLDER.to_string(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}
