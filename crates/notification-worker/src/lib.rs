//! 停车位通知工作者
//!
//! 监听停车位文档的更新事件，把一条“附近有空车位”的推送并发投递给所有已注册设备。
//! 全部投递成功才算成功，任一失败都折叠为单一的分发失败。

pub mod consumer;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod sender;
pub mod templates;
