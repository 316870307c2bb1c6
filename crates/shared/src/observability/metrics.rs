//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;
use crate::events::collections;

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册通用指标描述
///
/// 这些描述会出现在 /metrics 端点的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "parking_dispatches_total",
        "Total number of parking update fan-outs"
    );
    metrics::describe_histogram!(
        "parking_dispatch_duration_seconds",
        "Parking update fan-out duration in seconds"
    );
    metrics::describe_histogram!(
        "parking_dispatch_recipients",
        "Number of recipients per parking update fan-out"
    );
    metrics::describe_counter!(
        "push_deliveries_total",
        "Total number of single-recipient push deliveries"
    );
    metrics::describe_counter!(
        "trigger_events_total",
        "Total number of document change events consumed"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一次停车位更新的扇出分发
#[inline]
pub fn record_dispatch(outcome: &str, recipients: usize, duration_secs: f64) {
    metrics::counter!(
        "parking_dispatches_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!("parking_dispatch_duration_seconds").record(duration_secs);
    metrics::histogram!("parking_dispatch_recipients").record(recipients as f64);
}

/// 记录单条推送投递结果
#[inline]
pub fn record_delivery(status: &str) {
    metrics::counter!(
        "push_deliveries_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录消费到的文档变更事件
///
/// 集合名来自消息负载，未知集合统一记为 `other`，避免标签基数无限增长。
#[inline]
pub fn record_trigger_event(collection: &str, change_type: &str) {
    metrics::counter!(
        "trigger_events_total",
        "collection" => collection_label(collection),
        "change_type" => change_type.to_string()
    )
    .increment(1);
}

fn collection_label(collection: &str) -> &'static str {
    match collection {
        collections::PARKINGS => collections::PARKINGS,
        collections::USERS => collections::USERS,
        _ => "other",
    }
}
