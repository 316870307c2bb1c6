//! 停车位通知服务
//!
//! 启动时一次性构造数据库连接池、推送通道与 Kafka 客户端，
//! 之后由触发器逐条处理停车位更新事件。

use std::sync::Arc;

use anyhow::Result;
use parking_shared::{config::AppConfig, database::Database, kafka::KafkaProducer, observability};
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use notification_worker::{
    consumer::TriggerConsumer, directory::PgUserDirectory, dispatcher::NotificationDispatcher,
    sender::build_transport,
};

const SERVICE_NAME: &str = "notification-worker";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {e}");
        AppConfig {
            service_name: SERVICE_NAME.to_string(),
            ..Default::default()
        }
    });

    // 2. 初始化可观测性
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(
        environment = %config.environment,
        push_provider = %config.push.provider,
        max_concurrency = ?config.dispatch.max_concurrency,
        "Starting notification-worker..."
    );

    // 3. 外部客户端
    let db = Database::connect(&config.database).await?;
    db.health_check().await?;
    info!("Database connection established");

    let directory = Arc::new(PgUserDirectory::new(db.pool().clone()));
    let transport = build_transport(&config.push)?;
    let producer = KafkaProducer::new(&config.kafka)?;

    let dispatcher = Arc::new(
        NotificationDispatcher::new(directory, transport)
            .with_max_concurrency(config.dispatch.max_concurrency),
    );

    // 4. 触发器与优雅关闭
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let consumer = TriggerConsumer::new(&config, dispatcher, Arc::new(producer))?;
    if let Err(e) = consumer.run(shutdown_rx).await {
        warn!(error = %e, "Trigger consumer exited with error");
    }

    db.close().await;
    info!("notification-worker stopped");
    Ok(())
}
