// ==========================================
// 种子包衣订单核心 - 守护进程入口
// ==========================================
// 职责: 打开存储、启动通知 worker 与 TKW 测量调度,Ctrl-C 退出
// ==========================================

use std::sync::Arc;

use seed_treatment::app::{get_default_db_path, open_store, AppState, MeasurementDaemon};
use seed_treatment::config::{ConfigManager, SchedulerConfig};
use seed_treatment::engine::{Notifier, SystemClock};
use seed_treatment::notification::{
    notification_channel, NotificationWorker, RecipientDirectory, TracingPushGateway,
};
use seed_treatment::repository::OperatorRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    seed_treatment::logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", seed_treatment::APP_NAME);
    tracing::info!("系统版本: {}", seed_treatment::VERSION);
    tracing::info!("==================================================");

    let db_path = get_default_db_path();
    tracing::info!("使用数据库: {}", db_path);

    let conn = open_store(&db_path)?;
    let config = SchedulerConfig::load(&ConfigManager::from_connection(conn.clone())?)?;

    // 通知 worker
    let (notifier, rx) = notification_channel(config.notification_queue_capacity);
    let directory: Arc<dyn RecipientDirectory> = Arc::new(OperatorRepository::new(conn.clone()));
    let worker = NotificationWorker::new(rx, directory, Arc::new(TracingPushGateway));
    let worker_handle = tokio::spawn(worker.run());

    let notifier: Arc<dyn Notifier> = Arc::new(notifier);
    let state = AppState::new(conn, &config, notifier, Arc::new(SystemClock))?;

    let daemon = MeasurementDaemon::new(state.scheduler.clone(), config.tick_interval);
    daemon
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "监听 Ctrl-C 失败");
            }
        })
        .await;

    // 释放所有发送端,worker 排空队列后退出
    drop(state);
    worker_handle.await?;

    tracing::info!("守护进程已退出");
    Ok(())
}
