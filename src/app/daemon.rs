// ==========================================
// 种子包衣订单核心 - 测量调度守护任务
// ==========================================
// 职责: 按固定间隔驱动 MeasurementScheduler::tick
// 约束: 单个 tokio 任务串行执行,tick 之间不重叠;错过的 tick 直接跳过
// ==========================================

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::engine::measurement_scheduler::MeasurementScheduler;

pub struct MeasurementDaemon {
    scheduler: Arc<MeasurementScheduler>,
    tick_interval: Duration,
}

impl MeasurementDaemon {
    pub fn new(scheduler: Arc<MeasurementScheduler>, tick_interval: Duration) -> Self {
        Self {
            scheduler,
            tick_interval,
        }
    }

    /// 运行直到 shutdown 完成,返回已执行的 tick 数
    pub async fn run_until<F>(self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        tracing::info!(tick_interval_ms = self.tick_interval.as_millis() as u64, "测量调度守护任务启动");

        let mut ticks = 0u64;
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    // tick 内为同步 SQLite 访问
                    let scheduler = Arc::clone(&self.scheduler);
                    match tokio::task::spawn_blocking(move || scheduler.tick()).await {
                        Ok(report) => {
                            ticks += 1;
                            if !report.skipped.is_empty() {
                                tracing::warn!(skipped = report.skipped.len(), "本轮存在跳过的订单");
                            }
                        }
                        Err(e) => tracing::error!(error = %e, "调度 tick 任务异常"),
                    }
                }
            }
        }

        tracing::info!(ticks, "测量调度守护任务停止");
        ticks
    }
}
