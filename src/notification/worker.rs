// ==========================================
// 种子包衣订单核心 - 通知投递 Worker
// ==========================================
// 职责: 从有界队列取出通知 → 解析收件人 → 并发推送
// 红线: 任何投递失败只记日志(NotificationError),不回传给业务调用方
// ==========================================
// 收件人解析:
// - Operator          → 该人员(需具备 Operator 角色且有推送令牌)
// - CompanyBroadcast  → 公司内所有可达的 Operator
// - CompanyLaboratory → 公司内所有可达的 Laboratory
// ==========================================

use crate::domain::operator::{Operator, Role};
use crate::engine::notifier::{Notification, Recipient};
use crate::notification::gateway::PushGateway;
use crate::notification::NotificationError;
use crate::repository::error::RepositoryResult;
use crate::repository::operator_repo::OperatorRepository;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::mpsc;

// ==========================================
// 收件人目录
// ==========================================

/// 人员目录(实现者: OperatorRepository)
pub trait RecipientDirectory: Send + Sync {
    fn find_operator(&self, operator_id: &str) -> RepositoryResult<Option<Operator>>;
    fn list_company_operators(&self, company_id: &str) -> RepositoryResult<Vec<Operator>>;
}

impl RecipientDirectory for OperatorRepository {
    fn find_operator(&self, operator_id: &str) -> RepositoryResult<Option<Operator>> {
        self.find_by_id(operator_id)
    }

    fn list_company_operators(&self, company_id: &str) -> RepositoryResult<Vec<Operator>> {
        self.list_by_company(company_id)
    }
}

/// 将收件人解析为可推送的人员
pub fn resolve_recipients(
    directory: &dyn RecipientDirectory,
    recipient: &Recipient,
) -> RepositoryResult<Vec<Operator>> {
    let resolved = match recipient {
        Recipient::Operator { operator_id } => directory
            .find_operator(operator_id)?
            .into_iter()
            .filter(|op| op.is_reachable_as(Role::Operator))
            .collect(),
        Recipient::CompanyBroadcast { company_id } => directory
            .list_company_operators(company_id)?
            .into_iter()
            .filter(|op| op.is_reachable_as(Role::Operator))
            .collect(),
        Recipient::CompanyLaboratory { company_id } => directory
            .list_company_operators(company_id)?
            .into_iter()
            .filter(|op| op.is_reachable_as(Role::Laboratory))
            .collect(),
    };
    Ok(resolved)
}

// ==========================================
// NotificationWorker
// ==========================================

/// 单条通知的投递结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct NotificationWorker {
    rx: mpsc::Receiver<Notification>,
    directory: Arc<dyn RecipientDirectory>,
    gateway: Arc<dyn PushGateway>,
}

impl NotificationWorker {
    pub fn new(
        rx: mpsc::Receiver<Notification>,
        directory: Arc<dyn RecipientDirectory>,
        gateway: Arc<dyn PushGateway>,
    ) -> Self {
        Self {
            rx,
            directory,
            gateway,
        }
    }

    /// 持续消费队列,直到所有发送端关闭
    pub async fn run(mut self) {
        tracing::info!("通知投递 worker 已启动");
        while let Some(notification) = self.rx.recv().await {
            let report = dispatch(&self.directory, &self.gateway, notification).await;
            tracing::debug!(delivered = report.delivered, failed = report.failed, "通知投递完成");
        }
        tracing::info!("通知队列已关闭,worker 退出");
    }
}

/// 投递单条通知
pub async fn dispatch(
    directory: &Arc<dyn RecipientDirectory>,
    gateway: &Arc<dyn PushGateway>,
    notification: Notification,
) -> DispatchReport {
    // 目录查询为同步 SQLite 访问,放到阻塞线程池
    let lookup_dir = Arc::clone(directory);
    let recipient = notification.recipient.clone();
    let lookup = tokio::task::spawn_blocking(move || {
        resolve_recipients(lookup_dir.as_ref(), &recipient)
    })
    .await;

    let operators = match lookup {
        Ok(Ok(ops)) => ops,
        Ok(Err(e)) => {
            let err = NotificationError::RecipientLookup(e.to_string());
            tracing::warn!(recipient = ?notification.recipient, error = %err, "通知丢弃");
            return DispatchReport::default();
        }
        Err(e) => {
            let err = NotificationError::RecipientLookup(e.to_string());
            tracing::error!(recipient = ?notification.recipient, error = %err, "收件人解析任务异常");
            return DispatchReport::default();
        }
    };

    if operators.is_empty() {
        tracing::info!(recipient = ?notification.recipient, title = %notification.title, "无可达收件人,跳过通知");
        return DispatchReport::default();
    }

    let sends = operators.iter().map(|op| {
        let notification = &notification;
        async move {
            // is_reachable_as 已保证令牌存在
            let token = op.push_token.as_deref().unwrap_or_default();
            let result = gateway.send(token, notification).await;
            (op.id.as_str(), result)
        }
    });

    let mut report = DispatchReport::default();
    for (operator_id, result) in join_all(sends).await {
        match result {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                report.failed += 1;
                tracing::warn!(operator_id, error = %e, "推送失败");
            }
        }
    }
    report
}
