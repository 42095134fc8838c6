// ==========================================
// 种子包衣订单核心 - 通知投递
// ==========================================
// 职责: Notifier 的生产实现(有界队列 + 后台 worker + 推送网关)
// 红线: notify 永不阻塞;队列满时丢弃并告警
// ==========================================

pub mod gateway;
pub mod worker;

use crate::engine::notifier::{Notification, Notifier};
use thiserror::Error;
use tokio::sync::mpsc;

pub use gateway::{PushGateway, TracingPushGateway};
pub use worker::{dispatch, resolve_recipients, DispatchReport, NotificationWorker, RecipientDirectory};

/// 通知投递错误(仅记日志,不返回给业务调用方)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("通知队列已满")]
    QueueFull,

    #[error("通知队列已关闭")]
    QueueClosed,

    #[error("收件人解析失败: {0}")]
    RecipientLookup(String),

    #[error("推送失败: {0}")]
    Delivery(String),
}

/// 创建有界通知通道
pub fn notification_channel(capacity: usize) -> (QueuedNotifier, mpsc::Receiver<Notification>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (QueuedNotifier { tx }, rx)
}

/// 队列式通知者: 只负责入队
#[derive(Debug, Clone)]
pub struct QueuedNotifier {
    tx: mpsc::Sender<Notification>,
}

impl QueuedNotifier {
    /// 尝试入队
    pub fn try_enqueue(&self, notification: Notification) -> Result<(), NotificationError> {
        self.tx.try_send(notification).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NotificationError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => NotificationError::QueueClosed,
        })
    }
}

impl Notifier for QueuedNotifier {
    fn notify(&self, notification: Notification) {
        let recipient = notification.recipient.clone();
        if let Err(e) = self.try_enqueue(notification) {
            tracing::warn!(recipient = ?recipient, error = %e, "通知未入队,已丢弃");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::operator::{Operator, Role};
    use crate::engine::notifier::Recipient;
    use crate::repository::error::RepositoryResult;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct StaticDirectory {
        operators: Vec<Operator>,
    }

    impl RecipientDirectory for StaticDirectory {
        fn find_operator(&self, operator_id: &str) -> RepositoryResult<Option<Operator>> {
            Ok(self.operators.iter().find(|o| o.id == operator_id).cloned())
        }

        fn list_company_operators(&self, company_id: &str) -> RepositoryResult<Vec<Operator>> {
            Ok(self
                .operators
                .iter()
                .filter(|o| o.company_id == company_id)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct RecordingGateway {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PushGateway for RecordingGateway {
        async fn send(&self, push_token: &str, _n: &Notification) -> Result<(), NotificationError> {
            if push_token == "broken" {
                return Err(NotificationError::Delivery("device unregistered".to_string()));
            }
            self.sent.lock().unwrap().push(push_token.to_string());
            Ok(())
        }
    }

    fn operator(id: &str, roles: Vec<Role>, token: Option<&str>) -> Operator {
        Operator {
            id: id.to_string(),
            company_id: "c-1".to_string(),
            name: id.to_string(),
            roles,
            push_token: token.map(str::to_string),
        }
    }

    fn directory() -> Arc<dyn RecipientDirectory> {
        Arc::new(StaticDirectory {
            operators: vec![
                operator("op-1", vec![Role::Operator], Some("tok-1")),
                operator("op-2", vec![Role::Operator], None),
                operator("op-3", vec![Role::Operator], Some("broken")),
                operator("lab-1", vec![Role::Laboratory], Some("tok-lab")),
            ],
        })
    }

    fn notification(recipient: Recipient) -> Notification {
        Notification {
            recipient,
            title: "t".to_string(),
            body: "b".to_string(),
            deep_link: "seedtreat://orders/o-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_only_reachable_operators() {
        let gateway = Arc::new(RecordingGateway::default());
        let gw: Arc<dyn PushGateway> = gateway.clone();
        let report = dispatch(
            &directory(),
            &gw,
            notification(Recipient::CompanyBroadcast {
                company_id: "c-1".to_string(),
            }),
        )
        .await;

        assert_eq!(report, DispatchReport { delivered: 1, failed: 1 });
        assert_eq!(*gateway.sent.lock().unwrap(), vec!["tok-1".to_string()]);
    }

    #[tokio::test]
    async fn test_laboratory_recipient_uses_lab_role() {
        let gateway = Arc::new(RecordingGateway::default());
        let gw: Arc<dyn PushGateway> = gateway.clone();
        let report = dispatch(
            &directory(),
            &gw,
            notification(Recipient::CompanyLaboratory {
                company_id: "c-1".to_string(),
            }),
        )
        .await;

        assert_eq!(report.delivered, 1);
        assert_eq!(*gateway.sent.lock().unwrap(), vec!["tok-lab".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_operator_is_skipped() {
        let gw: Arc<dyn PushGateway> = Arc::new(RecordingGateway::default());
        let report = dispatch(
            &directory(),
            &gw,
            notification(Recipient::Operator {
                operator_id: "ghost".to_string(),
            }),
        )
        .await;
        assert_eq!(report, DispatchReport::default());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (notifier, mut rx) = notification_channel(1);
        let n = notification(Recipient::Operator {
            operator_id: "op-1".to_string(),
        });

        assert!(notifier.try_enqueue(n.clone()).is_ok());
        assert_eq!(notifier.try_enqueue(n.clone()), Err(NotificationError::QueueFull));
        notifier.notify(n.clone());

        assert_eq!(rx.recv().await, Some(n));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_worker_drains_queue_until_closed() {
        let gateway = Arc::new(RecordingGateway::default());
        let (notifier, rx) = notification_channel(8);
        let worker = NotificationWorker::new(rx, directory(), gateway.clone());

        notifier.notify(notification(Recipient::Operator {
            operator_id: "op-1".to_string(),
        }));
        notifier.notify(notification(Recipient::CompanyLaboratory {
            company_id: "c-1".to_string(),
        }));
        drop(notifier);

        worker.run().await;
        assert_eq!(gateway.sent.lock().unwrap().len(), 2);
    }
}
