// ==========================================
// 种子包衣订单核心 - 推送网关
// ==========================================
// 职责: 将单条通知推送到单个设备令牌
// 说明: 真实推送服务商接入不在本 crate 内;默认实现仅记录日志
// ==========================================

use crate::engine::notifier::Notification;
use crate::notification::NotificationError;
use async_trait::async_trait;

/// 推送网关
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// 推送到一个设备令牌
    async fn send(&self, push_token: &str, notification: &Notification) -> Result<(), NotificationError>;
}

/// 以日志代替真实推送的网关
#[derive(Debug, Clone, Default)]
pub struct TracingPushGateway;

#[async_trait]
impl PushGateway for TracingPushGateway {
    async fn send(&self, push_token: &str, notification: &Notification) -> Result<(), NotificationError> {
        tracing::info!(
            target: "push",
            token_suffix = %token_suffix(push_token),
            title = %notification.title,
            deep_link = %notification.deep_link,
            "推送通知"
        );
        Ok(())
    }
}

/// 日志中只保留令牌末 6 位
fn token_suffix(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    let start = chars.len().saturating_sub(6);
    chars[start..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_suffix() {
        assert_eq!(token_suffix("ExponentPushToken[abcdef123456]"), "23456]");
        assert_eq!(token_suffix("abc"), "abc");
    }
}
