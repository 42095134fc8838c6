// ==========================================
// 种子包衣订单核心 - 操作员领域模型
// ==========================================
// 用途: 通知收件人解析(推送令牌 + 角色)
// ==========================================

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Operator,   // 包衣操作员
    Laboratory, // 实验室
    Manager,    // 管理人员
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Operator => "OPERATOR",
            Role::Laboratory => "LABORATORY",
            Role::Manager => "MANAGER",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "OPERATOR" => Some(Role::Operator),
            "LABORATORY" => Some(Role::Laboratory),
            "MANAGER" => Some(Role::Manager),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operator {
    pub id: String,
    pub company_id: String,
    pub name: String,
    pub roles: Vec<Role>,
    pub push_token: Option<String>,
}

impl Operator {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// 可推送: 有非空令牌且具备指定角色
    pub fn is_reachable_as(&self, role: Role) -> bool {
        self.has_role(role)
            && self
                .push_token
                .as_deref()
                .map(|t| !t.trim().is_empty())
                .unwrap_or(false)
    }
}
