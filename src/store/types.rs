//! 会话存储类型定义
//!
//! 定义同步引擎使用的数据结构，包括：
//! - `Conversation`: 会话（可能是尚未持久化的草稿会话）
//! - `Message`: 消息
//! - `UserSummary`: 会话另一方的用户摘要
//! - `Origin` / `ReadTrigger` / `ReadSignal`: 已读状态信号
//!
//! 所有线上类型都实现了 Serialize/Deserialize，字段使用 camelCase 与服务器保持一致

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// 标识符
// ============================================================================

/// 会话 ID（由服务器在首条消息持久化时分配）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub i64);

/// 用户 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

/// 消息 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// 用户与消息
// ============================================================================

/// 会话另一方的用户摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub online: bool,
}

impl UserSummary {
    /// 仅知道 ID 时的占位摘要
    pub fn bare(id: UserId) -> Self {
        Self {
            id,
            username: String::new(),
            photo_url: None,
            online: false,
        }
    }
}

/// 消息
///
/// `read` 只能从 false 变为 true，不会回退
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub text: String,
    #[serde(alias = "createdAt")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

// ============================================================================
// 会话
// ============================================================================

/// 会话记录
///
/// `id` 为 `None` 表示草稿会话：客户端已创建，服务器端尚不存在
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(default)]
    pub id: Option<ConversationId>,
    pub other_user: UserSummary,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub latest_message_text: Option<String>,
}

impl Conversation {
    /// 创建草稿会话
    pub fn draft(other_user: UserSummary) -> Self {
        Self {
            id: None,
            other_user,
            messages: Vec::new(),
            unread_count: 0,
            latest_message_text: None,
        }
    }

    /// 是否已在服务器端持久化
    pub fn is_durable(&self) -> bool {
        self.id.is_some()
    }
}

// ============================================================================
// 已读状态信号
// ============================================================================

/// 已读事件的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// 当前客户端产生（本人阅读了自己的收件箱）
    Local,
    /// 通过广播得知（对方阅读了本人发送的消息）
    Remote,
}

/// 已读事件的触发原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadTrigger {
    /// 用户打开了会话
    Opened,
    /// 会话处于打开状态时收到了新消息
    ActiveChat,
}

/// 已读状态信号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSignal {
    pub conversation_id: ConversationId,
    /// 本地信号：会话的另一方；远端信号：广播中携带的用户
    pub user_id: UserId,
    pub origin: Origin,
    pub trigger: ReadTrigger,
}

impl ReadSignal {
    pub fn local(conversation_id: ConversationId, user_id: UserId, trigger: ReadTrigger) -> Self {
        Self {
            conversation_id,
            user_id,
            origin: Origin::Local,
            trigger,
        }
    }

    pub fn remote(conversation_id: ConversationId, user_id: UserId) -> Self {
        Self {
            conversation_id,
            user_id,
            origin: Origin::Remote,
            trigger: ReadTrigger::Opened,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_accepts_created_at_alias() {
        let json = r#"{"id":1,"conversationId":7,"senderId":2,"text":"hi","createdAt":"2026-01-01T00:00:00Z"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.conversation_id, ConversationId(7));
        assert_eq!(msg.sender_id, UserId(2));
        assert!(!msg.read);
    }

    #[test]
    fn test_conversation_without_id_is_draft() {
        let json = r#"{"otherUser":{"id":3}}"#;
        let conv: Conversation = serde_json::from_str(json).unwrap();
        assert!(!conv.is_durable());
        assert_eq!(conv.other_user.username, "");
        assert_eq!(conv.unread_count, 0);
    }
}
