//! 线上协议定义
//!
//! 事件通道上的消息统一为带标签的 JSON：
//!
//! ```json
//! {"event": "new-message", "data": {"message": {...}, "sender": {...}}}
//! ```
//!
//! 持久化存储的请求/响应体也定义在这里。

use serde::{Deserialize, Serialize};

use crate::store::{ConversationId, Message, UserId, UserSummary};

// ============================================================================
// 事件负载
// ============================================================================

/// 在线状态负载
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub user_id: UserId,
}

/// 加入会话房间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinConversation {
    pub conversation_id: ConversationId,
    /// 新会话时一并拉入房间的接收方
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<UserId>,
}

/// 新消息广播
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBroadcast {
    pub message: Message,
    #[serde(default)]
    pub sender: Option<UserSummary>,
}

/// 已读回执
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
}

/// 对方已加入会话房间的确认
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinAck {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
}

// ============================================================================
// 事件
// ============================================================================

/// 客户端发往服务器的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// 上线
    GoOnline(PresencePayload),
    /// 下线
    Logout(PresencePayload),
    /// 加入会话房间
    JoinConversation(JoinConversation),
    /// 广播新消息
    NewMessage(MessageBroadcast),
    /// 广播已读回执
    ReadMessage(ReadReceipt),
}

impl ClientEvent {
    /// 事件名（用于日志）
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::GoOnline(_) => "go-online",
            ClientEvent::Logout(_) => "logout",
            ClientEvent::JoinConversation(_) => "join-conversation",
            ClientEvent::NewMessage(_) => "new-message",
            ClientEvent::ReadMessage(_) => "read-message",
        }
    }
}

/// 服务器推送给客户端的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// 新消息
    NewMessage(MessageBroadcast),
    /// 对方已读
    ReadMessage(ReadReceipt),
    /// 对方已加入会话房间
    ConversationJoined(JoinAck),
    /// 用户上线
    AddOnlineUser(PresencePayload),
    /// 用户下线
    RemoveOfflineUser(PresencePayload),
}

// ============================================================================
// 持久化存储请求/响应
// ============================================================================

/// `POST /api/messages` 请求体
///
/// `conversation_id` 为 `None` 时序列化为 `null`，由服务器创建新会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessageRequest {
    pub recipient_id: UserId,
    pub text: String,
    pub conversation_id: Option<ConversationId>,
}

/// `POST /api/messages` 响应体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedMessage {
    pub message: Message,
    #[serde(default)]
    pub sender: Option<UserSummary>,
}

impl From<SavedMessage> for MessageBroadcast {
    fn from(saved: SavedMessage) -> Self {
        MessageBroadcast {
            message: saved.message,
            sender: saved.sender,
        }
    }
}

/// `PATCH /api/conversations/read` 请求体
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadRequest {
    pub conversation_id: ConversationId,
}

/// `GET /auth/user` 响应体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    /// 未登录时服务器返回空对象
    #[serde(default)]
    pub id: Option<UserId>,
    #[serde(default)]
    pub username: Option<String>,
}

/// 错误响应体
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub error: String,
}
