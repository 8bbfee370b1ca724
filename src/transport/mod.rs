//! 传输层模块
//!
//! 同步引擎依赖两种外部通道：
//! - 持久化存储（请求/响应，REST over HTTP）：`DurableStore`，由 `HttpStore` 实现
//! - 事件通道（低延迟推送，WebSocket）：`EventChannel`，由 `EventSocket` 实现
//!
//! 同步组件只依赖这两个 trait，测试时替换为 `mock` 中的记录型实现。
//!
//! ## 模块结构
//!
//! - `protocol`: 事件与请求/响应体定义
//! - `http`: 持久化存储客户端
//! - `socket`: 事件通道客户端

use async_trait::async_trait;
use thiserror::Error;

use crate::store::{Conversation, ConversationId};

pub mod http;
pub mod protocol;
pub mod socket;

pub use http::HttpStore;
pub use protocol::*;
pub use socket::EventSocket;

// ============================================================================
// 错误类型
// ============================================================================

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("请求失败: {0}")]
    Request(#[from] reqwest::Error),

    #[error("服务器返回错误 ({status}): {message}")]
    Status { status: u16, message: String },

    #[error("响应解析失败: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("事件通道错误: {0}")]
    Channel(String),
}

// ============================================================================
// 传输接口
// ============================================================================

/// 持久化存储
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// 获取当前用户的全部会话
    async fn fetch_conversations(&self) -> Result<Vec<Conversation>, TransportError>;

    /// 持久化一条消息；`conversation_id` 为空时服务器创建新会话
    async fn save_message(&self, request: &NewMessageRequest)
    -> Result<SavedMessage, TransportError>;

    /// 将会话标记为已读（服务器端幂等）
    async fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
    ) -> Result<(), TransportError>;

    /// 获取当前登录用户
    async fn fetch_user(&self) -> Result<CurrentUser, TransportError>;
}

/// 事件通道
///
/// 发送即返回，不等待服务器确认
pub trait EventChannel: Send + Sync {
    fn emit(&self, event: ClientEvent) -> Result<(), TransportError>;
}

// ============================================================================
// 测试替身
// ============================================================================
