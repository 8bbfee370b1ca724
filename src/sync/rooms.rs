//! 会话房间成员管理
//!
//! 事件通道按会话划分房间，只有加入房间的客户端才能收到该会话的广播。
//! 每个会话在一次连接中只加入一次，重复加入不会再次发出事件。

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::store::{ConversationId, UserId};
use crate::transport::{ClientEvent, EventChannel, JoinConversation, TransportError};

pub struct RoomMembership {
    channel: Arc<dyn EventChannel>,
    joined: Mutex<HashSet<ConversationId>>,
}

impl RoomMembership {
    pub fn new(channel: Arc<dyn EventChannel>) -> Self {
        Self {
            channel,
            joined: Mutex::new(HashSet::new()),
        }
    }

    /// 加入会话房间
    ///
    /// `counterparty` 为新会话的接收方，服务器会把对方一起拉入房间。
    /// 返回是否真正发出了加入事件。
    pub fn join(
        &self,
        conversation_id: ConversationId,
        counterparty: Option<UserId>,
    ) -> Result<bool, TransportError> {
        if !self.joined.lock().insert(conversation_id) {
            debug!("[Rooms] 会话 {} 已加入，跳过", conversation_id);
            return Ok(false);
        }

        let event = ClientEvent::JoinConversation(JoinConversation {
            conversation_id,
            recipient_id: counterparty,
        });
        if let Err(e) = self.channel.emit(event) {
            self.joined.lock().remove(&conversation_id);
            return Err(e);
        }

        debug!("[Rooms] 加入会话 {}", conversation_id);
        Ok(true)
    }

    /// 忘记已加入的房间（事件通道重建后需要重新加入）
    pub fn reset(&self) {
        let mut joined = self.joined.lock();
        info!("[Rooms] 清空 {} 个已加入的会话", joined.len());
        joined.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::RecordingChannel;

    #[test]
    fn test_double_join_emits_once() {
        let channel = Arc::new(RecordingChannel::default());
        let rooms = RoomMembership::new(channel.clone());

        assert!(rooms.join(ConversationId(7), Some(UserId(2))).unwrap());
        assert!(!rooms.join(ConversationId(7), Some(UserId(2))).unwrap());

        assert_eq!(channel.names(), vec!["join-conversation"]);
    }

    #[test]
    fn test_reset_allows_rejoin() {
        let channel = Arc::new(RecordingChannel::default());
        let rooms = RoomMembership::new(channel.clone());

        rooms.join(ConversationId(7), None).unwrap();
        rooms.reset();
        rooms.join(ConversationId(7), None).unwrap();

        assert_eq!(channel.events().len(), 2);
    }
}
