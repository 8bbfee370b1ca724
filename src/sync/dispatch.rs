//! 消息发送协调
//!
//! ## 发送流程
//!
//! 1. 写入持久化存储（失败则直接返回，不改本地状态、不广播、不重试）
//! 2. 新会话（`conversation_id` 为空）：
//!    - 加入新会话房间并把接收方一起拉入
//!    - 本地存储新增会话
//!    - 延迟广播 `new-message`，给对方客户端加入房间留出时间
//! 3. 已有会话：本地存储追加消息，立即广播
//!
//! ## 延迟广播
//!
//! 至少等待 `broadcast_delay`（默认 500ms）。配置了 `join_ack_timeout` 时，
//! 还会等待对方的 `conversation-joined` 确认，超时仍然广播并记录警告。

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::SyncError;
use super::rooms::RoomMembership;
use crate::store::{ConversationId, ConversationStore, Message, Origin, StoreCommand, UserId};
use crate::transport::{
    ClientEvent, DurableStore, EventChannel, JoinAck, MessageBroadcast, NewMessageRequest,
};

// ============================================================================
// 加入确认
// ============================================================================

/// 等待中的加入确认
#[derive(Default)]
pub struct AckRegistry {
    pending: Mutex<HashMap<ConversationId, (UserId, oneshot::Sender<()>)>>,
}

impl AckRegistry {
    /// 登记等待 `recipient_id` 加入会话的确认
    pub fn register(
        &self,
        conversation_id: ConversationId,
        recipient_id: UserId,
    ) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .insert(conversation_id, (recipient_id, tx));
        rx
    }

    /// 处理确认，返回是否有等待者被唤醒
    pub fn acknowledge(&self, ack: JoinAck) -> bool {
        let mut pending = self.pending.lock();
        match pending.get(&ack.conversation_id) {
            Some((recipient, _)) if *recipient == ack.user_id => {}
            _ => return false,
        }
        match pending.remove(&ack.conversation_id) {
            Some((_, tx)) => tx.send(()).is_ok(),
            None => false,
        }
    }

    fn forget(&self, conversation_id: ConversationId) {
        self.pending.lock().remove(&conversation_id);
    }
}

// ============================================================================
// 发送协调
// ============================================================================

pub struct MessageDispatcher {
    durable: Arc<dyn DurableStore>,
    channel: Arc<dyn EventChannel>,
    rooms: Arc<RoomMembership>,
    store: ConversationStore,
    acks: Arc<AckRegistry>,
    broadcast_delay: Duration,
    join_ack_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl MessageDispatcher {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        channel: Arc<dyn EventChannel>,
        rooms: Arc<RoomMembership>,
        store: ConversationStore,
        broadcast_delay: Duration,
        join_ack_timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            durable,
            channel,
            rooms,
            store,
            acks: Arc::new(AckRegistry::default()),
            broadcast_delay,
            join_ack_timeout,
            cancel,
        }
    }

    /// 发送消息
    ///
    /// 返回持久化后的消息（带服务器分配的 ID 与会话 ID）
    pub async fn send(
        &self,
        recipient_id: UserId,
        text: String,
        conversation_id: Option<ConversationId>,
    ) -> Result<Message, SyncError> {
        let request = NewMessageRequest {
            recipient_id,
            text,
            conversation_id,
        };

        let saved = match self.durable.save_message(&request).await {
            Ok(saved) => saved,
            Err(e) => {
                error!("[Dispatch] 消息持久化失败 (接收方 {}): {}", recipient_id, e);
                return Err(e.into());
            }
        };
        let message = saved.message.clone();
        let broadcast = MessageBroadcast::from(saved);

        match conversation_id {
            None => {
                let new_id = message.conversation_id;
                let ack = self
                    .join_ack_timeout
                    .map(|timeout| (self.acks.register(new_id, recipient_id), timeout));

                if let Err(e) = self.rooms.join(new_id, Some(recipient_id)) {
                    warn!("[Dispatch] 加入新会话 {} 失败: {}", new_id, e);
                }

                self.store
                    .apply(StoreCommand::ConversationAdded {
                        recipient_id,
                        message: message.clone(),
                    })
                    .await?;

                info!("[Dispatch] 新会话 {}，延迟广播首条消息", new_id);
                self.spawn_deferred(new_id, broadcast, ack);
            }
            Some(existing) => {
                self.store
                    .apply(StoreCommand::NewMessage {
                        message: message.clone(),
                        sender: broadcast.sender.clone(),
                        origin: Origin::Local,
                        is_active: false,
                    })
                    .await?;

                if let Err(e) = self.channel.emit(ClientEvent::NewMessage(broadcast)) {
                    warn!("[Dispatch] 会话 {} 广播失败: {}", existing, e);
                }
            }
        }

        Ok(message)
    }

    /// 处理对方的加入确认
    pub fn acknowledge(&self, ack: JoinAck) {
        if self.acks.acknowledge(ack) {
            debug!("[Dispatch] 用户 {} 已加入会话 {}", ack.user_id, ack.conversation_id);
        }
    }

    fn spawn_deferred(
        &self,
        conversation_id: ConversationId,
        broadcast: MessageBroadcast,
        ack: Option<(oneshot::Receiver<()>, Duration)>,
    ) {
        let channel = self.channel.clone();
        let acks = self.acks.clone();
        let cancel = self.cancel.clone();
        let delay = self.broadcast_delay;

        tokio::spawn(async move {
            let wait_ack = async {
                let Some((rx, timeout)) = ack else { return };
                match tokio::time::timeout(timeout, rx).await {
                    Ok(Ok(())) => {}
                    _ => {
                        acks.forget(conversation_id);
                        warn!(
                            "[Dispatch] 等待会话 {} 的加入确认超时，对方可能收不到首条消息",
                            conversation_id
                        );
                    }
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("[Dispatch] 会话 {} 的延迟广播已取消", conversation_id);
                    return;
                }
                _ = async { tokio::join!(tokio::time::sleep(delay), wait_ack) } => {}
            }

            if let Err(e) = channel.emit(ClientEvent::NewMessage(broadcast)) {
                warn!("[Dispatch] 会话 {} 延迟广播失败: {}", conversation_id, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Conversation, UserSummary};
    use crate::transport::mock::{MockStore, RecordingChannel, StoreCall};
    use tokio::time::Instant;

    const ME: UserId = UserId(1);
    const PEER: UserId = UserId(2);

    struct Harness {
        dispatcher: MessageDispatcher,
        durable: Arc<MockStore>,
        channel: Arc<RecordingChannel>,
        store: ConversationStore,
        cancel: CancellationToken,
    }

    fn harness(join_ack_timeout: Option<Duration>) -> Harness {
        let durable = Arc::new(MockStore::new(ME, 7));
        let channel = Arc::new(RecordingChannel::default());
        let cancel = CancellationToken::new();
        let store = ConversationStore::spawn(cancel.clone());
        let rooms = Arc::new(RoomMembership::new(channel.clone()));
        let dispatcher = MessageDispatcher::new(
            durable.clone(),
            channel.clone(),
            rooms,
            store.clone(),
            Duration::from_millis(500),
            join_ack_timeout,
            cancel.clone(),
        );
        Harness {
            dispatcher,
            durable,
            channel,
            store,
            cancel,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_conversation_joins_then_defers_broadcast() {
        let h = harness(None);
        let started = Instant::now();

        let message = h.dispatcher.send(PEER, "hi".to_string(), None).await.unwrap();
        assert_eq!(message.conversation_id, ConversationId(7));
        assert_eq!(h.channel.names(), vec!["join-conversation"]);

        let snapshot = h.store.snapshot();
        let conv = snapshot.conversation(ConversationId(7)).unwrap();
        assert_eq!(conv.other_user.id, PEER);
        assert_eq!(conv.messages, vec![message.clone()]);

        tokio::time::sleep(Duration::from_millis(499)).await;
        assert_eq!(h.channel.names(), vec!["join-conversation"]);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let timed = h.channel.timed();
        assert_eq!(h.channel.names(), vec!["join-conversation", "new-message"]);
        assert!(timed[1].0 - started >= Duration::from_millis(500));
        match &timed[1].1 {
            ClientEvent::NewMessage(b) => {
                assert_eq!(b.message, message);
                assert_eq!(b.sender.as_ref().map(|s| s.id), Some(ME));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_conversation_broadcasts_immediately() {
        let h = harness(None);
        let mut conv = Conversation::draft(UserSummary::bare(PEER));
        conv.id = Some(ConversationId(7));
        h.store
            .apply(StoreCommand::ConversationsLoaded {
                conversations: vec![conv],
                active: None,
            })
            .await
            .unwrap();

        h.dispatcher
            .send(PEER, "again".to_string(), Some(ConversationId(7)))
            .await
            .unwrap();

        assert_eq!(h.channel.names(), vec!["new-message"]);
        let snapshot = h.store.snapshot();
        let conv = snapshot.conversation(ConversationId(7)).unwrap();
        assert_eq!(conv.messages.len(), 1);
        assert_eq!(conv.unread_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_failure_has_no_side_effects() {
        let h = harness(None);
        h.durable.set_failing(true);

        let result = h.dispatcher.send(PEER, "hi".to_string(), None).await;
        assert!(matches!(result, Err(SyncError::Transport(_))));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(h.channel.events().is_empty());
        assert!(h.store.snapshot().conversations.is_empty());
        assert_eq!(h.durable.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_arriving_early_still_waits_for_delay() {
        let h = harness(Some(Duration::from_secs(5)));
        let started = Instant::now();

        h.dispatcher.send(PEER, "hi".to_string(), None).await.unwrap();
        h.dispatcher.acknowledge(JoinAck {
            conversation_id: ConversationId(7),
            user_id: PEER,
        });

        tokio::time::sleep(Duration::from_millis(600)).await;
        let timed = h.channel.timed();
        assert_eq!(timed.len(), 2);
        assert!(timed[1].0 - started >= Duration::from_millis(500));
        assert!(timed[1].0 - started < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_ack_publishes_after_timeout() {
        let h = harness(Some(Duration::from_secs(2)));
        let started = Instant::now();

        h.dispatcher.send(PEER, "hi".to_string(), None).await.unwrap();
        // 非接收方的确认不算数
        h.dispatcher.acknowledge(JoinAck {
            conversation_id: ConversationId(7),
            user_id: ME,
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.channel.names(), vec!["join-conversation"]);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let timed = h.channel.timed();
        assert_eq!(timed.len(), 2);
        assert!(timed[1].0 - started >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_broadcast() {
        let h = harness(None);
        h.dispatcher.send(PEER, "hi".to_string(), None).await.unwrap();

        h.cancel.cancel();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(h.channel.names(), vec!["join-conversation"]);
        assert_eq!(
            h.durable.calls(),
            vec![StoreCall::SaveMessage(NewMessageRequest {
                recipient_id: PEER,
                text: "hi".to_string(),
                conversation_id: None,
            })]
        );
    }
}
