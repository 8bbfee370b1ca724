//! 当前会话选择
//!
//! 当前会话指针只由这里修改。切换到已持久化的会话时，
//! 先完成已读同步，再更新指针。

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use super::SyncError;
use super::read_state::ReadStateSynchronizer;
use crate::store::{Conversation, ReadSignal, ReadTrigger, UserId};

pub struct ActiveChatSelector {
    read_state: Arc<ReadStateSynchronizer>,
    pointer: watch::Sender<Option<UserId>>,
}

impl ActiveChatSelector {
    pub fn new(read_state: Arc<ReadStateSynchronizer>) -> Self {
        let (pointer, _) = watch::channel(None);
        Self {
            read_state,
            pointer,
        }
    }

    /// 切换当前会话
    ///
    /// 已读同步失败时指针保持不变
    pub async fn set_active(&self, conversation: &Conversation) -> Result<(), SyncError> {
        let other = conversation.other_user.id;

        if let Some(id) = conversation.id {
            self.read_state
                .mark_read(ReadSignal::local(id, other, ReadTrigger::Opened))
                .await?;
        }

        self.pointer.send_replace(Some(other));
        info!("[ActiveChat] 当前会话: 用户 {}", other);
        Ok(())
    }

    pub fn clear(&self) {
        self.pointer.send_replace(None);
    }

    pub fn current(&self) -> Option<UserId> {
        *self.pointer.borrow()
    }

    pub fn is_active(&self, user_id: UserId) -> bool {
        self.current() == Some(user_id)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<UserId>> {
        self.pointer.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ConversationId, ConversationStore, StoreCommand, UserSummary};
    use crate::transport::mock::{MockStore, RecordingChannel, StoreCall};
    use tokio_util::sync::CancellationToken;

    const ME: UserId = UserId(1);
    const PEER: UserId = UserId(2);

    fn selector(durable: Arc<MockStore>) -> (ActiveChatSelector, ConversationStore) {
        let store = ConversationStore::spawn(CancellationToken::new());
        let read_state = ReadStateSynchronizer::new(
            durable,
            Arc::new(RecordingChannel::default()),
            store.clone(),
        );
        (ActiveChatSelector::new(Arc::new(read_state)), store)
    }

    #[tokio::test]
    async fn test_draft_sets_pointer_without_read() {
        let durable = Arc::new(MockStore::new(ME, 7));
        let (selector, _) = selector(durable.clone());
        let mut rx = selector.subscribe();

        selector
            .set_active(&Conversation::draft(UserSummary::bare(PEER)))
            .await
            .unwrap();

        assert!(durable.calls().is_empty());
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), Some(PEER));
    }

    #[tokio::test]
    async fn test_durable_conversation_is_read_before_pointer_moves() {
        let durable = Arc::new(MockStore::new(ME, 7));
        let (selector, store) = selector(durable.clone());
        let mut conv = Conversation::draft(UserSummary::bare(PEER));
        conv.id = Some(ConversationId(7));
        conv.unread_count = 4;
        store
            .apply(StoreCommand::ConversationsLoaded {
                conversations: vec![conv.clone()],
                active: None,
            })
            .await
            .unwrap();

        selector.set_active(&conv).await.unwrap();

        assert_eq!(durable.calls(), vec![StoreCall::MarkRead(ConversationId(7))]);
        assert!(selector.is_active(PEER));
        assert_eq!(
            store.snapshot().conversation(ConversationId(7)).unwrap().unread_count,
            0
        );
    }

    #[tokio::test]
    async fn test_failed_read_keeps_previous_pointer() {
        let durable = Arc::new(MockStore::new(ME, 7));
        durable.set_failing(true);
        let (selector, _) = selector(durable);
        let mut conv = Conversation::draft(UserSummary::bare(PEER));
        conv.id = Some(ConversationId(7));

        assert!(selector.set_active(&conv).await.is_err());
        assert_eq!(selector.current(), None);

        selector.clear();
        assert_eq!(selector.current(), None);
    }
}
