//! 已读状态同步
//!
//! 所有本地已读操作都经过 `mark_read`：先写持久化存储，再通知对方，最后更新本地存储。
//!
//! 收到对方的 `read-message` 广播时只更新本地存储（`apply_remote`），
//! 不再写存储也不再广播，否则两个客户端会互相回显。

use std::sync::Arc;
use tracing::{debug, error, warn};

use super::SyncError;
use crate::store::{ConversationStore, ReadSignal, StoreCommand};
use crate::transport::{ClientEvent, DurableStore, EventChannel, ReadReceipt};

pub struct ReadStateSynchronizer {
    durable: Arc<dyn DurableStore>,
    channel: Arc<dyn EventChannel>,
    store: ConversationStore,
}

impl ReadStateSynchronizer {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        channel: Arc<dyn EventChannel>,
        store: ConversationStore,
    ) -> Self {
        Self {
            durable,
            channel,
            store,
        }
    }

    /// 标记会话已读
    ///
    /// 持久化失败时不发广播、不改本地状态
    pub async fn mark_read(&self, signal: ReadSignal) -> Result<(), SyncError> {
        let conversation_id = signal.conversation_id;

        if let Err(e) = self.durable.mark_conversation_read(conversation_id).await {
            error!("[ReadState] 会话 {} 标记已读失败: {}", conversation_id, e);
            return Err(e.into());
        }

        let receipt = ReadReceipt {
            conversation_id,
            user_id: signal.user_id,
        };
        if let Err(e) = self.channel.emit(ClientEvent::ReadMessage(receipt)) {
            warn!("[ReadState] 已读回执发送失败: {}", e);
        }

        debug!(
            "[ReadState] 会话 {} 已读 ({:?}, {:?})",
            conversation_id, signal.origin, signal.trigger
        );
        self.store.apply(StoreCommand::MessagesRead(signal)).await?;
        Ok(())
    }

    /// 应用对方发来的已读回执
    pub async fn apply_remote(&self, receipt: ReadReceipt) -> Result<(), SyncError> {
        let signal = ReadSignal::remote(receipt.conversation_id, receipt.user_id);
        self.store.apply(StoreCommand::MessagesRead(signal)).await?;
        Ok(())
    }
}
