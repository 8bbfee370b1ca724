//! 会话同步引擎
//!
//! 保证两个独立连接的客户端之间，消息投递、会话房间成员关系和已读状态的一致。
//!
//! ## 控制流
//!
//! ```text
//! 用户操作 → ActiveChatSelector / MessageDispatcher
//!          → DurableStore（持久化）
//!          → RoomMembership（确保已加入房间）
//!          → EventChannel（广播）
//!          → 对方客户端的 ConversationStore
//! ```
//!
//! ## 模块结构
//!
//! - `rooms`: 会话房间成员管理
//! - `dispatch`: 消息发送协调（含新会话的延迟广播）
//! - `read_state`: 已读状态同步
//! - `active_chat`: 当前会话选择
//!
//! `SyncClient` 把以上组件与会话存储组装在一起，并负责把服务器事件路由到对应组件。

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod active_chat;
pub mod dispatch;
pub mod read_state;
pub mod rooms;

use crate::config::{ClientConfig, ConfigError};
use crate::storage::{CredentialProvider, StorageError};
use crate::store::{
    Conversation, ConversationId, ConversationStore, Message, Origin, ReadSignal, ReadTrigger,
    StoreCommand, StoreError, UserId, UserSummary,
};
use crate::transport::{
    ClientEvent, DurableStore, EventChannel, EventSocket, HttpStore, MessageBroadcast,
    PresencePayload, ServerEvent, TransportError,
};
use active_chat::ActiveChatSelector;
use dispatch::MessageDispatcher;
use read_state::ReadStateSynchronizer;
use rooms::RoomMembership;

// ============================================================================
// 错误类型
// ============================================================================

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("当前没有登录用户")]
    NotSignedIn,
}

// ============================================================================
// 同步客户端
// ============================================================================

pub struct SyncClient {
    channel: Arc<dyn EventChannel>,
    durable: Arc<dyn DurableStore>,
    credentials: Arc<dyn CredentialProvider>,
    store: ConversationStore,
    rooms: Arc<RoomMembership>,
    dispatcher: MessageDispatcher,
    read_state: Arc<ReadStateSynchronizer>,
    active: ActiveChatSelector,
    user_id: RwLock<Option<UserId>>,
    cancel: CancellationToken,
}

impl SyncClient {
    /// 用给定的传输实现组装客户端
    pub fn new(
        durable: Arc<dyn DurableStore>,
        channel: Arc<dyn EventChannel>,
        credentials: Arc<dyn CredentialProvider>,
        config: &ClientConfig,
        cancel: CancellationToken,
    ) -> Self {
        let store = ConversationStore::spawn(cancel.child_token());
        let rooms = Arc::new(RoomMembership::new(channel.clone()));
        let read_state = Arc::new(ReadStateSynchronizer::new(
            durable.clone(),
            channel.clone(),
            store.clone(),
        ));
        let dispatcher = MessageDispatcher::new(
            durable.clone(),
            channel.clone(),
            rooms.clone(),
            store.clone(),
            config.broadcast_delay(),
            config.join_ack_timeout(),
            cancel.child_token(),
        );
        let active = ActiveChatSelector::new(read_state.clone());

        Self {
            channel,
            durable,
            credentials,
            store,
            rooms,
            dispatcher,
            read_state,
            active,
            user_id: RwLock::new(None),
            cancel,
        }
    }

    /// 连接持久化存储与事件通道
    ///
    /// 返回客户端和服务器事件接收端（交给 `run_event_loop`）
    pub async fn connect(
        config: &ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerEvent>), SyncError> {
        config.validate()?;

        let durable = HttpStore::new(
            config.api_base()?,
            config.request_timeout(),
            credentials.clone(),
        )?;
        let (socket, events) = EventSocket::connect(&config.socket_url, cancel.child_token()).await?;

        let client = Self::new(
            Arc::new(durable),
            Arc::new(socket),
            credentials,
            config,
            cancel,
        );
        Ok((client, events))
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn active_chat(&self) -> &ActiveChatSelector {
        &self.active
    }

    pub fn user_id(&self) -> Option<UserId> {
        *self.user_id.read()
    }

    // ------------------------------------------------------------------------
    // 会话与在线状态
    // ------------------------------------------------------------------------

    /// 获取当前用户，已登录时上线
    pub async fn bootstrap(&self) -> Result<Option<UserId>, SyncError> {
        let user = self.durable.fetch_user().await?;
        if let Some(id) = user.id {
            self.go_online(id)?;
        } else {
            info!("[Sync] 当前未登录");
        }
        Ok(user.id)
    }

    /// 上线
    pub fn go_online(&self, user_id: UserId) -> Result<(), SyncError> {
        *self.user_id.write() = Some(user_id);
        self.channel
            .emit(ClientEvent::GoOnline(PresencePayload { user_id }))?;
        info!("[Sync] 用户 {} 已上线", user_id);
        Ok(())
    }

    /// 删除凭证、下线并清空本地状态
    ///
    /// 凭证删除或下线事件发送失败时，本地状态仍然清空，随后返回该错误
    pub async fn logout(&self) -> Result<(), SyncError> {
        let user_id = self.user_id.write().take().ok_or(SyncError::NotSignedIn)?;

        let cleared = self.credentials.clear();
        let emitted = self
            .channel
            .emit(ClientEvent::Logout(PresencePayload { user_id }));

        self.active.clear();
        self.rooms.reset();
        self.store.apply(StoreCommand::Reset).await?;
        info!("[Sync] 用户 {} 已下线", user_id);

        if let Err(e) = &cleared {
            warn!("[Sync] 凭证删除失败: {}", e);
        }
        if let Err(e) = &emitted {
            warn!("[Sync] 下线事件发送失败: {}", e);
        }
        cleared?;
        emitted?;
        Ok(())
    }

    /// 加载会话列表并加入所有会话房间
    pub async fn load_conversations(&self) -> Result<usize, SyncError> {
        let conversations = self.durable.fetch_conversations().await?;

        for conversation in &conversations {
            if let Some(id) = conversation.id
                && let Err(e) = self.rooms.join(id, None)
            {
                warn!("[Sync] 加入会话 {} 失败: {}", id, e);
            }
        }

        let count = conversations.len();
        self.store
            .apply(StoreCommand::ConversationsLoaded {
                conversations,
                active: self.active.current(),
            })
            .await?;
        info!("[Sync] 已加载 {} 个会话", count);
        Ok(count)
    }

    /// 与某用户开始草稿会话
    pub async fn open_draft(&self, other_user: UserSummary) -> Result<(), SyncError> {
        self.store.apply(StoreCommand::DraftOpened(other_user)).await?;
        Ok(())
    }

    /// 发送消息
    pub async fn send(
        &self,
        recipient_id: UserId,
        text: impl Into<String>,
        conversation_id: Option<ConversationId>,
    ) -> Result<Message, SyncError> {
        self.dispatcher
            .send(recipient_id, text.into(), conversation_id)
            .await
    }

    /// 切换当前会话
    pub async fn set_active(&self, conversation: &Conversation) -> Result<(), SyncError> {
        self.active.set_active(conversation).await
    }

    // ------------------------------------------------------------------------
    // 服务器事件
    // ------------------------------------------------------------------------

    /// 处理一条服务器事件
    pub async fn handle_event(&self, event: ServerEvent) -> Result<(), SyncError> {
        match event {
            ServerEvent::NewMessage(broadcast) => self.receive_message(broadcast).await,
            ServerEvent::ReadMessage(receipt) => self.read_state.apply_remote(receipt).await,
            ServerEvent::ConversationJoined(ack) => {
                self.dispatcher.acknowledge(ack);
                Ok(())
            }
            ServerEvent::AddOnlineUser(p) => self.set_presence(p.user_id, true).await,
            ServerEvent::RemoveOfflineUser(p) => self.set_presence(p.user_id, false).await,
        }
    }

    async fn receive_message(&self, broadcast: MessageBroadcast) -> Result<(), SyncError> {
        let MessageBroadcast { message, sender } = broadcast;
        let conversation_id = message.conversation_id;

        let origin = match self.user_id() {
            Some(me) if me == message.sender_id => Origin::Local,
            _ => Origin::Remote,
        };

        let other_user = self
            .store
            .snapshot()
            .conversation(conversation_id)
            .map(|c| c.other_user.id)
            .or(sender.as_ref().map(|s| s.id))
            .unwrap_or(message.sender_id);
        let is_active = self.active.is_active(other_user);

        debug!(
            "[Sync] 收到会话 {} 的新消息 {} ({:?})",
            conversation_id, message.id, origin
        );
        self.store
            .apply(StoreCommand::NewMessage {
                message,
                sender,
                origin,
                is_active,
            })
            .await?;

        if is_active && origin == Origin::Remote {
            self.read_state
                .mark_read(ReadSignal::local(
                    conversation_id,
                    other_user,
                    ReadTrigger::ActiveChat,
                ))
                .await?;
        }
        Ok(())
    }

    async fn set_presence(&self, user_id: UserId, online: bool) -> Result<(), SyncError> {
        self.store
            .apply(StoreCommand::PresenceChanged { user_id, online })
            .await?;
        Ok(())
    }

    /// 持续处理服务器事件，直到 `cancel` 触发或事件通道关闭
    pub async fn run_event_loop(
        &self,
        mut events: mpsc::UnboundedReceiver<ServerEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                next = events.recv() => match next {
                    Some(event) => event,
                    None => {
                        warn!("[Sync] 事件通道已关闭");
                        break;
                    }
                },
            };

            if let Err(e) = self.handle_event(event).await {
                warn!("[Sync] 事件处理失败: {}", e);
            }
        }
        info!("[Sync] 事件循环已退出");
    }

    /// 取消所有延迟广播并停止会话存储
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
