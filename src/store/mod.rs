//! 会话存储模块
//!
//! 保存会话列表、消息和未读数，供同步引擎的各个组件读写。
//!
//! ## 单写者模型
//!
//! 所有变更都以 `StoreCommand` 的形式进入一个命令队列（`async_channel`），
//! 由唯一的后台任务按到达顺序逐条处理。每条命令生成一份新的不可变快照，
//! 通过 `tokio::sync::watch` 整体发布：读者要么看到旧快照，要么看到新快照，
//! 不会看到修改到一半的会话。
//!
//! ## 模块结构
//!
//! - `types`: 数据类型定义（Conversation, Message, ReadSignal）
//! - `conversations`: 会话列表操作（加载、草稿、提升、收消息、已读、在线状态）
//! - `messages`: 单个会话内的消息操作（追加、已读标记）

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub mod conversations;
pub mod messages;
pub mod types;

pub use types::*;

// ============================================================================
// 错误类型
// ============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("会话存储已关闭")]
    Closed,
}

// ============================================================================
// 命令与快照
// ============================================================================

/// 会话存储变更命令
#[derive(Debug, Clone)]
pub enum StoreCommand {
    /// 加载会话列表（`active` 为当前会话的对方用户）
    ConversationsLoaded {
        conversations: Vec<Conversation>,
        active: Option<UserId>,
    },
    /// 打开与某用户的草稿会话
    DraftOpened(UserSummary),
    /// 新会话的首条消息已持久化
    ConversationAdded { recipient_id: UserId, message: Message },
    /// 收到新消息
    NewMessage {
        message: Message,
        sender: Option<UserSummary>,
        origin: Origin,
        is_active: bool,
    },
    /// 已读状态变化
    MessagesRead(ReadSignal),
    /// 对方在线状态变化
    PresenceChanged { user_id: UserId, online: bool },
    /// 清空（登出）
    Reset,
}

/// 会话存储快照
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreState {
    pub conversations: Vec<Conversation>,
    /// 每次变更加一，便于观察者判断是否有更新
    pub revision: u64,
}

impl StoreState {
    /// 应用命令，返回新快照；没有任何变化时返回 `None`
    pub fn apply(&self, command: StoreCommand) -> Option<StoreState> {
        let mut list = self.conversations.clone();

        let changed = match command {
            StoreCommand::ConversationsLoaded {
                conversations: incoming,
                active,
            } => {
                conversations::load_conversations(&mut list, incoming, active);
                true
            }
            StoreCommand::DraftOpened(user) => conversations::open_draft(&mut list, user),
            StoreCommand::ConversationAdded {
                recipient_id,
                message,
            } => {
                conversations::add_conversation(&mut list, recipient_id, message);
                true
            }
            StoreCommand::NewMessage {
                message,
                sender,
                origin,
                is_active,
            } => conversations::receive_message(&mut list, message, sender, origin, is_active),
            StoreCommand::MessagesRead(signal) => conversations::read_messages(&mut list, &signal),
            StoreCommand::PresenceChanged { user_id, online } => {
                conversations::set_presence(&mut list, user_id, online)
            }
            StoreCommand::Reset => {
                list.clear();
                true
            }
        };

        changed.then(|| StoreState {
            conversations: list,
            revision: self.revision + 1,
        })
    }

    /// 按 ID 获取会话
    pub fn conversation(&self, id: ConversationId) -> Option<&Conversation> {
        conversations::find_conversation(&self.conversations, id).map(|i| &self.conversations[i])
    }

    /// 获取与某用户的会话
    pub fn conversation_with(&self, user_id: UserId) -> Option<&Conversation> {
        conversations::find_conversation_with(&self.conversations, user_id)
            .map(|i| &self.conversations[i])
    }

    /// 所有会话的未读总数
    pub fn total_unread(&self) -> u32 {
        self.conversations.iter().map(|c| c.unread_count).sum()
    }
}

// ============================================================================
// 存储句柄
// ============================================================================

struct Envelope {
    command: StoreCommand,
    applied: oneshot::Sender<()>,
}

/// 会话存储句柄（可克隆，所有克隆共享同一个后台写者）
#[derive(Clone)]
pub struct ConversationStore {
    commands: async_channel::Sender<Envelope>,
    snapshot: watch::Receiver<Arc<StoreState>>,
}

impl ConversationStore {
    /// 启动后台写者任务
    ///
    /// `cancel` 触发后写者退出，之后的 `apply` 返回 `StoreError::Closed`
    pub fn spawn(cancel: CancellationToken) -> Self {
        let (commands, queue) = async_channel::unbounded();
        let (publisher, snapshot) = watch::channel(Arc::new(StoreState::default()));

        tokio::spawn(run_writer(queue, publisher, cancel));

        Self { commands, snapshot }
    }

    /// 提交命令并等待其被应用
    pub async fn apply(&self, command: StoreCommand) -> Result<(), StoreError> {
        let (applied, done) = oneshot::channel();
        self.commands
            .send(Envelope { command, applied })
            .await
            .map_err(|_| StoreError::Closed)?;
        done.await.map_err(|_| StoreError::Closed)
    }

    /// 当前快照
    pub fn snapshot(&self) -> Arc<StoreState> {
        self.snapshot.borrow().clone()
    }

    /// 订阅快照变化
    pub fn subscribe(&self) -> watch::Receiver<Arc<StoreState>> {
        self.snapshot.clone()
    }
}

async fn run_writer(
    queue: async_channel::Receiver<Envelope>,
    publisher: watch::Sender<Arc<StoreState>>,
    cancel: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = queue.recv() => match next {
                Ok(envelope) => envelope,
                Err(_) => break,
            },
        };

        let current = publisher.borrow().clone();
        if let Some(next) = current.apply(envelope.command) {
            debug!("[Store] 快照更新到 revision {}", next.revision);
            publisher.send_replace(Arc::new(next));
        }

        let _ = envelope.applied.send(());
    }

    queue.close();
    info!("[Store] 会话存储已停止");
}
