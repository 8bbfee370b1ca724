//! 会话操作模块
//!
//! 处理会话列表的变更，包括：
//! - `load_conversations`: 用服务器返回的会话列表替换本地列表（保留未匹配的草稿）
//! - `open_draft`: 为尚未聊过的用户创建草稿会话
//! - `add_conversation`: 首条消息持久化后，将草稿提升为正式会话
//! - `receive_message`: 收到新消息（本地发送或远端广播）
//! - `read_messages`: 应用已读状态信号
//! - `set_presence`: 更新对方在线状态
//!
//! ## 原子替换
//!
//! 所有函数都先构造新的会话记录，再整体替换列表中的旧记录，
//! 不在原记录上做局部修改。

use tracing::{debug, warn};

use super::messages::{append_message, mark_messages_read};
use super::types::{
    Conversation, ConversationId, Message, Origin, ReadSignal, UserId, UserSummary,
};

/// 按会话 ID 查找
pub fn find_conversation(list: &[Conversation], id: ConversationId) -> Option<usize> {
    list.iter().position(|c| c.id == Some(id))
}

/// 按对方用户查找
pub fn find_conversation_with(list: &[Conversation], user_id: UserId) -> Option<usize> {
    list.iter().position(|c| c.other_user.id == user_id)
}

/// 整理服务器快照：消息按时间排序并补全预览
fn normalize(mut conv: Conversation) -> Conversation {
    conv.messages.sort_by_key(|m| m.timestamp);
    if let Some(last) = conv.messages.last() {
        conv.latest_message_text = Some(last.text.clone());
    }
    conv
}

/// 替换会话列表
///
/// `active` 为当前会话的对方用户，其未读数保持为 0
pub fn load_conversations(
    list: &mut Vec<Conversation>,
    incoming: Vec<Conversation>,
    active: Option<UserId>,
) {
    let mut next: Vec<Conversation> = list
        .iter()
        .filter(|c| !c.is_durable())
        .filter(|draft| !incoming.iter().any(|c| c.other_user.id == draft.other_user.id))
        .cloned()
        .collect();

    next.extend(incoming.into_iter().map(normalize).map(|mut conv| {
        if Some(conv.other_user.id) == active {
            conv.unread_count = 0;
        }
        conv
    }));
    *list = next;
}

/// 创建草稿会话（已存在与该用户的会话时不做任何操作）
pub fn open_draft(list: &mut Vec<Conversation>, other_user: UserSummary) -> bool {
    if find_conversation_with(list, other_user.id).is_some() {
        return false;
    }
    list.insert(0, Conversation::draft(other_user));
    true
}

/// 首条消息持久化后创建正式会话
pub fn add_conversation(list: &mut Vec<Conversation>, recipient_id: UserId, message: Message) {
    let conversation_id = message.conversation_id;

    let existing = list
        .iter()
        .position(|c| c.other_user.id == recipient_id && !c.is_durable())
        .or_else(|| find_conversation(list, conversation_id));

    match existing {
        Some(idx) => {
            let mut promoted = list[idx].clone();
            promoted.id = Some(conversation_id);
            let promoted = append_message(&promoted, message).unwrap_or(promoted);
            list[idx] = promoted;
        }
        None => {
            let conv = Conversation::draft(UserSummary::bare(recipient_id));
            let mut conv = append_message(&conv, message).unwrap_or(conv);
            conv.id = Some(conversation_id);
            list.insert(0, conv);
        }
    }
}

/// 收到新消息
///
/// - `Origin::Local`: 本人发送的消息，不影响未读数
/// - `Origin::Remote`: 对方发送的消息，会话不是当前会话时未读数加一
///
/// 会话未知且带有发送者信息时新建会话（或提升与该发送者的草稿会话）
pub fn receive_message(
    list: &mut Vec<Conversation>,
    message: Message,
    sender: Option<UserSummary>,
    origin: Origin,
    is_active: bool,
) -> bool {
    let conversation_id = message.conversation_id;
    let from_other = origin == Origin::Remote;

    let idx = find_conversation(list, conversation_id).or_else(|| {
        sender
            .as_ref()
            .and_then(|s| list.iter().position(|c| c.other_user.id == s.id && !c.is_durable()))
    });

    match idx {
        Some(idx) => {
            let mut base = list[idx].clone();
            base.id = Some(conversation_id);
            let Some(mut next) = append_message(&base, message) else {
                debug!("[Store] 重复消息已忽略: 会话 {}", conversation_id);
                return false;
            };
            if is_active {
                next.unread_count = 0;
            } else if from_other {
                next.unread_count += 1;
            }
            list[idx] = next;
            true
        }
        None => {
            let Some(sender) = sender else {
                warn!(
                    "[Store] 收到未知会话 {} 的消息但缺少发送者信息，已丢弃",
                    conversation_id
                );
                return false;
            };
            let conv = Conversation::draft(sender);
            let mut conv = append_message(&conv, message).unwrap_or(conv);
            conv.id = Some(conversation_id);
            conv.unread_count = if from_other && !is_active { 1 } else { 0 };
            list.insert(0, conv);
            true
        }
    }
}

/// 应用已读状态信号
///
/// - `Origin::Local`: 未读数无条件清零，对方发送的消息标记为已读
/// - `Origin::Remote`: 未读数不变，`sender_id != user_id` 的消息标记为已读
pub fn read_messages(list: &mut [Conversation], signal: &ReadSignal) -> bool {
    let Some(idx) = find_conversation(list, signal.conversation_id) else {
        debug!("[Store] 已读信号对应的会话不存在: {}", signal.conversation_id);
        return false;
    };

    let current = &list[idx];
    let user_id = signal.user_id;

    let next = match signal.origin {
        Origin::Local => {
            let mut next = mark_messages_read(current, |m| m.sender_id == user_id)
                .unwrap_or_else(|| current.clone());
            next.unread_count = 0;
            next
        }
        Origin::Remote => match mark_messages_read(current, |m| m.sender_id != user_id) {
            Some(next) => next,
            None => return false,
        },
    };

    if next == list[idx] {
        return false;
    }
    list[idx] = next;
    true
}

/// 更新对方在线状态
pub fn set_presence(list: &mut [Conversation], user_id: UserId, online: bool) -> bool {
    let Some(idx) = find_conversation_with(list, user_id) else {
        return false;
    };
    if list[idx].other_user.online == online {
        return false;
    }
    let mut next = list[idx].clone();
    next.other_user.online = online;
    list[idx] = next;
    true
}
