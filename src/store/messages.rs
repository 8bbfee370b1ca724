//! 消息操作模块
//!
//! 处理单个会话内的消息变更，包括：
//! - `append_message`: 追加消息（按消息 ID 去重）
//! - `mark_messages_read`: 按条件翻转已读标记
//!
//! 每个函数接收旧会话并返回新会话，调用方整体替换会话记录，
//! 读者不会看到修改到一半的会话。

use super::types::{Conversation, Message};

/// 追加消息到会话末尾
///
/// 同一消息 ID 重复到达时返回 `None`（重复加入房间不能导致消息重复）
pub fn append_message(conv: &Conversation, message: Message) -> Option<Conversation> {
    if conv.messages.iter().any(|m| m.id == message.id) {
        return None;
    }

    let mut next = conv.clone();

    // 保持时间顺序：网络乱序到达的旧消息插入到正确位置
    let pos = next
        .messages
        .iter()
        .rposition(|m| m.timestamp <= message.timestamp)
        .map(|i| i + 1)
        .unwrap_or(0);
    next.messages.insert(pos, message);

    if let Some(last) = next.messages.last() {
        next.latest_message_text = Some(last.text.clone());
    }

    Some(next)
}

/// 将满足条件的消息标记为已读
///
/// 已读标记只会 false -> true；没有任何变化时返回 `None`
pub fn mark_messages_read<F>(conv: &Conversation, should_mark: F) -> Option<Conversation>
where
    F: Fn(&Message) -> bool,
{
    if !conv.messages.iter().any(|m| !m.read && should_mark(m)) {
        return None;
    }

    let mut next = conv.clone();
    for message in next.messages.iter_mut() {
        if !message.read && should_mark(message) {
            message.read = true;
        }
    }
    Some(next)
}
