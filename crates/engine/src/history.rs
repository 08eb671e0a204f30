//! Chat history reconstruction

use docchat_common::conversations::{Message, MessageRole, MessageStatus};
use docchat_common::llm::ChatMessage;

/// Prior turns handed to the agent: successful messages with content, oldest
/// first. Failed, pending and empty messages are dropped.
pub fn get_chat_history(messages: &[Message]) -> Vec<ChatMessage> {
    let mut kept: Vec<&Message> = messages
        .iter()
        .filter(|m| m.status == MessageStatus::Success && !m.content.trim().is_empty())
        .collect();
    kept.sort_by_key(|m| m.created_at);

    kept.into_iter()
        .map(|m| match m.role {
            MessageRole::User => ChatMessage::user(m.content.clone()),
            MessageRole::Assistant => ChatMessage::assistant(m.content.clone()),
        })
        .collect()
}
