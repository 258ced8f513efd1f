use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::message::{Message, Role, ToolCallRequest};

/// Prefix marking a file store entry as base64 encoded binary data
pub const BASE64_FILE_PREFIX: &str = "base64:";

/// A conversation: the message log plus named files referenced from it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

/// State transitions accepted by the conversation store
#[derive(Debug, Clone, PartialEq)]
pub enum ChatAction {
    AddMessage(Message),
    /// Appended as one atomic batch
    AddMessages(Vec<Message>),
    /// Keep messages up to and including the given index; `None` empties the log
    TruncateMessages { last_message: Option<usize> },
    SetFile { name: String, content: String },
    ClearMessages,
    Set(Chat),
}

impl ChatAction {
    /// Whether this action can change the message log (file updates cannot)
    pub fn touches_messages(&self) -> bool {
        !matches!(self, ChatAction::SetFile { .. })
    }
}

/// Pure transition function of the conversation store
pub fn chat_reducer(state: &Chat, action: ChatAction) -> Chat {
    match action {
        ChatAction::AddMessage(message) => {
            let mut next = state.clone();
            next.messages.push(message);
            next
        }
        ChatAction::AddMessages(messages) => {
            let mut next = state.clone();
            next.messages.extend(messages);
            next
        }
        ChatAction::TruncateMessages { last_message } => {
            let keep = match last_message {
                Some(index) => (index + 1).min(state.messages.len()),
                None => 0,
            };
            Chat {
                messages: state.messages[..keep].to_vec(),
                files: state.files.clone(),
            }
        }
        ChatAction::SetFile { name, content } => {
            let mut next = state.clone();
            next.files.insert(name, content);
            next
        }
        // Files are only reachable through messages, so they go too
        ChatAction::ClearMessages => Chat::default(),
        ChatAction::Set(chat) => chat,
    }
}

impl Chat {
    pub fn new(messages: Vec<Message>) -> Self {
        Chat {
            messages,
            files: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.files.is_empty()
    }

    /// Messages that are sent to the completion service
    pub fn non_ephemeral_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| !m.is_ephemeral())
    }

    pub fn last_non_ephemeral(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| !m.is_ephemeral())
    }

    /// True when the conversation ends in a user or tool message
    pub fn completion_due(&self) -> bool {
        matches!(
            self.last_non_ephemeral().map(Message::role),
            Some(Role::User) | Some(Role::Tool)
        )
    }

    /// Tool calls of the trailing assistant message, if it has any
    pub fn pending_tool_calls(&self) -> Option<&[ToolCallRequest]> {
        let last = self.last_non_ephemeral()?;
        if last.has_tool_calls() {
            Some(last.tool_calls())
        } else {
            None
        }
    }

    pub fn last_user_message_index(&self) -> Option<usize> {
        self.messages.iter().rposition(|m| m.role() == Role::User)
    }

    /// Decode a binary file stored with the `base64:` prefix
    pub fn file_bytes(&self, name: &str) -> Option<Vec<u8>> {
        let content = self.files.get(name)?;
        let data = content.strip_prefix(BASE64_FILE_PREFIX)?;
        STANDARD.decode(data).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Chat {
        Chat::new(vec![
            Message::user("first"),
            Message::assistant("one"),
            Message::user("second"),
            Message::assistant("two"),
        ])
    }

    #[test]
    fn test_truncate_keeps_prefix() {
        let chat = sample();
        let next = chat_reducer(&chat, ChatAction::TruncateMessages { last_message: Some(1) });
        assert_eq!(next.messages, chat.messages[..2].to_vec());
    }

    #[test]
    fn test_truncate_is_idempotent() {
        let chat = sample();
        let action = ChatAction::TruncateMessages { last_message: Some(2) };
        let once = chat_reducer(&chat, action.clone());
        let twice = chat_reducer(&once, action);
        assert_eq!(once, twice);
        assert_eq!(once.messages.len(), 3);
    }

    #[test]
    fn test_truncate_none_empties_log() {
        let mut chat = sample();
        chat.files.insert("a.png".into(), "base64:AA==".into());
        let next = chat_reducer(&chat, ChatAction::TruncateMessages { last_message: None });
        assert!(next.messages.is_empty());
        assert_eq!(next.files, chat.files);
    }

    #[test]
    fn test_truncate_past_end_is_noop() {
        let chat = sample();
        let next = chat_reducer(&chat, ChatAction::TruncateMessages { last_message: Some(99) });
        assert_eq!(next, chat);
    }

    #[test]
    fn test_add_messages_appends_batch_in_order() {
        let chat = Chat::new(vec![Message::user("q")]);
        let next = chat_reducer(
            &chat,
            ChatAction::AddMessages(vec![Message::tool("1", "a"), Message::tool("2", "b")]),
        );
        assert_eq!(next.messages.len(), 3);
        assert_eq!(next.messages[2], Message::tool("2", "b"));
        // the previous state is untouched
        assert_eq!(chat.messages.len(), 1);
    }

    #[test]
    fn test_set_file_and_clear() {
        let chat = sample();
        let next = chat_reducer(
            &chat,
            ChatAction::SetFile {
                name: "figure.json".into(),
                content: "{}".into(),
            },
        );
        assert_eq!(next.messages, chat.messages);
        assert_eq!(next.files.get("figure.json").map(String::as_str), Some("{}"));

        let cleared = chat_reducer(&next, ChatAction::ClearMessages);
        assert!(cleared.is_empty());
    }

    #[test]
    fn test_set_replaces_everything() {
        let replacement = Chat::new(vec![Message::user("restored")]);
        let next = chat_reducer(&sample(), ChatAction::Set(replacement.clone()));
        assert_eq!(next, replacement);
    }

    #[test]
    fn test_completion_due_ignores_client_side_messages() {
        let mut chat = Chat::new(vec![Message::user("q")]);
        assert!(chat.completion_due());
        chat.messages.push(Message::client_side_only("note"));
        assert!(chat.completion_due());
        chat.messages.push(Message::assistant("a"));
        assert!(!chat.completion_due());
        assert!(!Chat::default().completion_due());
    }

    #[test]
    fn test_pending_tool_calls() {
        let call = ToolCallRequest::new("c1", "compute_script", &json!({}));
        let chat = Chat::new(vec![
            Message::user("q"),
            Message::assistant_tool_calls(None, vec![call.clone()]),
            Message::client_side_only("running"),
        ]);
        assert_eq!(chat.pending_tool_calls(), Some(&[call][..]));
        assert!(!chat.completion_due());
    }

    #[test]
    fn test_file_bytes() {
        let mut chat = Chat::default();
        chat.files.insert("x.png".into(), "base64:aGVsbG8=".into());
        chat.files.insert("plain.json".into(), "{}".into());
        assert_eq!(chat.file_bytes("x.png"), Some(b"hello".to_vec()));
        assert_eq!(chat.file_bytes("plain.json"), None);
        assert_eq!(chat.file_bytes("missing"), None);
    }

    #[test]
    fn test_last_user_message_index() {
        assert_eq!(sample().last_user_message_index(), Some(2));
        assert_eq!(Chat::default().last_user_message_index(), None);
    }
}
