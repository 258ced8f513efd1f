use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::models::chat::{chat_reducer, Chat, ChatAction};

/// A published state of the conversation. `revision` changes whenever the
/// part of the log sent to the model changes and is used to tag work derived
/// from a given tail. Client-side-only messages and files leave it alone.
#[derive(Debug, Clone, Default)]
pub struct ChatSnapshot {
    pub chat: Arc<Chat>,
    pub revision: u64,
}

/// Single source of truth for the conversation. All mutation goes through
/// `dispatch`; subscribers are woken after every transition.
pub struct ConversationStore {
    state: watch::Sender<ChatSnapshot>,
}

impl ConversationStore {
    pub fn new(chat: Chat) -> Self {
        let (state, _) = watch::channel(ChatSnapshot {
            chat: Arc::new(chat),
            revision: 0,
        });
        Self { state }
    }

    pub fn dispatch(&self, action: ChatAction) {
        self.state.send_modify(|snapshot| apply(snapshot, action));
    }

    /// Apply `action` only if the message log is still at `revision`.
    /// Returns false, leaving the store untouched, for stale work.
    pub fn dispatch_at(&self, revision: u64, action: ChatAction) -> bool {
        self.state.send_if_modified(|snapshot| {
            if snapshot.revision != revision {
                debug!(
                    expected = revision,
                    current = snapshot.revision,
                    "rejecting stale chat action"
                );
                return false;
            }
            apply(snapshot, action);
            true
        })
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.state.borrow().clone()
    }

    pub fn chat(&self) -> Arc<Chat> {
        Arc::clone(&self.state.borrow().chat)
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.state.subscribe()
    }
}

fn apply(snapshot: &mut ChatSnapshot, action: ChatAction) {
    let touches_messages = action.touches_messages();
    let next = chat_reducer(&snapshot.chat, action);
    if touches_messages
        && next
            .non_ephemeral_messages()
            .ne(snapshot.chat.non_ephemeral_messages())
    {
        snapshot.revision += 1;
    }
    snapshot.chat = Arc::new(next);
}
