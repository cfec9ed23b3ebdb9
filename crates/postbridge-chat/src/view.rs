//! Headless view model backing the `chatView` service.

use crate::contract::{view_methods, MessageItem, CHAT_VIEW_SERVICE_NAME};
use postbridge::{BridgeError, LocalService, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// What a chat view would render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatViewSnapshot {
    pub is_busy: bool,
    pub has_selection: bool,
    pub messages: Vec<MessageItem>,
}

impl ChatViewSnapshot {
    /// The latest bot reply, if any.
    pub fn last_reply(&self) -> Option<&MessageItem> {
        self.messages.iter().rev().find(|m| m.is_reply)
    }
}

/// View-side state updated by the host through `chatView`.
///
/// Changes are published through a watch channel so renderers (and tests)
/// can wait for the state they care about.
#[derive(Debug)]
pub struct ChatViewModel {
    state: watch::Sender<ChatViewSnapshot>,
}

impl Default for ChatViewModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatViewModel {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ChatViewSnapshot::default());
        Self { state }
    }

    pub fn snapshot(&self) -> ChatViewSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatViewSnapshot> {
        self.state.subscribe()
    }

    pub fn set_is_busy(&self, is_busy: bool) {
        self.state.send_modify(|s| s.is_busy = is_busy);
    }

    pub fn set_has_selection(&self, has_selection: bool) {
        self.state.send_modify(|s| s.has_selection = has_selection);
    }

    /// Append a message. A message whose id is already shown replaces it, so a
    /// resync does not duplicate history.
    pub fn add_message(&self, message: MessageItem) {
        self.state.send_modify(|s| {
            match s.messages.iter_mut().find(|m| m.id == message.id) {
                Some(existing) => *existing = message,
                None => s.messages.push(message),
            }
        });
    }

    /// Replace a shown message by id.
    pub fn update_message(&self, message: MessageItem) {
        self.state.send_modify(|s| {
            match s.messages.iter_mut().find(|m| m.id == message.id) {
                Some(existing) => *existing = message,
                None => {
                    debug!("Update for unknown message {}, appending", message.id);
                    s.messages.push(message);
                }
            }
        });
    }

    pub fn clear_messages(&self) {
        self.state.send_modify(|s| s.messages.clear());
    }

    /// Wait until `predicate` holds and return the state that satisfied it.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&ChatViewSnapshot) -> bool,
    ) -> Result<ChatViewSnapshot> {
        let mut rx = self.subscribe();
        let snapshot = rx
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| BridgeError::ChannelClosed)?;
        Ok(snapshot.clone())
    }

    /// Wait for the latest reply to finish and return it.
    pub async fn wait_for_finished_reply(&self) -> Result<MessageItem> {
        let snapshot = self
            .wait_for(|s| s.last_reply().is_some_and(|m| m.is_finished))
            .await?;
        snapshot
            .last_reply()
            .cloned()
            .ok_or_else(|| BridgeError::Other("no reply".to_string()))
    }

    /// The `chatView` service driving this model.
    pub fn service(self: &Arc<Self>) -> Result<LocalService> {
        let busy = self.clone();
        let selection = self.clone();
        let add = self.clone();
        let update = self.clone();
        let clear = self.clone();

        LocalService::builder(CHAT_VIEW_SERVICE_NAME)
            .typed_method(view_methods::SET_IS_BUSY, move |(is_busy,): (bool,)| {
                busy.set_is_busy(is_busy);
                async { Ok(()) }
            })
            .typed_method(
                view_methods::SET_HAS_SELECTION,
                move |(has_selection,): (bool,)| {
                    selection.set_has_selection(has_selection);
                    async { Ok(()) }
                },
            )
            .typed_method(view_methods::ADD_MESSAGE, move |(message,): (MessageItem,)| {
                add.add_message(message);
                async { Ok(()) }
            })
            .typed_method(view_methods::UPDATE_MESSAGE, move |(message,): (MessageItem,)| {
                update.update_message(message);
                async { Ok(()) }
            })
            .typed_method(view_methods::CLEAR_MESSAGE, move |(): ()| {
                clear.clear_messages();
                async { Ok(()) }
            })
            .build()
    }
}
