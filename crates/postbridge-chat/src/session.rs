//! Host-side chat session.
//!
//! A [`ChatSession`] owns the conversation and fans state changes out to every
//! attached view. It is constructed explicitly and shared by reference with
//! each connection that serves the `chat` service; there is no global
//! instance.
//!
//! Notifications to views are best effort. A view that fails to receive one
//! is logged and otherwise ignored, so one broken view never blocks the
//! others or the generation itself.

use crate::backend::{ChatBackend, ChatRequest};
use crate::client::ChatViewClient;
use crate::config::ChatConfig;
use crate::contract::{chat_methods, MessageItem, PromptKind, CHAT_SERVICE_NAME};
use crate::editor::EditorHost;
use futures::future::join_all;
use postbridge::{BridgeError, CancellationToken, LocalService, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Identifies one attached view within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ViewId(u64);

impl std::fmt::Display for ViewId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "view-{}", self.0)
    }
}

#[derive(Debug)]
struct Generation {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct SessionState {
    next_message_seq: u64,
    next_view_id: u64,
    next_generation_id: u64,
    messages: Vec<MessageItem>,
    views: BTreeMap<ViewId, ChatViewClient>,
    generation: Option<Generation>,
}

impl SessionState {
    fn next_seq(&mut self) -> u64 {
        self.next_message_seq += 1;
        self.next_message_seq
    }

    fn view_list(&self) -> Vec<(ViewId, ChatViewClient)> {
        self.views
            .iter()
            .map(|(id, view)| (*id, view.clone()))
            .collect()
    }
}

/// Conversation state shared by every connection serving `chat`.
pub struct ChatSession {
    state: Mutex<SessionState>,
    backend: Arc<dyn ChatBackend>,
    editor: Arc<dyn EditorHost>,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("ChatSession")
            .field("messages", &state.messages.len())
            .field("views", &state.views.len())
            .field("generating", &state.generation.is_some())
            .finish()
    }
}

impl ChatSession {
    pub fn new(backend: Arc<dyn ChatBackend>, editor: Arc<dyn EditorHost>) -> Self {
        Self {
            state: Mutex::new(SessionState::default()),
            backend,
            editor,
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start pushing updates to `view`.
    pub fn attach_view(&self, view: ChatViewClient) -> ViewId {
        let mut state = self.state();
        state.next_view_id += 1;
        let id = ViewId(state.next_view_id);
        state.views.insert(id, view);
        info!("Attached {} ({} attached)", id, state.views.len());
        id
    }

    /// Stop pushing updates to `view`.
    ///
    /// Detaching the last view aborts the generation in flight, since nobody
    /// is left to read it.
    pub fn detach_view(&self, view: ViewId) -> bool {
        let mut state = self.state();
        let removed = state.views.remove(&view).is_some();
        if removed {
            info!("Detached {} ({} attached)", view, state.views.len());
        }
        if state.views.is_empty() {
            if let Some(generation) = state.generation.take() {
                info!("No views left, aborting generation {}", generation.id);
                generation.cancel.cancel();
            }
        }
        removed
    }

    pub fn view_count(&self) -> usize {
        self.state().views.len()
    }

    pub fn messages(&self) -> Vec<MessageItem> {
        self.state().messages.clone()
    }

    pub fn is_generating(&self) -> bool {
        self.state().generation.is_some()
    }

    /// Record `prompt` and start generating a reply in the background.
    ///
    /// Returns once the user message and the empty reply have been pushed to
    /// the views. Fails if the prompt is blank, if a reply is already being
    /// generated, or if the editor has no active document.
    pub async fn confirm_prompt(self: &Arc<Self>, prompt: String, kind: PromptKind) -> Result<()> {
        if prompt.trim().is_empty() {
            return Err(BridgeError::Other("Prompt must not be empty".to_string()));
        }
        let selection = self.editor.selected_text().await?;

        let (user, reply, generation_id, cancel, request, views) = {
            let mut state = self.state();
            if state.generation.is_some() {
                return Err(BridgeError::Other("Already generating".to_string()));
            }

            let history = state.messages.clone();
            let user_seq = state.next_seq();
            let user = MessageItem::user(user_seq, prompt.clone());
            let reply_seq = state.next_seq();
            let reply = MessageItem::reply(reply_seq);
            state.messages.push(user.clone());
            state.messages.push(reply.clone());

            state.next_generation_id += 1;
            let generation_id = state.next_generation_id;
            let cancel = CancellationToken::new();
            state.generation = Some(Generation {
                id: generation_id,
                cancel: cancel.clone(),
            });

            let request = ChatRequest {
                prompt,
                kind,
                selection,
                history,
            };
            (user, reply, generation_id, cancel, request, state.view_list())
        };

        info!(
            "Generating {} reply {} (generation {})",
            kind, reply.id, generation_id
        );
        broadcast(&views, "addMessage", |view| {
            let user = user.clone();
            async move { view.add_message(&user).await }
        })
        .await;
        broadcast(&views, "addMessage", |view| {
            let reply = reply.clone();
            async move { view.add_message(&reply).await }
        })
        .await;
        broadcast(&views, "setIsBusy", |view| async move {
            view.set_is_busy(true).await
        })
        .await;

        let session = self.clone();
        tokio::spawn(async move {
            session
                .run_generation(generation_id, reply.id, request, cancel)
                .await;
        });
        Ok(())
    }

    async fn run_generation(
        self: Arc<Self>,
        generation_id: u64,
        reply_id: String,
        request: ChatRequest,
        cancel: CancellationToken,
    ) {
        let (tx, mut rx) = mpsc::channel::<String>(ChatConfig::CHUNK_CHANNEL_CAPACITY);

        let produce = self.backend.generate(request, tx, cancel);
        let consume = async {
            while let Some(chunk) = rx.recv().await {
                self.append_to_reply(&reply_id, &chunk).await;
            }
        };
        let (result, ()) = tokio::join!(produce, consume);

        match result {
            Ok(()) => debug!("Generation {} complete", generation_id),
            Err(BridgeError::Cancelled) => info!("Generation {} cancelled", generation_id),
            Err(e) => warn!("Generation {} failed: {}", generation_id, e),
        }

        // Clear the generation before any view can see the finished reply, so
        // a follow-up prompt is never refused as "Already generating".
        let (finished, was_current, views) = {
            let mut state = self.state();
            let was_current = state
                .generation
                .as_ref()
                .is_some_and(|generation| generation.id == generation_id);
            if was_current {
                state.generation = None;
            }
            let finished = state
                .messages
                .iter_mut()
                .find(|m| m.id == reply_id)
                .map(|message| {
                    message.is_finished = true;
                    message.clone()
                });
            (finished, was_current, state.view_list())
        };

        if let Some(message) = finished {
            broadcast(&views, "updateMessage", |view| {
                let message = message.clone();
                async move { view.update_message(&message).await }
            })
            .await;
        }
        if was_current {
            broadcast(&views, "setIsBusy", |view| async move {
                view.set_is_busy(false).await
            })
            .await;
        }
    }

    /// Append `chunk` to a reply and push the new contents to the views.
    /// A reply that has been cleared in the meantime is left alone.
    async fn append_to_reply(&self, reply_id: &str, chunk: &str) {
        let (message, views) = {
            let mut state = self.state();
            let Some(message) = state.messages.iter_mut().find(|m| m.id == reply_id) else {
                return;
            };
            message.contents.push_str(chunk);
            let message = message.clone();
            (message, state.view_list())
        };

        broadcast(&views, "updateMessage", |view| {
            let message = message.clone();
            async move { view.update_message(&message).await }
        })
        .await;
    }

    /// Abort any generation in flight and clear the conversation everywhere.
    pub async fn reset_chat(&self) -> Result<()> {
        let views = {
            let mut state = self.state();
            if let Some(generation) = state.generation.take() {
                info!("Resetting chat, aborting generation {}", generation.id);
                generation.cancel.cancel();
            }
            state.messages.clear();
            state.view_list()
        };

        broadcast(&views, "clearMessage", |view| async move {
            view.clear_message().await
        })
        .await;
        broadcast(&views, "setIsBusy", |view| async move {
            view.set_is_busy(false).await
        })
        .await;
        Ok(())
    }

    /// Replay the whole conversation, the busy flag and, when the editor
    /// reports it, the selection flag to one view.
    pub async fn sync_state(&self, view: ViewId) -> Result<()> {
        let (client, messages, is_busy) = {
            let state = self.state();
            let client = state.views.get(&view).cloned().ok_or_else(|| {
                BridgeError::Other(format!("{} is not attached to this session", view))
            })?;
            (client, state.messages.clone(), state.generation.is_some())
        };

        debug!("Syncing {} message(s) to {}", messages.len(), view);
        let target = [(view, client)];
        for message in &messages {
            broadcast(&target, "addMessage", |view| {
                let message = message.clone();
                async move { view.add_message(&message).await }
            })
            .await;
        }
        broadcast(&target, "setIsBusy", |view| async move {
            view.set_is_busy(is_busy).await
        })
        .await;
        if let Some(selection) = self.editor.selection_changes() {
            let has_selection = *selection.borrow();
            broadcast(&target, "setHasSelection", |view| async move {
                view.set_has_selection(has_selection).await
            })
            .await;
        }
        Ok(())
    }

    /// Insert generated code into the active editor at its selection.
    pub async fn insert_code_snippet(&self, code: String) -> Result<()> {
        self.editor.insert_at_selection(&code).await?;
        debug!("Inserted {} byte snippet", code.len());
        Ok(())
    }

    /// Tell every view whether the editor currently has a selection.
    pub async fn notify_selection_changed(&self, has_selection: bool) {
        let views = self.state().view_list();
        broadcast(&views, "setHasSelection", |view| async move {
            view.set_has_selection(has_selection).await
        })
        .await;
    }

    /// Forward editor selection changes to every view until the session is
    /// dropped. Returns `None` when the editor cannot report changes.
    pub fn spawn_selection_watcher(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut changes = self.editor.selection_changes()?;
        let session: Weak<Self> = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let has_selection = *changes.borrow_and_update();
                let Some(session) = session.upgrade() else {
                    break;
                };
                debug!("Editor selection changed: {}", has_selection);
                session.notify_selection_changed(has_selection).await;
            }
        }))
    }

    /// The `chat` service as seen by `view`.
    ///
    /// Every connection registers its own instance; they share this session
    /// and differ only in which view `syncState` replays to.
    pub fn service(self: &Arc<Self>, view: ViewId) -> Result<LocalService> {
        let confirm = self.clone();
        let reset = self.clone();
        let sync = self.clone();
        let insert = self.clone();

        LocalService::builder(CHAT_SERVICE_NAME)
            .method(chat_methods::CONFIRM_PROMPT, move |args| {
                let session = confirm.clone();
                async move {
                    let (prompt, kind) = prompt_args(args)?;
                    session.confirm_prompt(prompt, kind).await?;
                    Ok(Value::Null)
                }
            })
            .typed_method(chat_methods::RESET_CHAT, move |(): ()| {
                let session = reset.clone();
                async move { session.reset_chat().await }
            })
            .typed_method(chat_methods::SYNC_STATE, move |(): ()| {
                let session = sync.clone();
                async move { session.sync_state(view).await }
            })
            .typed_method(chat_methods::INSERT_CODE_SNIPPET, move |(code,): (String,)| {
                let session = insert.clone();
                async move { session.insert_code_snippet(code).await }
            })
            .build()
    }
}

/// Decode `confirmPrompt(prompt, msgType?)`. A missing or null `msgType`
/// means freeform.
fn prompt_args(args: Vec<Value>) -> Result<(String, PromptKind)> {
    let invalid = |message: String| BridgeError::InvalidArguments {
        method: chat_methods::CONFIRM_PROMPT.to_string(),
        message,
    };

    let mut args = args.into_iter();
    let prompt = match args.next() {
        Some(Value::String(prompt)) => prompt,
        other => return Err(invalid(format!("expected prompt string, got {:?}", other))),
    };
    let kind = match args.next() {
        None | Some(Value::Null) => PromptKind::default(),
        Some(value) => serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?,
    };
    Ok((prompt, kind))
}

/// Run `notify` against every view concurrently, logging failures.
async fn broadcast<F, Fut>(views: &[(ViewId, ChatViewClient)], what: &str, notify: F)
where
    F: Fn(ChatViewClient) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let results = join_all(views.iter().map(|(_, view)| notify(view.clone()))).await;
    for ((id, _), result) in views.iter().zip(results) {
        if let Err(e) = result {
            warn!("Failed to send {} to {}: {}", what, id, e);
        }
    }
}
