//! Editor bindings used by the chat service.

use async_trait::async_trait;
use postbridge::{BridgeError, Result};
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;

/// The host's active text editor.
#[async_trait]
pub trait EditorHost: Send + Sync {
    /// Currently selected text, `None` when the selection is empty.
    ///
    /// Fails when there is no active editor.
    async fn selected_text(&self) -> Result<Option<String>>;

    /// Replace the current selection with `text`.
    async fn insert_at_selection(&self, text: &str) -> Result<()>;

    /// Whether the active editor has a non-empty selection, updated as the
    /// selection changes. `None` when the editor cannot report changes.
    fn selection_changes(&self) -> Option<watch::Receiver<bool>> {
        None
    }
}

fn no_active_editor() -> BridgeError {
    BridgeError::Other("No active editor".to_string())
}

#[derive(Debug)]
struct EditorState {
    active: bool,
    selection: Option<String>,
    inserted: Vec<String>,
}

/// In-memory editor that records inserted snippets.
#[derive(Debug)]
pub struct RecordingEditor {
    state: Mutex<EditorState>,
    has_selection: watch::Sender<bool>,
}

impl Default for RecordingEditor {
    fn default() -> Self {
        Self {
            state: Mutex::new(EditorState {
                active: true,
                selection: None,
                inserted: Vec::new(),
            }),
            has_selection: watch::channel(false).0,
        }
    }
}

impl RecordingEditor {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, EditorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate opening or closing the active editor.
    pub fn set_active(&self, active: bool) {
        self.state().active = active;
    }

    pub fn set_selection(&self, selection: Option<String>) {
        let has_selection = selection.as_deref().is_some_and(|s| !s.is_empty());
        self.state().selection = selection;
        self.publish_selection(has_selection);
    }

    fn publish_selection(&self, has_selection: bool) {
        self.has_selection.send_if_modified(|current| {
            let changed = *current != has_selection;
            *current = has_selection;
            changed
        });
    }

    /// Snippets inserted so far, oldest first.
    pub fn inserted(&self) -> Vec<String> {
        self.state().inserted.clone()
    }
}

#[async_trait]
impl EditorHost for RecordingEditor {
    async fn selected_text(&self) -> Result<Option<String>> {
        let state = self.state();
        if !state.active {
            return Err(no_active_editor());
        }
        Ok(state.selection.clone().filter(|s| !s.is_empty()))
    }

    async fn insert_at_selection(&self, text: &str) -> Result<()> {
        let mut state = self.state();
        if !state.active {
            return Err(no_active_editor());
        }
        state.inserted.push(text.to_string());
        state.selection = None;
        drop(state);
        self.publish_selection(false);
        Ok(())
    }

    fn selection_changes(&self) -> Option<watch::Receiver<bool>> {
        Some(self.has_selection.subscribe())
    }
}
