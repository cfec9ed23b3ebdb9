//! Wire contracts of the chat services.
//!
//! Two services cross the bridge:
//!
//! - `chat`, registered by the host: prompt submission, reset, history resync
//!   and snippet insertion.
//! - `chatView`, registered by each view: busy/selection state and message
//!   updates pushed by the host.

use crate::config::ChatConfig;
use postbridge::{BridgeError, InterfaceDescriptor};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const CHAT_SERVICE_NAME: &str = "chat";
pub const CHAT_VIEW_SERVICE_NAME: &str = "chatView";

/// Method names of the `chat` service.
pub mod chat_methods {
    pub const CONFIRM_PROMPT: &str = "confirmPrompt";
    pub const RESET_CHAT: &str = "resetChat";
    pub const SYNC_STATE: &str = "syncState";
    pub const INSERT_CODE_SNIPPET: &str = "insertCodeSnippet";
}

/// Method names of the `chatView` service.
pub mod view_methods {
    pub const SET_IS_BUSY: &str = "setIsBusy";
    pub const SET_HAS_SELECTION: &str = "setHasSelection";
    pub const ADD_MESSAGE: &str = "addMessage";
    pub const UPDATE_MESSAGE: &str = "updateMessage";
    pub const CLEAR_MESSAGE: &str = "clearMessage";
}

pub const CHAT_SERVICE: InterfaceDescriptor = InterfaceDescriptor {
    name: CHAT_SERVICE_NAME,
    methods: &[
        chat_methods::CONFIRM_PROMPT,
        chat_methods::RESET_CHAT,
        chat_methods::SYNC_STATE,
        chat_methods::INSERT_CODE_SNIPPET,
    ],
};

pub const CHAT_VIEW_SERVICE: InterfaceDescriptor = InterfaceDescriptor {
    name: CHAT_VIEW_SERVICE_NAME,
    methods: &[
        view_methods::SET_IS_BUSY,
        view_methods::SET_HAS_SELECTION,
        view_methods::ADD_MESSAGE,
        view_methods::UPDATE_MESSAGE,
        view_methods::CLEAR_MESSAGE,
    ],
};

/// One entry of the conversation as the view renders it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageItem {
    /// `user:<n>` or `bot:<n>`; `n` is shared by both kinds.
    pub id: String,
    pub contents: String,
    #[serde(default)]
    pub is_reply: bool,
    #[serde(default)]
    pub is_finished: bool,
}

impl MessageItem {
    pub fn user(seq: u64, contents: impl Into<String>) -> Self {
        Self {
            id: format!("{}:{}", ChatConfig::USER_MESSAGE_PREFIX, seq),
            contents: contents.into(),
            is_reply: false,
            is_finished: true,
        }
    }

    /// An empty bot reply, filled in as generation streams.
    pub fn reply(seq: u64) -> Self {
        Self {
            id: format!("{}:{}", ChatConfig::BOT_MESSAGE_PREFIX, seq),
            contents: String::new(),
            is_reply: true,
            is_finished: false,
        }
    }
}

/// What the user asked for, passed as `msgType` to `confirmPrompt`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptKind {
    #[default]
    Freeform,
    Generate,
    Edit,
}

impl PromptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptKind::Freeform => "freeform",
            PromptKind::Generate => "generate",
            PromptKind::Edit => "edit",
        }
    }
}

impl std::fmt::Display for PromptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PromptKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "freeform" => Ok(PromptKind::Freeform),
            "generate" => Ok(PromptKind::Generate),
            "edit" => Ok(PromptKind::Edit),
            other => Err(BridgeError::Validation {
                field: "msgType".to_string(),
                message: format!("unknown prompt kind: {}", other),
            }),
        }
    }
}
