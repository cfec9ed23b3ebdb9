//! Chat services on top of postbridge.
//!
//! The host registers a `chat` service backed by a shared [`ChatSession`];
//! each view registers a `chatView` service backed by a [`ChatViewModel`].
//! Both sides talk to each other through the typed clients in [`client`].
//!
//! # Example
//!
//! ```rust,ignore
//! use postbridge::{channel_pair, Endpoint, EndpointRole};
//! use postbridge_chat::{
//!     ChatClient, ChatSession, ChatViewClient, ChatViewModel, EchoBackend, PromptKind,
//!     RecordingEditor,
//! };
//! use std::sync::Arc;
//!
//! let (host_end, view_end) = channel_pair();
//! let host = Endpoint::connect(host_end, EndpointRole::Host);
//! let view = Endpoint::connect(view_end, EndpointRole::View);
//!
//! let session = Arc::new(ChatSession::new(
//!     Arc::new(EchoBackend::new()),
//!     Arc::new(RecordingEditor::new()),
//! ));
//! let view_id = session.attach_view(ChatViewClient::new(host.handle()));
//! host.register_service(session.service(view_id)?)?;
//!
//! let model = Arc::new(ChatViewModel::new());
//! view.register_service(model.service()?)?;
//!
//! let chat = ChatClient::connect(&view.handle()).await?;
//! chat.confirm_prompt("hello", PromptKind::Freeform).await?;
//! let reply = model.wait_for_finished_reply().await?;
//! ```

pub mod backend;
pub mod client;
pub mod config;
pub mod contract;
pub mod editor;
pub mod session;
pub mod view;

pub use backend::{ChatBackend, ChatRequest, EchoBackend};
pub use client::{ChatClient, ChatViewClient};
pub use config::ChatConfig;
pub use contract::{
    MessageItem, PromptKind, CHAT_SERVICE, CHAT_SERVICE_NAME, CHAT_VIEW_SERVICE,
    CHAT_VIEW_SERVICE_NAME,
};
pub use editor::{EditorHost, RecordingEditor};
pub use session::{ChatSession, ViewId};
pub use view::{ChatViewModel, ChatViewSnapshot};
