//! Typed clients for the chat services.
//!
//! Both wrap a [`ServiceStub`], so they work the same against a service on
//! the peer and against one registered locally.

use crate::contract::{
    chat_methods, view_methods, MessageItem, PromptKind, CHAT_SERVICE, CHAT_VIEW_SERVICE,
};
use postbridge::{BridgeError, EndpointHandle, InterfaceDescriptor, Result, ServiceStub};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::OnceCell;

fn check_conforms(stub: &ServiceStub, interface: &InterfaceDescriptor) -> Result<()> {
    if stub.conforms_to(interface) {
        Ok(())
    } else {
        Err(BridgeError::InvalidService {
            message: format!(
                "service \"{}\" does not implement the \"{}\" interface",
                stub.name(),
                interface.name
            ),
        })
    }
}

/// Client for the host's `chat` service, used by views.
#[derive(Debug, Clone)]
pub struct ChatClient {
    stub: ServiceStub,
}

impl ChatClient {
    /// Look up the `chat` service through `endpoint`.
    pub async fn connect(endpoint: &EndpointHandle) -> Result<Self> {
        let stub = endpoint.get_interface(&CHAT_SERVICE).await?;
        Ok(Self { stub })
    }

    pub fn from_stub(stub: ServiceStub) -> Result<Self> {
        check_conforms(&stub, &CHAT_SERVICE)?;
        Ok(Self { stub })
    }

    /// Submit a prompt. Returns once generation has started, not when the
    /// reply is complete.
    pub async fn confirm_prompt(&self, prompt: &str, kind: PromptKind) -> Result<()> {
        self.stub
            .call(chat_methods::CONFIRM_PROMPT, vec![json!(prompt), json!(kind)])
            .await?;
        Ok(())
    }

    pub async fn reset_chat(&self) -> Result<()> {
        self.stub.call(chat_methods::RESET_CHAT, vec![]).await?;
        Ok(())
    }

    /// Ask the host to replay the conversation to this view.
    pub async fn sync_state(&self) -> Result<()> {
        self.stub.call(chat_methods::SYNC_STATE, vec![]).await?;
        Ok(())
    }

    pub async fn insert_code_snippet(&self, code: &str) -> Result<()> {
        self.stub
            .call(chat_methods::INSERT_CODE_SNIPPET, vec![json!(code)])
            .await?;
        Ok(())
    }
}

#[derive(Debug)]
struct ViewClientInner {
    endpoint: Option<EndpointHandle>,
    stub: OnceCell<ServiceStub>,
}

/// Client for a view's `chatView` service, used by the host.
///
/// The view registers `chatView` after it connects, so the service is
/// resolved on first use rather than up front. A failed lookup is retried on
/// the next call.
#[derive(Debug, Clone)]
pub struct ChatViewClient {
    inner: Arc<ViewClientInner>,
}

impl ChatViewClient {
    pub fn new(endpoint: EndpointHandle) -> Self {
        Self {
            inner: Arc::new(ViewClientInner {
                endpoint: Some(endpoint),
                stub: OnceCell::new(),
            }),
        }
    }

    /// Wrap an already resolved stub.
    pub fn from_stub(stub: ServiceStub) -> Result<Self> {
        check_conforms(&stub, &CHAT_VIEW_SERVICE)?;
        Ok(Self {
            inner: Arc::new(ViewClientInner {
                endpoint: None,
                stub: OnceCell::new_with(Some(stub)),
            }),
        })
    }

    async fn stub(&self) -> Result<&ServiceStub> {
        self.inner
            .stub
            .get_or_try_init(|| async {
                let endpoint = self
                    .inner
                    .endpoint
                    .as_ref()
                    .ok_or(BridgeError::ChannelClosed)?;
                endpoint.get_interface(&CHAT_VIEW_SERVICE).await
            })
            .await
    }

    pub async fn set_is_busy(&self, is_busy: bool) -> Result<()> {
        self.stub()
            .await?
            .call(view_methods::SET_IS_BUSY, vec![json!(is_busy)])
            .await?;
        Ok(())
    }

    pub async fn set_has_selection(&self, has_selection: bool) -> Result<()> {
        self.stub()
            .await?
            .call(view_methods::SET_HAS_SELECTION, vec![json!(has_selection)])
            .await?;
        Ok(())
    }

    pub async fn add_message(&self, message: &MessageItem) -> Result<()> {
        self.stub()
            .await?
            .call(view_methods::ADD_MESSAGE, vec![serde_json::to_value(message)?])
            .await?;
        Ok(())
    }

    pub async fn update_message(&self, message: &MessageItem) -> Result<()> {
        self.stub()
            .await?
            .call(view_methods::UPDATE_MESSAGE, vec![serde_json::to_value(message)?])
            .await?;
        Ok(())
    }

    pub async fn clear_message(&self) -> Result<()> {
        self.stub()
            .await?
            .call(view_methods::CLEAR_MESSAGE, vec![])
            .await?;
        Ok(())
    }
}
