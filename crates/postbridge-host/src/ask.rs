//! One-shot view client.

use anyhow::{anyhow, Context};
use postbridge::{Endpoint, EndpointRole, StreamTransport};
use postbridge_chat::{ChatClient, ChatViewModel, PromptKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Connect as a view, submit `prompt` and return the finished reply.
pub async fn ask(
    host: &str,
    port: u16,
    kind: PromptKind,
    prompt: &str,
    timeout: Duration,
) -> anyhow::Result<String> {
    let stream = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("failed to connect to {}:{}", host, port))?;
    stream.set_nodelay(true)?;
    let mut view = Endpoint::connect(StreamTransport::from_tcp(stream), EndpointRole::View);

    let model = Arc::new(ChatViewModel::new());
    view.register_service(model.service()?)?;

    let chat = ChatClient::connect(&view.handle()).await?;
    chat.sync_state().await?;
    debug!(
        "Synced {} earlier message(s)",
        model.snapshot().messages.len()
    );

    // The user message and the empty reply have been delivered by the time
    // this returns, so the latest reply is ours.
    chat.confirm_prompt(prompt, kind).await?;
    info!("Prompt sent, waiting for reply");

    let reply = tokio::time::timeout(timeout, model.wait_for_finished_reply())
        .await
        .map_err(|_| anyhow!("no reply within {:?}", timeout))??;

    view.shutdown();
    Ok(reply.contents)
}
