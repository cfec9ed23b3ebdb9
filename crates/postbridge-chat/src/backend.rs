//! Reply generation backends.

use crate::config::ChatConfig;
use crate::contract::{MessageItem, PromptKind};
use async_trait::async_trait;
use postbridge::{BridgeError, CancellationToken, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Everything a backend gets to produce one reply.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub prompt: String,
    pub kind: PromptKind,
    /// Text selected in the editor when the prompt was confirmed.
    pub selection: Option<String>,
    /// Conversation so far, excluding the prompt itself.
    pub history: Vec<MessageItem>,
}

/// Source of generated replies.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Stream the reply to `request` into `chunks`.
    ///
    /// Returns once the reply is complete. Implementations should stop
    /// promptly with `BridgeError::Cancelled` when `cancel` fires, and may
    /// stop early if `chunks` has no receiver left.
    async fn generate(
        &self,
        request: ChatRequest,
        chunks: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Backend that streams the prompt back one word at a time.
#[derive(Debug, Clone)]
pub struct EchoBackend {
    chunk_delay: Duration,
}

impl Default for EchoBackend {
    fn default() -> Self {
        Self {
            chunk_delay: ChatConfig::ECHO_CHUNK_DELAY,
        }
    }
}

impl EchoBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_delay(chunk_delay: Duration) -> Self {
        Self { chunk_delay }
    }
}

#[async_trait]
impl ChatBackend for EchoBackend {
    async fn generate(
        &self,
        request: ChatRequest,
        chunks: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<()> {
        for (i, word) in request.prompt.split_whitespace().enumerate() {
            cancel.check()?;
            tokio::select! {
                _ = cancel.cancelled() => return Err(BridgeError::Cancelled),
                _ = tokio::time::sleep(self.chunk_delay) => {}
            }

            let chunk = if i == 0 {
                word.to_string()
            } else {
                format!(" {}", word)
            };
            if chunks.send(chunk).await.is_err() {
                debug!("Reply receiver dropped, stopping echo");
                return Ok(());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> ChatRequest {
        ChatRequest {
            prompt: prompt.to_string(),
            kind: PromptKind::Freeform,
            selection: None,
            history: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_echo_streams_words() {
        let backend = EchoBackend::with_chunk_delay(Duration::ZERO);
        let (tx, mut rx) = mpsc::channel(8);

        backend
            .generate(request("hello  bridge world"), tx, CancellationToken::new())
            .await
            .unwrap();

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        assert_eq!(chunks, vec!["hello", " bridge", " world"]);
    }

    #[tokio::test]
    async fn test_echo_stops_when_cancelled() {
        let backend = EchoBackend::with_chunk_delay(Duration::from_secs(60));
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { backend.generate(request("a b c"), tx, cancel).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(BridgeError::Cancelled)));
    }
}
