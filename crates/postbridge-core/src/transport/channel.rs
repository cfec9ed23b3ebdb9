//! In-process channel binding.

use super::{MessageSink, MessageSource, Transport};
use crate::protocol::Envelope;
use crate::{BridgeError, Result};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// One end of an in-process message channel.
///
/// Envelopes are moved to the peer by value, so nothing is shared between the
/// two endpoints.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

/// Create two connected channel ends.
///
/// By convention the first end goes to the host endpoint and the second to the
/// view endpoint; the ends are otherwise interchangeable.
pub fn channel_pair() -> (ChannelTransport, ChannelTransport) {
    let (host_tx, view_rx) = mpsc::unbounded_channel();
    let (view_tx, host_rx) = mpsc::unbounded_channel();
    (
        ChannelTransport {
            tx: host_tx,
            rx: host_rx,
        },
        ChannelTransport {
            tx: view_tx,
            rx: view_rx,
        },
    )
}

impl Transport for ChannelTransport {
    fn into_parts(self) -> (Arc<dyn MessageSink>, Box<dyn MessageSource>) {
        (
            Arc::new(ChannelSink {
                tx: Mutex::new(Some(self.tx)),
            }),
            Box::new(ChannelSource { rx: self.rx }),
        )
    }
}

struct ChannelSink {
    tx: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
}

impl MessageSink for ChannelSink {
    fn post_message(&self, envelope: Envelope) -> Result<()> {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = tx.as_ref().ok_or(BridgeError::ChannelClosed)?;
        tx.send(envelope).map_err(|_| BridgeError::ChannelClosed)
    }

    fn close(&self) {
        // Dropping the sender ends the peer's receive loop.
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

#[async_trait::async_trait]
impl MessageSource for ChannelSource {
    async fn next_message(&mut self) -> Result<Option<Envelope>> {
        Ok(self.rx.recv().await)
    }
}
