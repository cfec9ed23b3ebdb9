//! Byte-stream binding: length-prefixed JSON envelopes.

use super::{MessageSink, MessageSource, Transport};
use crate::config::BridgeConfig;
use crate::protocol::{read_frame, write_frame, Envelope};
use crate::{BridgeError, Result};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Envelope transport over an async reader/writer pair.
///
/// Writes go through a background task that owns the writer, so posting
/// never blocks the caller. Frames that do not decode as envelopes are logged
/// and skipped; an I/O or framing error in either direction ends the channel.
pub struct StreamTransport<R, W> {
    reader: R,
    writer: W,
    max_frame_size: usize,
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            max_frame_size: BridgeConfig::MAX_FRAME_SIZE,
        }
    }

    /// Override the maximum frame size in both directions.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

impl StreamTransport<OwnedReadHalf, OwnedWriteHalf> {
    /// Use a connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }
}

impl<R, W> Transport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn into_parts(self) -> (Arc<dyn MessageSink>, Box<dyn MessageSource>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (failed_tx, failed_rx) = oneshot::channel();
        tokio::spawn(write_loop(self.writer, rx, failed_tx));

        (
            Arc::new(StreamSink {
                tx: Mutex::new(Some(tx)),
                max_frame_size: self.max_frame_size,
            }),
            Box::new(StreamSource {
                reader: self.reader,
                max_frame_size: self.max_frame_size,
                write_failure: Some(failed_rx),
            }),
        )
    }
}

/// Drain queued frames into `writer`. A write error is handed to the source
/// through `failed`, which ends the channel for the endpoint.
async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    failed: oneshot::Sender<BridgeError>,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            warn!("Stream write failed, closing writer: {}", e);
            let _ = failed.send(e);
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!("Stream shutdown failed: {}", e);
    }
}

struct StreamSink {
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    max_frame_size: usize,
}

impl MessageSink for StreamSink {
    fn post_message(&self, envelope: Envelope) -> Result<()> {
        let bytes = serde_json::to_vec(&envelope)?;
        if bytes.len() > self.max_frame_size {
            return Err(BridgeError::Validation {
                field: "frame".to_string(),
                message: format!(
                    "envelope {} encodes to {} bytes, maximum is {}",
                    envelope.id,
                    bytes.len(),
                    self.max_frame_size
                ),
            });
        }

        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = tx.as_ref().ok_or(BridgeError::ChannelClosed)?;
        tx.send(bytes).map_err(|_| BridgeError::ChannelClosed)
    }

    fn close(&self) {
        // The write loop drains what was already queued, then shuts the
        // writer down.
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

struct StreamSource<R> {
    reader: R,
    max_frame_size: usize,
    /// Yields the write loop's error. A clean writer exit closes it without a
    /// value, which never interrupts a read in progress.
    write_failure: Option<oneshot::Receiver<BridgeError>>,
}

enum ReadOutcome {
    Frame(Option<Vec<u8>>),
    WriteFailed(BridgeError),
}

#[async_trait::async_trait]
impl<R: AsyncRead + Unpin + Send + 'static> MessageSource for StreamSource<R> {
    async fn next_message(&mut self) -> Result<Option<Envelope>> {
        loop {
            let outcome = match self.write_failure.as_mut() {
                Some(failure) => tokio::select! {
                    frame = read_frame(&mut self.reader, self.max_frame_size) => {
                        ReadOutcome::Frame(frame?)
                    }
                    Ok(e) = failure => ReadOutcome::WriteFailed(e),
                },
                None => ReadOutcome::Frame(read_frame(&mut self.reader, self.max_frame_size).await?),
            };
            let frame = match outcome {
                ReadOutcome::Frame(Some(frame)) => frame,
                ReadOutcome::Frame(None) => return Ok(None),
                ReadOutcome::WriteFailed(e) => {
                    self.write_failure = None;
                    return Err(e);
                }
            };
            match serde_json::from_slice::<Envelope>(&frame) {
                Ok(envelope) => return Ok(Some(envelope)),
                Err(e) => warn!("Dropping undecodable frame ({} bytes): {}", frame.len(), e),
            }
        }
    }
}
