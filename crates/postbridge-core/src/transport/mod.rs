//! Transport bindings: how envelopes physically leave and enter an endpoint.
//!
//! The correlation and dispatch logic in [`crate::endpoint`] is identical for
//! every binding; a binding only supplies a sink and a source.
//!
//! - [`ChannelTransport`]: in-process structured-value channel, the analogue of
//!   `postMessage` between a host and an embedded view.
//! - [`StreamTransport`]: length-prefixed JSON over any async byte stream
//!   (TCP socket, child process stdio).

mod channel;
mod stream;

pub use channel::{channel_pair, ChannelTransport};
pub use stream::StreamTransport;

use crate::protocol::Envelope;
use crate::Result;
use std::sync::Arc;

/// Outgoing half of a transport. Posting never waits for the peer.
pub trait MessageSink: Send + Sync + 'static {
    /// Hand an envelope over for delivery.
    ///
    /// Fails with `ChannelClosed` once the sink has been closed or the peer is
    /// gone.
    fn post_message(&self, envelope: Envelope) -> Result<()>;

    /// Stop sending. Idempotent.
    fn close(&self);
}

/// Incoming half of a transport.
#[async_trait::async_trait]
pub trait MessageSource: Send + 'static {
    /// Next envelope from the peer, or `None` once the channel is closed.
    async fn next_message(&mut self) -> Result<Option<Envelope>>;
}

/// A bidirectional message channel to exactly one peer.
pub trait Transport: Send + 'static {
    /// Split into the sink and source the endpoint drives.
    ///
    /// Bindings that need background I/O spawn it here, so this must be
    /// called from within a tokio runtime.
    fn into_parts(self) -> (Arc<dyn MessageSink>, Box<dyn MessageSource>);
}
