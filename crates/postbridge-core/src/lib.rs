//! Postbridge - bidirectional service invocation between two message-passing
//! endpoints.
//!
//! Each side of a channel (the privileged host and the sandboxed view) runs an
//! [`Endpoint`]. Services registered on one side can be looked up from the
//! other by name and called as if they were local; requests and responses are
//! matched through correlation ids carried in every envelope.
//!
//! # Example
//!
//! ```rust,ignore
//! use postbridge::{channel_pair, Endpoint, EndpointRole, LocalService};
//! use serde_json::{json, Value};
//!
//! #[tokio::main]
//! async fn main() -> postbridge::Result<()> {
//!     let (host_end, view_end) = channel_pair();
//!     let host = Endpoint::connect(host_end, EndpointRole::Host);
//!     let view = Endpoint::connect(view_end, EndpointRole::View);
//!
//!     host.register_service(
//!         LocalService::builder("echo")
//!             .typed_method("ping", |(x,): (Value,)| async move { Ok(x) })
//!             .build()?,
//!     )?;
//!
//!     let echo = view.get_service("echo").await?;
//!     let pong = echo.call("ping", vec![json!("hello")]).await?;
//!     assert_eq!(pong, json!("hello"));
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod host;
pub mod protocol;
pub mod proxy;
pub mod registry;
pub mod service;
pub mod transport;

mod pending;

// Re-export commonly used types
pub use cancel::{CancellationToken, CancelledError};
pub use config::BridgeConfig;
pub use endpoint::{Endpoint, EndpointHandle, EndpointRole};
pub use error::{BridgeError, Result};
pub use host::ServiceHost;
pub use protocol::{Envelope, MessageKind, Request, Response};
pub use proxy::{RemoteServiceProxy, ServiceStub};
pub use registry::ServiceRegistry;
pub use service::{InterfaceDescriptor, LocalService, LocalServiceBuilder};
pub use transport::{
    channel_pair, ChannelTransport, MessageSink, MessageSource, StreamTransport, Transport,
};
