//! Endpoint: one side of the two-party channel.
//!
//! An endpoint owns a service registry, a pending-call table and a transport.
//! Its dispatch loop sorts incoming envelopes into replies to our own requests
//! (settled through the pending-call table) and requests addressed to us
//! (answered by the registry, each on its own task so that a suspended method
//! never stalls the channel).
//!
//! # Lifecycle
//!
//! - `Endpoint::connect` spawns the dispatch loop; it needs a tokio runtime.
//! - `Endpoint::shutdown` (also run on drop) stops the loop, closes the
//!   transport and rejects every pending call with `ChannelClosed`. The same
//!   teardown runs when the peer closes the channel.

use crate::pending::{PendingCalls, PendingGuard};
use crate::protocol::{Envelope, MessageKind, Request, Response, ERROR_MALFORMED_RESPONSE};
use crate::proxy::{RemoteServiceProxy, ServiceStub};
use crate::registry::ServiceRegistry;
use crate::service::{InterfaceDescriptor, LocalService};
use crate::transport::{MessageSink, MessageSource, Transport};
use crate::{BridgeError, Result};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Which side of the channel an endpoint sits on. Only used to label
/// diagnostics; both sides run the same protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointRole {
    /// The privileged host process.
    Host,
    /// The sandboxed UI surface.
    View,
}

impl EndpointRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointRole::Host => "host",
            EndpointRole::View => "view",
        }
    }
}

impl std::fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// State shared by an endpoint, its dispatch tasks and its proxies.
pub(crate) struct Shared {
    role: EndpointRole,
    registry: ServiceRegistry,
    pending: PendingCalls,
    sink: Arc<dyn MessageSink>,
    closed_tx: watch::Sender<bool>,
}

impl Shared {
    /// Send one request and wait for the response carrying its id.
    ///
    /// No timeout: this waits until the peer answers or the channel is torn
    /// down.
    pub(crate) async fn request(&self, request: Request) -> Result<Response> {
        let (id, reply) = self.pending.register()?;
        let _guard = PendingGuard {
            calls: &self.pending,
            id,
        };

        let envelope = Envelope::request(id, &request)?;
        debug!(
            "[{}] -> req {} ({})",
            self.role,
            id,
            describe_request(&request)
        );
        self.sink.post_message(envelope)?;

        reply.await.map_err(|_| BridgeError::ChannelClosed)
    }

    async fn get_service(self: &Arc<Self>, name: &str) -> Result<ServiceStub> {
        if let Some(service) = self.registry.local_service(name) {
            return Ok(ServiceStub::Local(service));
        }

        let reply = self
            .request(Request::GetService {
                service_name: name.to_string(),
            })
            .await?;

        match reply {
            Response::MethodNames(method_names) => Ok(ServiceStub::Remote(
                RemoteServiceProxy::new(Arc::downgrade(self), name.to_string(), method_names),
            )),
            Response::Error(message) => Err(BridgeError::Remote { message }),
            Response::Result(_) => Err(BridgeError::remote(ERROR_MALFORMED_RESPONSE)),
        }
    }

    async fn get_interface(self: &Arc<Self>, interface: &InterfaceDescriptor) -> Result<ServiceStub> {
        let stub = self.get_service(interface.name).await?;
        let missing = interface.missing_methods(&stub.method_names());
        if !missing.is_empty() {
            return Err(BridgeError::InvalidService {
                message: format!(
                    "service \"{}\" is missing methods: {}",
                    interface.name,
                    missing.join(", ")
                ),
            });
        }
        Ok(stub)
    }

    fn dispatch(self: &Arc<Self>, envelope: Envelope) {
        let Envelope { id, kind, payload } = envelope;
        match kind {
            MessageKind::Response => {
                debug!("[{}] <- resp {}", self.role, id);
                if !self.pending.settle(id, Response::from_payload(payload)) {
                    warn!("[{}] Unexpected reply with id: {}", self.role, id);
                }
            }
            MessageKind::Request => {
                debug!("[{}] <- req {}", self.role, id);
                let shared = self.clone();
                tokio::spawn(async move {
                    let response = shared.registry.handle_incoming_message(&payload).await;
                    shared.send_reply(id, &response);
                });
            }
        }
    }

    /// Post the reply to request `id`.
    ///
    /// A reply the transport refuses (an oversized frame, an unserializable
    /// result) is replaced by an error reply, so the caller is never left
    /// waiting on an id that will not be answered.
    fn send_reply(&self, id: u64, response: &Response) {
        let e = match self.sink.post_message(Envelope::response(id, response)) {
            Ok(()) => return,
            Err(e) => e,
        };
        if e.is_channel_closed() {
            debug!("[{}] Dropping reply {}: channel closed", self.role, id);
            return;
        }
        warn!("[{}] Failed to send reply {}: {}", self.role, id, e);
        let fallback = Response::Error(e.to_wire_message());
        if let Err(e) = self.sink.post_message(Envelope::response(id, &fallback)) {
            error!("[{}] Failed to send error reply {}: {}", self.role, id, e);
        }
    }

    /// Reject all pending calls and close the transport. Idempotent.
    fn teardown(&self, reason: &str) {
        if let Some(abandoned) = self.pending.close() {
            self.sink.close();
            self.closed_tx.send_replace(true);
            info!(
                "[{}] Endpoint closed ({}), rejected {} pending call(s)",
                self.role, reason, abandoned
            );
        }
    }
}

fn describe_request(request: &Request) -> String {
    match request {
        Request::GetService { service_name } => format!("getService {}", service_name),
        Request::Invoke {
            service_name,
            method_name,
            args,
        } => format!(
            "invoke {}.{} with {} arg(s)",
            service_name,
            method_name,
            args.len()
        ),
    }
}

async fn dispatch_loop(shared: Arc<Shared>, mut source: Box<dyn MessageSource>) {
    loop {
        match source.next_message().await {
            Ok(Some(envelope)) => shared.dispatch(envelope),
            Ok(None) => {
                shared.teardown("closed by peer");
                return;
            }
            Err(e) => {
                warn!("[{}] Receive failed: {}", shared.role, e);
                shared.teardown("receive failed");
                return;
            }
        }
    }
}

/// One side of a service channel.
pub struct Endpoint {
    shared: Arc<Shared>,
    dispatch_task: Option<JoinHandle<()>>,
}

impl Endpoint {
    /// Attach to `transport` and start dispatching incoming messages.
    pub fn connect<T: Transport>(transport: T, role: EndpointRole) -> Self {
        let (sink, source) = transport.into_parts();
        let (closed_tx, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            role,
            registry: ServiceRegistry::new(),
            pending: PendingCalls::new(),
            sink,
            closed_tx,
        });

        let dispatch_task = tokio::spawn(dispatch_loop(shared.clone(), source));
        info!("[{}] Endpoint connected", role);

        Self {
            shared,
            dispatch_task: Some(dispatch_task),
        }
    }

    pub fn role(&self) -> EndpointRole {
        self.shared.role
    }

    /// A cloneable handle for looking up services from other components.
    pub fn handle(&self) -> EndpointHandle {
        EndpointHandle {
            shared: Arc::downgrade(&self.shared),
            role: self.shared.role,
        }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.shared.registry
    }

    /// Register a local service on this endpoint.
    ///
    /// Fails if a service with the same name is already registered here.
    pub fn register_service(
        &self,
        service: impl Into<Arc<LocalService>>,
    ) -> Result<Arc<LocalService>> {
        self.shared.registry.register_service(service)
    }

    pub fn unregister_service(&self, name: &str) -> bool {
        self.shared.registry.unregister_service(name)
    }

    /// Obtain a stub for the service called `name`.
    ///
    /// A locally registered service is returned as-is. Otherwise the peer is
    /// asked to describe it; this waits for the peer's answer with no timeout.
    pub async fn get_service(&self, name: &str) -> Result<ServiceStub> {
        self.shared.get_service(name).await
    }

    /// `get_service`, additionally checking that the service offers every
    /// method of `interface`.
    pub async fn get_interface(&self, interface: &InterfaceDescriptor) -> Result<ServiceStub> {
        self.shared.get_interface(interface).await
    }

    /// Number of requests still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.pending.is_closed()
    }

    /// Wait until the endpoint has been torn down.
    pub async fn closed(&self) {
        let mut closed = self.shared.closed_tx.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Tear the endpoint down. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.dispatch_task.take() {
            task.abort();
        }
        self.shared.teardown("shutdown");
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("role", &self.shared.role)
            .field("services", &self.shared.registry.service_names())
            .field("pending_calls", &self.shared.pending.len())
            .field("closed", &self.shared.pending.is_closed())
            .finish()
    }
}

/// Weak, cloneable reference to an endpoint.
///
/// Lets components that outlive nothing in particular (a chat session, a
/// per-view client) resolve services lazily without keeping the endpoint
/// alive.
#[derive(Debug, Clone)]
pub struct EndpointHandle {
    shared: Weak<Shared>,
    role: EndpointRole,
}

impl EndpointHandle {
    pub fn role(&self) -> EndpointRole {
        self.role
    }

    fn upgrade(&self) -> Result<Arc<Shared>> {
        self.shared.upgrade().ok_or(BridgeError::ChannelClosed)
    }

    pub async fn get_service(&self, name: &str) -> Result<ServiceStub> {
        self.upgrade()?.get_service(name).await
    }

    pub async fn get_interface(&self, interface: &InterfaceDescriptor) -> Result<ServiceStub> {
        self.upgrade()?.get_interface(interface).await
    }

    pub fn is_closed(&self) -> bool {
        self.shared
            .upgrade()
            .map_or(true, |shared| shared.pending.is_closed())
    }
}
