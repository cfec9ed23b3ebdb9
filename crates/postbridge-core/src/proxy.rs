//! Service stubs: uniform calling surface for local and remote services.

use crate::endpoint::Shared;
use crate::protocol::{Request, Response, ERROR_MALFORMED_RESPONSE};
use crate::service::{InterfaceDescriptor, LocalService};
use crate::{BridgeError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Weak};

/// Forwarding object for a service that runs on the peer.
///
/// Holds only the service name, the method names the peer reported, and a
/// weak reference back to the endpoint; it owns no resources. Calls fail with
/// `ChannelClosed` once the endpoint is gone.
#[derive(Debug, Clone)]
pub struct RemoteServiceProxy {
    name: String,
    method_names: Arc<[String]>,
    requester: Weak<Shared>,
}

impl RemoteServiceProxy {
    pub(crate) fn new(requester: Weak<Shared>, name: String, method_names: Vec<String>) -> Self {
        Self {
            name,
            method_names: method_names.into(),
            requester,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Method names reported by the peer.
    pub fn method_names(&self) -> &[String] {
        &self.method_names
    }

    pub fn has_method(&self, method_name: &str) -> bool {
        self.method_names.iter().any(|name| name == method_name)
    }

    /// Invoke `method_name` on the peer and wait for its result.
    ///
    /// Sends exactly one `invoke` request. A method the peer did not report
    /// fails locally with `MethodNotFound` without touching the channel. A
    /// failure on the peer comes back as `Remote` carrying the peer's message.
    pub async fn call(&self, method_name: &str, args: Vec<Value>) -> Result<Value> {
        if !self.has_method(method_name) {
            return Err(BridgeError::MethodNotFound {
                method: method_name.to_string(),
            });
        }
        let shared = self.requester.upgrade().ok_or(BridgeError::ChannelClosed)?;

        let reply = shared
            .request(Request::Invoke {
                service_name: self.name.clone(),
                method_name: method_name.to_string(),
                args,
            })
            .await?;

        match reply {
            Response::Result(value) => Ok(value),
            Response::Error(message) => Err(BridgeError::Remote { message }),
            Response::MethodNames(_) => Err(BridgeError::remote(ERROR_MALFORMED_RESPONSE)),
        }
    }
}

/// What `get_service` hands out: the registered local service itself, or a
/// proxy for a service on the peer.
#[derive(Debug, Clone)]
pub enum ServiceStub {
    Local(Arc<LocalService>),
    Remote(RemoteServiceProxy),
}

impl ServiceStub {
    pub fn name(&self) -> &str {
        match self {
            ServiceStub::Local(service) => service.name(),
            ServiceStub::Remote(proxy) => proxy.name(),
        }
    }

    pub fn method_names(&self) -> Vec<String> {
        match self {
            ServiceStub::Local(service) => service.method_names(),
            ServiceStub::Remote(proxy) => proxy.method_names().to_vec(),
        }
    }

    pub fn has_method(&self, method_name: &str) -> bool {
        match self {
            ServiceStub::Local(service) => service.has_method(method_name),
            ServiceStub::Remote(proxy) => proxy.has_method(method_name),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, ServiceStub::Local(_))
    }

    pub fn as_local(&self) -> Option<&Arc<LocalService>> {
        match self {
            ServiceStub::Local(service) => Some(service),
            ServiceStub::Remote(_) => None,
        }
    }

    pub fn as_remote(&self) -> Option<&RemoteServiceProxy> {
        match self {
            ServiceStub::Local(_) => None,
            ServiceStub::Remote(proxy) => Some(proxy),
        }
    }

    /// Whether every method of `interface` is available on this stub.
    pub fn conforms_to(&self, interface: &InterfaceDescriptor) -> bool {
        interface.missing_methods(&self.method_names()).is_empty()
    }

    pub async fn call(&self, method_name: &str, args: Vec<Value>) -> Result<Value> {
        match self {
            ServiceStub::Local(service) => service.call(method_name, args).await,
            ServiceStub::Remote(proxy) => proxy.call(method_name, args).await,
        }
    }

    /// `call`, decoding the result into `R`.
    pub async fn call_typed<R: DeserializeOwned>(
        &self,
        method_name: &str,
        args: Vec<Value>,
    ) -> Result<R> {
        let value = self.call(method_name, args).await?;
        Ok(serde_json::from_value(value)?)
    }
}
