//! Per-endpoint service registry.
//!
//! Maps service names to the invocation hosts of locally registered services
//! and answers the peer's `getService` and `invoke` requests.

use crate::host::ServiceHost;
use crate::protocol::{
    Response, ERROR_INVALID_ARGS, ERROR_SERVICE_NOT_FOUND, ERROR_UNKNOWN_MESSAGE_TYPE,
};
use crate::service::LocalService;
use crate::{BridgeError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Local services of one endpoint, keyed by name.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Arc<ServiceHost>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a local service.
    ///
    /// Fails with `AlreadyRegistered` if the name is taken on this endpoint.
    /// Returns the shared handle that `local_service` will hand out.
    pub fn register_service(
        &self,
        service: impl Into<Arc<LocalService>>,
    ) -> Result<Arc<LocalService>> {
        let service = service.into();
        let name = service.name().to_string();

        let mut services = self
            .services
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if services.contains_key(&name) {
            return Err(BridgeError::AlreadyRegistered { name });
        }
        services.insert(name.clone(), Arc::new(ServiceHost::new(service.clone())));
        drop(services);

        info!(
            "Registered service {} ({} methods)",
            name,
            service.method_names().len()
        );
        Ok(service)
    }

    /// Remove a local service. Returns whether it was registered.
    pub fn unregister_service(&self, name: &str) -> bool {
        let removed = self
            .services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some();
        if removed {
            info!("Unregistered service {}", name);
        }
        removed
    }

    /// The registered service named `name`, if any.
    pub fn local_service(&self, name: &str) -> Option<Arc<LocalService>> {
        self.host(name).map(|host| host.service().clone())
    }

    /// Names of all registered services, sorted.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn host(&self, name: &str) -> Option<Arc<ServiceHost>> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Answer one request payload from the peer.
    ///
    /// Never fails: malformed input, unknown services, missing methods and
    /// method failures all come back as `Response::Error`.
    pub async fn handle_incoming_message(&self, msg: &Value) -> Response {
        let kind = msg.get("type").and_then(Value::as_str);

        match kind {
            Some("getService") => match self.requested_host(msg) {
                Some(host) => Response::MethodNames(host.service().method_names()),
                None => Response::Error(ERROR_SERVICE_NOT_FOUND.to_string()),
            },
            Some("invoke") => {
                let method_name = msg
                    .get("methodName")
                    .and_then(Value::as_str)
                    .filter(|name| !name.is_empty());
                let args = msg.get("args").and_then(Value::as_array);
                let (Some(method_name), Some(args)) = (method_name, args) else {
                    return Response::Error(ERROR_INVALID_ARGS.to_string());
                };

                let Some(host) = self.requested_host(msg) else {
                    return Response::Error(ERROR_SERVICE_NOT_FOUND.to_string());
                };

                match host.invoke_method(method_name, args.clone()).await {
                    Ok(result) => Response::Result(result),
                    Err(e) => {
                        debug!(
                            "Method {}.{} failed: {}",
                            host.service().name(),
                            method_name,
                            e
                        );
                        Response::Error(e.to_wire_message())
                    }
                }
            }
            _ => Response::Error(ERROR_UNKNOWN_MESSAGE_TYPE.to_string()),
        }
    }

    /// Host for the request's `serviceName`, if it is a non-empty string naming
    /// a registered service.
    fn requested_host(&self, msg: &Value) -> Option<Arc<ServiceHost>> {
        let name = msg
            .get("serviceName")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())?;
        self.host(name)
    }
}
