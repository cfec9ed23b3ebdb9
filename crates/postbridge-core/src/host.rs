//! Invocation host: runs a named method of one local service.

use crate::service::LocalService;
use crate::{BridgeError, Result};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::error;

/// Wraps exactly one local service and executes its methods on behalf of the
/// peer.
#[derive(Debug)]
pub struct ServiceHost {
    service: Arc<LocalService>,
}

impl ServiceHost {
    pub fn new(service: Arc<LocalService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<LocalService> {
        &self.service
    }

    /// Look up `method_name` and run it with `args` as positional parameters.
    ///
    /// A panicking handler is reported as an error rather than unwinding into
    /// the dispatch loop, so the peer still receives a response.
    pub async fn invoke_method(&self, method_name: &str, args: Vec<Value>) -> Result<Value> {
        let handler = self
            .service
            .handler(method_name)
            .ok_or_else(|| BridgeError::MethodNotFound {
                method: method_name.to_string(),
            })?;

        match AssertUnwindSafe(async move { handler(args).await })
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Method {}.{} panicked",
                    self.service.name(),
                    method_name
                );
                Err(BridgeError::Other(format!(
                    "Service method \"{}\" panicked",
                    method_name
                )))
            }
        }
    }
}
