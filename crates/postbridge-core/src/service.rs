//! Local service definitions.
//!
//! A service is a named table of asynchronous methods. The table is declared
//! explicitly when the service is built; nothing is discovered at runtime.
//!
//! ```
//! use postbridge::LocalService;
//! use serde_json::Value;
//!
//! let echo = LocalService::builder("echo")
//!     .typed_method("ping", |(x,): (Value,)| async move { Ok(x) })
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(echo.method_names(), vec!["ping".to_string()]);
//! ```

use crate::{BridgeError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Future returned by a method handler.
pub type MethodFuture = BoxFuture<'static, Result<Value>>;

/// A method handler: positional JSON arguments in, JSON result out.
pub type MethodHandler = Arc<dyn Fn(Vec<Value>) -> MethodFuture + Send + Sync>;

/// A service implemented and executed on this endpoint.
pub struct LocalService {
    name: String,
    methods: BTreeMap<String, MethodHandler>,
}

impl LocalService {
    /// Start declaring a service named `name`.
    pub fn builder(name: impl Into<String>) -> LocalServiceBuilder {
        LocalServiceBuilder {
            name: name.into(),
            methods: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of all declared methods, sorted.
    pub fn method_names(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }

    pub fn has_method(&self, method_name: &str) -> bool {
        self.methods.contains_key(method_name)
    }

    pub(crate) fn handler(&self, method_name: &str) -> Option<MethodHandler> {
        self.methods.get(method_name).cloned()
    }

    /// Call a method directly, without going through a channel.
    ///
    /// Errors are returned as the handler produced them.
    pub async fn call(&self, method_name: &str, args: Vec<Value>) -> Result<Value> {
        let handler = self
            .handler(method_name)
            .ok_or_else(|| BridgeError::MethodNotFound {
                method: method_name.to_string(),
            })?;
        handler(args).await
    }
}

impl std::fmt::Debug for LocalService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalService")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`LocalService`].
pub struct LocalServiceBuilder {
    name: String,
    methods: BTreeMap<String, MethodHandler>,
}

impl LocalServiceBuilder {
    /// Declare a method taking raw JSON arguments.
    ///
    /// Declaring the same name twice keeps the later handler.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: MethodHandler = Arc::new(move |args| handler(args).boxed());
        self.methods.insert(name.into(), handler);
        self
    }

    /// Declare a method with typed arguments and result.
    ///
    /// The JSON argument array is decoded into `A`, usually a tuple such as
    /// `(String, bool)`. An empty argument list decodes from `null`, so
    /// zero-argument methods can take `()`.
    pub fn typed_method<A, R, F, Fut>(self, name: impl Into<String>, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let name = name.into();
        let label = name.clone();
        let handler = Arc::new(handler);
        self.method(name, move |args: Vec<Value>| {
            let handler = handler.clone();
            let label = label.clone();
            async move {
                let args = decode_args::<A>(&label, args)?;
                let result = handler(args).await?;
                Ok(serde_json::to_value(result)?)
            }
        })
    }

    /// Finish the declaration.
    ///
    /// Fails if the service name or any method name is empty.
    pub fn build(self) -> Result<LocalService> {
        if self.name.is_empty() {
            return Err(BridgeError::InvalidService {
                message: "service name must not be empty".to_string(),
            });
        }
        if self.methods.keys().any(|name| name.is_empty()) {
            return Err(BridgeError::InvalidService {
                message: format!("service \"{}\" declares an empty method name", self.name),
            });
        }
        Ok(LocalService {
            name: self.name,
            methods: self.methods,
        })
    }
}

fn args_value(args: &[Value]) -> Value {
    if args.is_empty() {
        Value::Null
    } else {
        Value::Array(args.to_vec())
    }
}

/// Decode `args` into `A`.
///
/// Extra trailing arguments are ignored, as a JavaScript callee would: when
/// the full list does not decode, shorter prefixes are tried longest first.
/// The error reported is the one for the full list.
fn decode_args<A: DeserializeOwned>(method: &str, args: Vec<Value>) -> Result<A> {
    let first_error = match serde_json::from_value::<A>(args_value(&args)) {
        Ok(decoded) => return Ok(decoded),
        Err(e) => e,
    };
    for len in (0..args.len()).rev() {
        if let Ok(decoded) = serde_json::from_value::<A>(args_value(&args[..len])) {
            return Ok(decoded);
        }
    }
    Err(BridgeError::InvalidArguments {
        method: method.to_string(),
        message: first_error.to_string(),
    })
}

/// Static description of a service contract: its name and the methods a
/// conforming implementation must offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub name: &'static str,
    pub methods: &'static [&'static str],
}

impl InterfaceDescriptor {
    /// Declared methods that are absent from `available`.
    pub fn missing_methods(&self, available: &[String]) -> Vec<&'static str> {
        self.methods
            .iter()
            .copied()
            .filter(|method| !available.iter().any(|name| name == method))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calculator() -> LocalService {
        LocalService::builder("calc")
            .typed_method("add", |(a, b): (i64, i64)| async move { Ok(a + b) })
            .typed_method("zero", |(): ()| async move { Ok(0) })
            .method("first", |args| async move {
                Ok(args.into_iter().next().unwrap_or(Value::Null))
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_method_names_are_sorted() {
        assert_eq!(calculator().method_names(), vec!["add", "first", "zero"]);
    }

    #[tokio::test]
    async fn test_typed_method_decodes_tuple_args() {
        let result = calculator().call("add", vec![json!(2), json!(3)]).await.unwrap();
        assert_eq!(result, json!(5));
    }

    #[tokio::test]
    async fn test_typed_method_without_args() {
        let result = calculator().call("zero", vec![]).await.unwrap();
        assert_eq!(result, json!(0));
    }

    #[tokio::test]
    async fn test_typed_method_rejects_bad_args() {
        let err = calculator()
            .call("add", vec![json!("two"), json!(3)])
            .await
            .unwrap_err();
        match err {
            BridgeError::InvalidArguments { method, .. } => assert_eq!(method, "add"),
            other => panic!("Expected InvalidArguments, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_typed_method_ignores_extra_args() {
        let calc = calculator();
        let sum = calc
            .call("add", vec![json!(2), json!(3), json!("extra")])
            .await
            .unwrap();
        assert_eq!(sum, json!(5));

        let zero = calc.call("zero", vec![Value::Null]).await.unwrap();
        assert_eq!(zero, json!(0));
    }

    #[tokio::test]
    async fn test_typed_method_missing_args_still_fail() {
        let err = calculator().call("add", vec![json!(2)]).await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_call_unknown_method() {
        let err = calculator().call("mul", vec![]).await.unwrap_err();
        assert_eq!(err.to_string(), "\"mul\" is not a function");
    }

    #[test]
    fn test_build_rejects_empty_names() {
        assert!(LocalService::builder("").build().is_err());
        let result = LocalService::builder("svc")
            .method("", |_| async { Ok(Value::Null) })
            .build();
        assert!(matches!(result, Err(BridgeError::InvalidService { .. })));
    }

    #[test]
    fn test_duplicate_method_keeps_latest() {
        let svc = LocalService::builder("svc")
            .method("m", |_| async { Ok(json!(1)) })
            .method("m", |_| async { Ok(json!(2)) })
            .build()
            .unwrap();
        assert_eq!(svc.method_names(), vec!["m"]);
    }

    #[test]
    fn test_interface_missing_methods() {
        const CALC: InterfaceDescriptor = InterfaceDescriptor {
            name: "calc",
            methods: &["add", "div"],
        };
        assert_eq!(CALC.missing_methods(&calculator().method_names()), vec!["div"]);
    }
}
