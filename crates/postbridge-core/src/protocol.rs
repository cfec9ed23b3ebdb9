//! Wire protocol: envelopes, request/response payloads, and stream framing.
//!
//! Every message on the channel is an [`Envelope`]:
//!
//! ```text
//! { "id": <u64>, "type": "req" | "resp", "payload": <json> }
//! ```
//!
//! Request payloads carry their own discriminant (`"getService"` or
//! `"invoke"`). Response payloads are one of `{ "error" }`, `{ "result" }` or
//! `{ "methodNames" }`.
//!
//! Byte-stream transports frame each envelope as a 4-byte big-endian length
//! prefix followed by UTF-8 JSON:
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```

use crate::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reported for `getService`/`invoke` requests naming an unknown service, or
/// carrying no usable service name.
pub const ERROR_SERVICE_NOT_FOUND: &str = "Invalid args or service not found";
/// Reported for `invoke` requests whose `methodName` or `args` are malformed.
pub const ERROR_INVALID_ARGS: &str = "Invalid args";
/// Reported for request payloads without a known discriminant.
pub const ERROR_UNKNOWN_MESSAGE_TYPE: &str = "Unknown message type";
/// Settled into a pending call whose response payload could not be read.
pub const ERROR_MALFORMED_RESPONSE: &str = "Malformed response payload";

/// Direction tag of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "req")]
    Request,
    #[serde(rename = "resp")]
    Response,
}

/// A unit of wire data.
///
/// The payload stays an untyped JSON value here: requests from the peer are
/// untrusted and are validated field by field by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Wrap a request payload under correlation id `id`.
    pub fn request(id: u64, request: &Request) -> Result<Self> {
        Ok(Self {
            id,
            kind: MessageKind::Request,
            payload: serde_json::to_value(request)?,
        })
    }

    /// Wrap a response payload under the correlation id of the request it
    /// answers.
    pub fn response(id: u64, response: &Response) -> Self {
        Self {
            id,
            kind: MessageKind::Response,
            payload: response.to_payload(),
        }
    }
}

/// Request payloads sent by this endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Ask the peer for the method names of one of its local services.
    #[serde(rename = "getService")]
    GetService {
        #[serde(rename = "serviceName")]
        service_name: String,
    },
    /// Call a method on one of the peer's local services.
    #[serde(rename = "invoke")]
    Invoke {
        #[serde(rename = "serviceName")]
        service_name: String,
        #[serde(rename = "methodName")]
        method_name: String,
        args: Vec<Value>,
    },
}

impl Request {
    pub fn service_name(&self) -> &str {
        match self {
            Request::GetService { service_name } | Request::Invoke { service_name, .. } => {
                service_name
            }
        }
    }
}

/// Terminal outcome of one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Error(String),
    MethodNames(Vec<String>),
    Result(Value),
}

impl Response {
    /// Render as a wire payload. Exactly one field is present.
    pub fn to_payload(&self) -> Value {
        match self {
            Response::Error(error) => json!({ "error": error }),
            Response::MethodNames(names) => json!({ "methodNames": names }),
            Response::Result(result) => json!({ "result": result }),
        }
    }

    /// Read a response payload received from the peer.
    ///
    /// Never fails: unreadable payloads become [`ERROR_MALFORMED_RESPONSE`].
    /// An object without any known field reads as `{ "result": null }`, and
    /// non-string entries of `methodNames` are skipped.
    pub fn from_payload(payload: Value) -> Self {
        let Value::Object(mut fields) = payload else {
            return Response::Error(ERROR_MALFORMED_RESPONSE.to_string());
        };

        match fields.remove("error") {
            None | Some(Value::Null) => {}
            Some(Value::String(error)) => return Response::Error(error),
            Some(other) => return Response::Error(other.to_string()),
        }

        if let Some(names) = fields.remove("methodNames") {
            return match names {
                Value::Array(entries) => Response::MethodNames(
                    entries
                        .into_iter()
                        .filter_map(|entry| match entry {
                            Value::String(name) => Some(name),
                            _ => None,
                        })
                        .collect(),
                ),
                _ => Response::Error(ERROR_MALFORMED_RESPONSE.to_string()),
            };
        }

        Response::Result(fields.remove("result").unwrap_or(Value::Null))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }
}

/// Read a length-prefixed frame from an async reader.
///
/// Frame format: `[4-byte BE u32 length][payload bytes]`
///
/// Returns `None` on clean EOF (peer closed the stream).
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_size: usize,
) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > max_frame_size {
        return Err(BridgeError::Validation {
            field: "frame".to_string(),
            message: format!(
                "frame size {} exceeds maximum {}",
                len, max_frame_size
            ),
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
///
/// Frame format: `[4-byte BE u32 length][payload bytes]`
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| BridgeError::Validation {
        field: "frame".to_string(),
        message: format!("frame size {} does not fit a u32 prefix", payload.len()),
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
