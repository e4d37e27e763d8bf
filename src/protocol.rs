//! Pool wire protocol
//!
//! Line-delimited JSON: the client sends `{id, method, params}` requests
//! (`login`, `submit`), the pool answers with `{id, result, error}` responses
//! and pushes `{method: "job", params}` notifications.
//!
//! [`PoolCodec`] frames the byte stream on newlines and turns each line into
//! a [`Frame`]. A line that fails to parse becomes [`Frame::Malformed`] rather
//! than a codec error, so one bad line never ends the stream.

use crate::types::{Credentials, Solution};
use crate::{Error, Result};
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Request id used for every client request
pub const REQUEST_ID: u64 = 1;

/// Longest line accepted from the pool
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Login method name
pub const METHOD_LOGIN: &str = "login";

/// Submit method name
pub const METHOD_SUBMIT: &str = "submit";

/// Job push method name
pub const METHOD_JOB: &str = "job";

/// Status string the pool uses to accept a share
pub const STATUS_OK: &str = "OK";

/// Parameters of a login request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginParams {
    pub login: String,
    pub pass: String,
    pub rigid: String,
    pub agent: String,
}

impl From<&Credentials> for LoginParams {
    fn from(credentials: &Credentials) -> Self {
        Self {
            login: credentials.wallet.clone(),
            pass: credentials.password.clone(),
            rigid: credentials.worker_id.clone(),
            agent: credentials.agent.clone(),
        }
    }
}

/// Parameters of a submit request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitParams {
    /// Session id assigned by the pool at login
    pub id: String,
    pub job_id: String,
    /// Lowercase hex nonce without prefix
    pub nonce: String,
    /// Digest hex
    pub result: String,
}

impl SubmitParams {
    /// Build submit parameters for a solution under a session id
    pub fn new(session_id: &str, solution: &Solution) -> Self {
        Self {
            id: session_id.to_string(),
            job_id: solution.job_id.clone(),
            nonce: solution.nonce.to_hex(),
            result: solution.digest_hex(),
        }
    }
}

/// Job payload as the pool sends it
///
/// Every field is optional on the wire; completeness is checked when the job
/// is turned into a [`crate::Job`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub blob: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    /// Pool-specific extras (height, seed_hash, algo, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Outbound client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    Login(LoginParams),
    Submit(SubmitParams),
}

#[derive(Serialize, Deserialize)]
struct Envelope<P> {
    id: u64,
    method: String,
    params: P,
}

impl ClientRequest {
    /// Method name on the wire
    pub fn method(&self) -> &'static str {
        match self {
            ClientRequest::Login(_) => METHOD_LOGIN,
            ClientRequest::Submit(_) => METHOD_SUBMIT,
        }
    }

    /// Serialize to a single JSON line without the trailing newline
    pub fn to_json(&self) -> Result<String> {
        let method = self.method().to_string();
        let json = match self {
            ClientRequest::Login(params) => serde_json::to_string(&Envelope {
                id: REQUEST_ID,
                method,
                params,
            })?,
            ClientRequest::Submit(params) => serde_json::to_string(&Envelope {
                id: REQUEST_ID,
                method,
                params,
            })?,
        };
        Ok(json)
    }

    /// Parse a request line the way the pool would
    pub fn from_json(line: &str) -> Result<Self> {
        let envelope: Envelope<Value> = serde_json::from_str(line)?;
        match envelope.method.as_str() {
            METHOD_LOGIN => Ok(ClientRequest::Login(serde_json::from_value(envelope.params)?)),
            METHOD_SUBMIT => Ok(ClientRequest::Submit(serde_json::from_value(envelope.params)?)),
            other => Err(Error::protocol_decode(format!("Unknown request method: {}", other))),
        }
    }
}

/// Inbound message from the pool
#[derive(Debug, Clone, PartialEq)]
pub enum PoolMessage {
    /// Pushed notification, e.g. a new job
    Notification { method: String, params: Value },
    /// Response to a client request
    Response {
        id: Option<Value>,
        result: Option<Value>,
        error: Option<Value>,
    },
}

impl PoolMessage {
    /// Decode one line of pool output
    pub fn from_json(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| Error::protocol_decode(format!("Invalid JSON: {}", e)))?;
        let mut object = match value {
            Value::Object(object) => object,
            other => {
                return Err(Error::protocol_decode(format!(
                    "Expected a JSON object, got {}",
                    other
                )))
            }
        };

        if let Some(method) = object.get("method").and_then(Value::as_str) {
            let method = method.to_string();
            let params = object.remove("params").unwrap_or(Value::Null);
            return Ok(PoolMessage::Notification { method, params });
        }

        if object.contains_key("result") || object.contains_key("error") {
            let non_null = |v: Option<Value>| v.filter(|v| !v.is_null());
            return Ok(PoolMessage::Response {
                id: non_null(object.remove("id")),
                result: non_null(object.remove("result")),
                error: non_null(object.remove("error")),
            });
        }

        Err(Error::protocol_decode("Message has neither method nor result/error"))
    }

    /// Session id carried by a successful login response
    pub fn session_id(&self) -> Option<&str> {
        match self {
            PoolMessage::Response {
                result: Some(result),
                error: None,
                ..
            } => result.get("id").and_then(Value::as_str),
            _ => None,
        }
    }

    /// Status string of a successful response, e.g. `"OK"` for an accepted share
    pub fn status(&self) -> Option<&str> {
        match self {
            PoolMessage::Response {
                result: Some(result),
                error: None,
                ..
            } => result.get("status").and_then(Value::as_str),
            _ => None,
        }
    }

    /// Whether this response accepts a share
    pub fn is_share_accepted(&self) -> bool {
        self.session_id().is_none()
            && self
                .status()
                .is_some_and(|status| status.eq_ignore_ascii_case(STATUS_OK))
    }

    /// Job payload, either pushed or embedded in the login result
    pub fn job(&self) -> Option<Result<JobParams>> {
        let params = match self {
            PoolMessage::Notification { method, params } if method == METHOD_JOB => params,
            PoolMessage::Response {
                result: Some(result),
                ..
            } => result.get("job").filter(|job| !job.is_null())?,
            _ => return None,
        };
        Some(serde_json::from_value(params.clone()).map_err(|e| {
            Error::protocol_decode(format!("Invalid job payload: {}", e))
        }))
    }

    /// Error text of an error-carrying message
    pub fn error_message(&self) -> Option<String> {
        let error = match self {
            PoolMessage::Response {
                error: Some(error), ..
            } => error,
            _ => return None,
        };
        Some(match error {
            Value::String(message) => message.clone(),
            Value::Object(object) => object
                .get("message")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| error.to_string()),
            other => other.to_string(),
        })
    }

    /// The pool's error as a [`Error::PoolRejection`]
    pub fn rejection(&self) -> Option<Error> {
        self.error_message().map(Error::pool_rejection)
    }
}

/// One decoded line
#[derive(Debug)]
pub enum Frame {
    /// A well-formed pool message
    Message(PoolMessage),
    /// A line that could not be decoded; it has been discarded
    Malformed { line: String, error: Error },
}

/// Newline-framed codec for the pool connection
#[derive(Debug)]
pub struct PoolCodec {
    lines: LinesCodec,
}

impl PoolCodec {
    /// Create a codec with the default maximum line length
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    /// Create a codec with a custom maximum line length
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
        }
    }

    fn frame(line: String) -> Frame {
        match PoolMessage::from_json(&line) {
            Ok(message) => Frame::Message(message),
            Err(error) => Frame::Malformed { line, error },
        }
    }

    fn next_frame(
        &mut self,
        src: &mut BytesMut,
        eof: bool,
    ) -> Result<Option<Frame>> {
        loop {
            let decoded = if eof {
                self.lines.decode_eof(src)
            } else {
                self.lines.decode(src)
            };
            match decoded {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    return Ok(Some(Self::frame(line.to_string())));
                }
                Ok(None) => return Ok(None),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    return Ok(Some(Frame::Malformed {
                        line: String::new(),
                        error: Error::protocol_decode("Line exceeds maximum length"),
                    }))
                }
                Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                    return Ok(Some(Frame::Malformed {
                        line: String::new(),
                        error: Error::protocol_decode(format!("Line is not valid UTF-8: {}", e)),
                    }))
                }
                Err(LinesCodecError::Io(e)) => return Err(e.into()),
            }
        }
    }
}

impl Default for PoolCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PoolCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        self.next_frame(src, false)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        self.next_frame(src, true)
    }
}

impl Encoder<ClientRequest> for PoolCodec {
    type Error = Error;

    fn encode(&mut self, request: ClientRequest, dst: &mut BytesMut) -> Result<()> {
        let json = request.to_json()?;
        self.lines.encode(json, dst).map_err(|e| match e {
            LinesCodecError::Io(e) => Error::Io(e),
            LinesCodecError::MaxLineLengthExceeded => {
                Error::protocol_decode("Outbound line exceeds maximum length")
            }
        })
    }
}
