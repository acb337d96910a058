//! Line-delimited JSON protocol between supervisor and worker
//!
//! One session per worker process:
//!
//! ```text
//! supervisor -> worker   {"op":"execute", ...}
//! worker -> supervisor   {"op":"host_call", ...}      (zero or more,
//! supervisor -> worker   {"op":"host_reply", ...}      strictly alternating)
//! worker -> supervisor   {"op":"done", ...}
//! ```

use fte_context::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::SandboxLimits;
use crate::types::LogicKind;

/// Everything a worker needs to run one logic body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub kind: LogicKind,
    pub logic: String,
    pub inputs: BTreeMap<String, Value>,
    pub limits: SandboxLimits,
    /// Primitive names the supervisor will proxy
    pub primitives: Vec<String>,
}

/// Supervisor to worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SupervisorMessage {
    Execute(ExecutionRequest),
    HostReply { reply: HostReply },
}

/// Result of a proxied primitive call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostReply {
    Value(Value),
    Error(String),
}

/// Worker to supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkerMessage {
    HostCall { primitive: String, args: Vec<Value> },
    Done { outcome: WorkerOutcome },
}

/// Final result of a worker session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerOutcome {
    Value(Value),
    Failed(String),
}

/// Encode one message as a line, newline included
///
/// # Errors
/// Returns the serializer error.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Decode one line
///
/// # Errors
/// Returns the deserializer error.
pub fn decode_line<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}
