//! Worker side of subprocess isolation
//!
//! The worker reads one [`SupervisorMessage::Execute`] from its input, runs
//! the logic, proxies every primitive call back to the supervisor and writes
//! a single [`WorkerMessage::Done`]. It has no other way to reach data.

use fte_context::Value;
use fte_logic::Host;
use std::io::{BufRead, Write};

use super::protocol::{
    decode_line, encode_line, HostReply, SupervisorMessage, WorkerMessage, WorkerOutcome,
};
use super::run_logic;

/// Errors that end a worker session without a result
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker protocol: {0}")]
    Protocol(String),
}

impl From<serde_json::Error> for WorkerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

struct ProxyHost<'io, R, W> {
    input: &'io mut R,
    output: &'io mut W,
    primitives: Vec<String>,
}

impl<R: BufRead, W: Write> ProxyHost<'_, R, W> {
    fn round_trip(&mut self, primitive: &str, args: Vec<Value>) -> Result<HostReply, WorkerError> {
        let call = WorkerMessage::HostCall {
            primitive: primitive.to_string(),
            args,
        };
        self.output.write_all(encode_line(&call)?.as_bytes())?;
        self.output.flush()?;
        let line = read_line(self.input)?;
        match decode_line::<SupervisorMessage>(&line)? {
            SupervisorMessage::HostReply { reply } => Ok(reply),
            SupervisorMessage::Execute(_) => {
                Err(WorkerError::Protocol("expected host_reply, got execute".into()))
            }
        }
    }
}

impl<R: BufRead, W: Write> Host for ProxyHost<'_, R, W> {
    fn is_primitive(&self, name: &str) -> bool {
        self.primitives.iter().any(|p| p == name)
    }

    fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, String> {
        match self.round_trip(name, args) {
            Ok(HostReply::Value(v)) => Ok(v),
            Ok(HostReply::Error(message)) => Err(message),
            Err(e) => Err(e.to_string()),
        }
    }
}

fn read_line<R: BufRead>(input: &mut R) -> Result<String, WorkerError> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(WorkerError::Protocol("supervisor closed the channel".into()));
    }
    Ok(line)
}

/// Serve one execution session
///
/// # Errors
/// I/O failures and protocol violations. Logic failures are reported to the
/// supervisor as [`WorkerOutcome::Failed`], not as errors.
pub fn serve<R: BufRead, W: Write>(mut input: R, mut output: W) -> Result<(), WorkerError> {
    let line = read_line(&mut input)?;
    let request = match decode_line::<SupervisorMessage>(&line)? {
        SupervisorMessage::Execute(request) => request,
        SupervisorMessage::HostReply { .. } => {
            return Err(WorkerError::Protocol("expected execute, got host_reply".into()))
        }
    };
    let outcome = {
        let mut host = ProxyHost {
            input: &mut input,
            output: &mut output,
            primitives: request.primitives.clone(),
        };
        match run_logic(
            request.kind,
            &request.logic,
            &request.inputs,
            request.limits,
            &mut host,
            None,
        ) {
            Ok(value) => WorkerOutcome::Value(value),
            Err(e) => WorkerOutcome::Failed(e.to_string()),
        }
    };
    output.write_all(encode_line(&WorkerMessage::Done { outcome })?.as_bytes())?;
    output.flush()?;
    Ok(())
}
