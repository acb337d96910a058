//! Sandboxed executor
//!
//! Runs a version's logic under a wall-clock timeout with the restricted
//! capability set of the logic language. Two isolation levels:
//! - [`IsolationLevel::Subprocess`]: a fresh worker process per execution,
//!   talking line-delimited JSON ([`protocol`]); killed on timeout or when
//!   the caller goes away;
//! - [`IsolationLevel::Thread`]: a blocking thread with a cancellation flag
//!   polled on every evaluation step.
//!
//! In both cases data primitives are served by the supervisor's
//! [`DataStore`].

pub mod protocol;
pub mod worker;

use fte_context::Value;
use fte_logic::{evaluate_expression, parse_expression, parse_procedure, run_procedure, Host, LogicError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::store::DataStore;
use crate::types::{FactId, LogicKind};
use protocol::{
    decode_line, encode_line, ExecutionRequest, HostReply, SupervisorMessage, WorkerMessage,
    WorkerOutcome,
};

/// Step, size and depth ceilings for one execution
pub type SandboxLimits = fte_logic::Limits;

/// Isolation level for executions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Blocking thread with cooperative cancellation
    Thread,
    /// Separate worker process
    #[default]
    Subprocess,
}

/// How to start a worker process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// `<program> sandbox-worker`
    #[must_use]
    pub fn fte(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec!["sandbox-worker".to_string()],
        }
    }
}

/// Run logic in the current thread
///
/// # Errors
/// Parse and evaluation errors from the logic language.
pub fn run_logic(
    kind: LogicKind,
    logic: &str,
    inputs: &BTreeMap<String, Value>,
    limits: SandboxLimits,
    host: &mut dyn Host,
    cancel: Option<&AtomicBool>,
) -> Result<Value, LogicError> {
    match kind {
        LogicKind::Expression => {
            let expr = parse_expression(logic)?;
            evaluate_expression(&expr, inputs, limits, host, cancel)
        }
        LogicKind::Procedure => {
            let procedure = parse_procedure(logic)?;
            run_procedure(&procedure, inputs, limits, host, cancel)
        }
    }
}

/// Host serving primitives from a store, for blocking threads
struct StoreHost {
    store: Arc<dyn DataStore>,
    runtime: tokio::runtime::Handle,
    primitives: Vec<String>,
}

impl Host for StoreHost {
    fn is_primitive(&self, name: &str) -> bool {
        self.primitives.iter().any(|p| p == name)
    }

    fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, String> {
        self.runtime
            .block_on(self.store.call(name, args))
            .map_err(|e| e.to_string())
    }
}

fn protocol(e: impl std::fmt::Display) -> EngineError {
    EngineError::Isolation(format!("worker protocol: {e}"))
}

/// Sets the flag when dropped, so a dropped or timed-out execution stops
/// its thread
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Executor shared by all resolutions
pub struct Sandbox {
    isolation: IsolationLevel,
    worker: Option<WorkerCommand>,
    limits: SandboxLimits,
    store: Arc<dyn DataStore>,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("isolation", &self.isolation)
            .field("worker", &self.worker)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl Sandbox {
    /// Subprocess isolation falls back to threads when no worker is given
    pub fn new(
        isolation: IsolationLevel,
        worker: Option<WorkerCommand>,
        limits: SandboxLimits,
        store: Arc<dyn DataStore>,
    ) -> Self {
        let isolation = match (isolation, &worker) {
            (IsolationLevel::Subprocess, None) => {
                debug!("no worker program configured, using thread isolation");
                IsolationLevel::Thread
            }
            (level, _) => level,
        };
        Self {
            isolation,
            worker,
            limits,
            store,
        }
    }

    #[must_use]
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    #[must_use]
    pub fn limits(&self) -> SandboxLimits {
        self.limits
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    /// Execute logic with resolved inputs
    ///
    /// # Errors
    /// - [`EngineError::UnsupportedLogicKind`] for unknown kind tags;
    /// - [`EngineError::ExecutionTimeout`] when `timeout` elapses;
    /// - [`EngineError::ExecutionFailed`] for logic errors;
    /// - [`EngineError::Isolation`] when the worker misbehaves.
    pub async fn execute(
        &self,
        fact: &FactId,
        kind_tag: &str,
        logic: &str,
        inputs: BTreeMap<String, Value>,
        timeout: Duration,
    ) -> Result<Value, EngineError> {
        let kind = LogicKind::from_tag(kind_tag)
            .ok_or_else(|| EngineError::UnsupportedLogicKind(kind_tag.to_string()))?;
        let timed_out = || {
            warn!(fact = %fact, timeout_ms = timeout.as_millis() as u64, "execution timed out");
            EngineError::ExecutionTimeout {
                fact: fact.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }
        };
        match (self.isolation, &self.worker) {
            (IsolationLevel::Subprocess, Some(worker)) => {
                let request = ExecutionRequest {
                    kind,
                    logic: logic.to_string(),
                    inputs,
                    limits: self.limits,
                    primitives: self.store.primitives(),
                };
                self.execute_in_subprocess(fact, worker, request, timeout)
                    .await
                    .unwrap_or_else(|| Err(timed_out()))
            }
            _ => self
                .execute_in_thread(fact, kind, logic.to_string(), inputs, timeout)
                .await
                .unwrap_or_else(|| Err(timed_out())),
        }
    }

    /// `None` on timeout
    async fn execute_in_thread(
        &self,
        fact: &FactId,
        kind: LogicKind,
        logic: String,
        inputs: BTreeMap<String, Value>,
        timeout: Duration,
    ) -> Option<Result<Value, EngineError>> {
        let cancel = Arc::new(AtomicBool::new(false));
        let _guard = CancelOnDrop(Arc::clone(&cancel));
        let mut host = StoreHost {
            store: Arc::clone(&self.store),
            runtime: tokio::runtime::Handle::current(),
            primitives: self.store.primitives(),
        };
        let limits = self.limits;
        let flag = Arc::clone(&cancel);
        let task = tokio::task::spawn_blocking(move || {
            run_logic(kind, &logic, &inputs, limits, &mut host, Some(flag.as_ref()))
        });
        match tokio::time::timeout(timeout, task).await {
            Err(_) => None,
            Ok(Err(join)) => Some(Err(EngineError::Isolation(format!(
                "execution thread failed: {join}"
            )))),
            Ok(Ok(result)) => Some(result.map_err(|e| EngineError::execution_failed(fact, e))),
        }
    }

    /// `None` on timeout
    async fn execute_in_subprocess(
        &self,
        fact: &FactId,
        worker: &WorkerCommand,
        request: ExecutionRequest,
        timeout: Duration,
    ) -> Option<Result<Value, EngineError>> {
        let mut child = match Command::new(&worker.program)
            .args(&worker.args)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return Some(Err(EngineError::Isolation(format!(
                    "cannot start worker {}: {e}",
                    worker.program.display()
                ))))
            }
        };
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Some(Err(EngineError::Isolation("worker pipes unavailable".into())));
        };
        let session = self.supervise(fact, stdin, BufReader::new(stdout), request);
        let result = tokio::time::timeout(timeout, session).await;
        if result.is_err() {
            let _ = child.start_kill();
        }
        // the worker exits after `done`; reap it without waiting forever
        let _ = tokio::time::timeout(Duration::from_secs(1), child.wait()).await;
        result.ok()
    }

    async fn supervise<W, R>(
        &self,
        fact: &FactId,
        mut stdin: W,
        mut stdout: R,
        request: ExecutionRequest,
    ) -> Result<Value, EngineError>
    where
        W: tokio::io::AsyncWrite + Unpin,
        R: tokio::io::AsyncBufRead + Unpin,
    {
        let send = |message: &SupervisorMessage| encode_line(message).map_err(protocol);

        let line = send(&SupervisorMessage::Execute(request))?;
        stdin.write_all(line.as_bytes()).await.map_err(protocol)?;
        stdin.flush().await.map_err(protocol)?;

        let mut line = String::new();
        loop {
            line.clear();
            if stdout.read_line(&mut line).await.map_err(protocol)? == 0 {
                return Err(EngineError::Isolation("worker exited without a result".into()));
            }
            match decode_line::<WorkerMessage>(&line).map_err(protocol)? {
                WorkerMessage::HostCall { primitive, args } => {
                    debug!(fact = %fact, primitive = %primitive, "proxying primitive call");
                    let reply = match self.store.call(&primitive, args).await {
                        Ok(v) => HostReply::Value(v),
                        Err(e) => HostReply::Error(e.to_string()),
                    };
                    let out = send(&SupervisorMessage::HostReply { reply })?;
                    stdin.write_all(out.as_bytes()).await.map_err(protocol)?;
                    stdin.flush().await.map_err(protocol)?;
                }
                WorkerMessage::Done { outcome } => {
                    return match outcome {
                        WorkerOutcome::Value(v) => Ok(v),
                        WorkerOutcome::Failed(cause) => {
                            Err(EngineError::execution_failed(fact, cause))
                        }
                    };
                }
            }
        }
    }
}
