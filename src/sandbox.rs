//! The WASM sandbox is an external collaborator, named but not
//! implemented here (spec §1: "the WebAssembly sandbox that actually
//! executes a job" is out of scope). This module defines the interface
//! the executor dispatch pump invokes against, plus an in-process mock
//! used by tests and by the reference binaries until a real sandbox is
//! wired in.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::job::JobInfo;

/// Outcome of running a job to completion or cancellation.
#[derive(Debug, Clone)]
pub enum SandboxOutcome {
    Completed(Vec<u8>),
    Failed(String),
    Cancelled,
}

/// A sandbox runs one job at a time per call and must respect
/// cancellation promptly (spec §5: "on deadline the executor cancels the
/// sandbox (best-effort)").
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn run(&self, job_info: &JobInfo, cancel: CancellationToken) -> SandboxOutcome;
}

/// An in-process mock sandbox: "runs" a job by handing its payload to a
/// pure function. Good enough to drive the rest of the fabric in tests
/// and local demos without a real WASM runtime.
pub struct MockSandbox {
    run_fn: Arc<dyn Fn(&[u8]) -> Result<Vec<u8>, String> + Send + Sync>,
}

impl MockSandbox {
    pub fn new(run_fn: impl Fn(&[u8]) -> Result<Vec<u8>, String> + Send + Sync + 'static) -> Self {
        Self {
            run_fn: Arc::new(run_fn),
        }
    }

    /// An echo sandbox: every job "completes" with its own payload.
    pub fn echo() -> Self {
        Self::new(|payload| Ok(payload.to_vec()))
    }
}

#[async_trait]
impl Sandbox for MockSandbox {
    async fn run(&self, job_info: &JobInfo, cancel: CancellationToken) -> SandboxOutcome {
        let run_fn = self.run_fn.clone();
        let payload = job_info.payload.clone();
        let work = tokio::task::spawn_blocking(move || run_fn(&payload));
        tokio::select! {
            _ = cancel.cancelled() => SandboxOutcome::Cancelled,
            result = work => match result {
                Ok(Ok(bytes)) => SandboxOutcome::Completed(bytes),
                Ok(Err(message)) => SandboxOutcome::Failed(message),
                Err(join_err) => SandboxOutcome::Failed(join_err.to_string()),
            },
        }
    }
}
