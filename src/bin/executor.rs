//! The executor binary: wires the library's [`Executor`] state machine
//! to an axum HTTP server, registers with a broker, and heartbeats on a
//! fixed period (spec §4.4, §6). Same thin-binary shape as `broker.rs`.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fabric::config::NodeConfig;
use fabric::error::FabricError;
use fabric::executor::Executor;
use fabric::job::JobId;
use fabric::message::{CausalMessage, MessageKind};
use fabric::net::SubmitJobPayload;
use fabric::sandbox::{MockSandbox, Sandbox};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    node_id: Option<String>,
    #[arg(long)]
    bind: Option<String>,
    /// This executor's own externally-reachable endpoint, advertised to
    /// the broker on register/heartbeat.
    #[arg(long)]
    advertise: String,
    /// Broker base URL to register and heartbeat against.
    #[arg(long)]
    broker: String,
    /// Capability tags this executor offers, repeatable.
    #[arg(long = "capability")]
    capabilities: Vec<String>,
}

fn load_config(args: &Args) -> anyhow::Result<NodeConfig> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::from_toml_str(&std::fs::read_to_string(path)?)?,
        None => NodeConfig::default(),
    };
    if let Some(node_id) = &args.node_id {
        config.node_id = node_id.clone();
    }
    if let Some(bind) = &args.bind {
        config.bind_addr = bind.clone();
    }
    Ok(config)
}

#[derive(Clone)]
struct AppState {
    executor: Arc<Executor>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(error: FabricError) -> (StatusCode, Json<ErrorBody>) {
    let status = StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorBody { error: error.to_string() }))
}

/// Receives a job dispatched by a broker (spec §4.4.1). The envelope is
/// merged into the executor's clock before admission, exactly the
/// canonical receive path in [`CausalMessage::receive`].
async fn submit_job(
    State(state): State<AppState>,
    Json(envelope): Json<CausalMessage<SubmitJobPayload>>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let (kind, emergency_context, payload) = envelope.receive(&state.executor.clock);
    let is_emergency = matches!(kind, MessageKind::Emergency);
    let (emergency_kind, emergency_level) = match &emergency_context {
        Some(context) => (Some(context.kind.clone()), Some(context.level)),
        None => (None, None),
    };
    state
        .executor
        .receive_job(
            payload.job_id,
            payload.job_info,
            is_emergency,
            emergency_kind,
            emergency_level,
            payload.priority_score,
        )
        .map_err(error_response)?;
    Ok(StatusCode::ACCEPTED)
}

/// Receives a direct emergency push from a broker (spec §4.5), outside
/// the job-dispatch path — a declaration or clear isn't necessarily
/// accompanied by a job.
async fn push_emergency(
    State(state): State<AppState>,
    Json(envelope): Json<CausalMessage<()>>,
) -> StatusCode {
    let (_kind, emergency_context, ()) = envelope.receive(&state.executor.clock);
    match emergency_context {
        Some(context) => {
            state.executor.enter_emergency(context);
        }
        None => state.executor.clear_emergency(),
    }
    StatusCode::OK
}

#[derive(Debug, serde::Deserialize)]
struct SubmitResultRequest {
    result: Vec<u8>,
}

async fn submit_result(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    Json(request): Json<SubmitResultRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    state
        .executor
        .submit_result(job_id, request.result)
        .map_err(error_response)?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Serialize)]
struct ExecutorStatus {
    node_id: String,
    pending: usize,
    running: usize,
    completed_results: usize,
    emergency_mode: bool,
}

async fn status(State(state): State<AppState>) -> Json<ExecutorStatus> {
    Json(ExecutorStatus {
        node_id: state.executor.node_id.clone(),
        pending: state.executor.pending_len(),
        running: state.executor.running_len(),
        completed_results: state.executor.results.len(),
        emergency_mode: state.executor.is_suppressing_normal_work(),
    })
}

#[derive(serde::Serialize)]
struct RegisterPayload {
    endpoint: String,
    capabilities: HashSet<String>,
}

async fn run_heartbeat_loop(
    executor: Arc<Executor>,
    broker_base: String,
    advertise: String,
    capabilities: HashSet<String>,
    period: Duration,
    cancel: CancellationToken,
) {
    let client = reqwest::Client::new();
    let register_url = format!("{broker_base}/executors/{}/register", executor.node_id);
    let payload = RegisterPayload {
        endpoint: advertise.clone(),
        capabilities: capabilities.clone(),
    };
    if let Err(error) = client.post(&register_url).json(&payload).send().await {
        warn!(%error, "initial registration with broker failed, will retry via heartbeat");
    }

    let heartbeat_url = format!("{broker_base}/executors/{}/heartbeat", executor.node_id);
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let body = serde_json::json!({
                    "endpoint": advertise,
                    "capabilities": capabilities,
                    "clock": executor.clock.snapshot(),
                    "emergency_mode": executor.is_suppressing_normal_work(),
                    "running_job_count": executor.running_len(),
                });
                if let Err(error) = client.post(&heartbeat_url).json(&body).send().await {
                    warn!(%error, "heartbeat to broker failed");
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Arc::new(load_config(&args)?);
    let bind_addr: SocketAddr = config.bind_addr.parse()?;
    let capabilities: HashSet<String> = args.capabilities.iter().cloned().collect();
    let sandbox: Arc<dyn Sandbox> = Arc::new(MockSandbox::echo());

    let executor = Arc::new(Executor::new(
        config.node_id.clone(),
        config.clone(),
        capabilities.clone(),
        sandbox,
    ));
    let state = AppState { executor: executor.clone() };

    let app = Router::new()
        .route("/jobs/submit", post(submit_job))
        .route("/jobs/:job_id/result", post(submit_result))
        .route("/emergency", post(push_emergency))
        .route("/status", get(status))
        .with_state(state);

    let cancel = CancellationToken::new();
    let dispatch_task = tokio::spawn(executor.clone().run_dispatch_pump(cancel.clone()));
    let heartbeat_task = tokio::spawn(run_heartbeat_loop(
        executor.clone(),
        args.broker.clone(),
        args.advertise.clone(),
        capabilities,
        config.heartbeat_period(),
        cancel.clone(),
    ));

    info!(bind = %bind_addr, node_id = %executor.node_id, "executor listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
    });

    server.await?;
    cancel.cancel();
    let _ = tokio::join!(dispatch_task, heartbeat_task);
    Ok(())
}
