//! Outbound HTTP calls to peer brokers and executors. The core is not
//! bound to a transport (spec §1: "only that peer endpoints can be
//! reached by address"); this module is the reference HTTP/JSON client
//! the rest of the crate is built against, grounded in the same
//! `reqwest` the teacher's own control-plane CLIs
//! (`tools/*-control`) use to talk to a running node.

use std::time::Duration;

use async_trait::async_trait;

use crate::broker::sync::BrokerMetadata;
use crate::clock::VectorClock;
use crate::emergency::EmergencyContext;
use crate::error::FabricError;
use crate::job::{JobId, JobInfo};
use crate::message::{CausalMessage, MessageKind};

/// Broker → executor calls: dispatching a job to the executor endpoint
/// chosen by §4.3.3 selection. The broker never holds a back pointer to
/// the executor, only this client plus the endpoint string from the
/// registry (spec §9). The dispatch itself travels as a
/// [`CausalMessage`] so the executor's clock picks up the broker's
/// causal history on receipt (spec §4.2).
#[async_trait]
pub trait ExecutorClient: Send + Sync {
    async fn submit_job(
        &self,
        endpoint: &str,
        broker_clock: &VectorClock,
        job_id: JobId,
        job_info: &JobInfo,
        priority_score: f64,
        emergency_context: Option<EmergencyContext>,
    ) -> Result<(), FabricError>;

    /// Push the fleet emergency state directly to an executor (spec
    /// §4.5: "every broker... instructs every local executor to enter
    /// emergency mode"). `context` of `None` clears it. This travels
    /// outside job dispatch because a declaration or clear isn't
    /// necessarily accompanied by a job.
    async fn push_emergency(
        &self,
        endpoint: &str,
        broker_clock: &VectorClock,
        context: Option<EmergencyContext>,
    ) -> Result<(), FabricError>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpExecutorClient {
    client: reqwest::Client,
}

impl HttpExecutorClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

/// The payload carried inside the `CausalMessage` posted to an
/// executor's `/jobs/submit`. Public so the executor-side HTTP handler
/// can name the same type when deserializing the envelope.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SubmitJobPayload {
    pub job_id: JobId,
    pub job_info: JobInfo,
    pub priority_score: f64,
}

#[async_trait]
impl ExecutorClient for HttpExecutorClient {
    async fn submit_job(
        &self,
        endpoint: &str,
        broker_clock: &VectorClock,
        job_id: JobId,
        job_info: &JobInfo,
        priority_score: f64,
        emergency_context: Option<EmergencyContext>,
    ) -> Result<(), FabricError> {
        let url = format!("{endpoint}/jobs/submit");
        let kind = if emergency_context.is_some() {
            MessageKind::Emergency
        } else {
            MessageKind::Normal
        };
        let envelope = CausalMessage::send(
            broker_clock,
            kind,
            emergency_context,
            SubmitJobPayload {
                job_id,
                job_info: job_info.clone(),
                priority_score,
            },
        );
        self.client
            .post(&url)
            .json(&envelope)
            .send()
            .await
            .map_err(|_| FabricError::PeerUnhealthy)?;
        Ok(())
    }

    async fn push_emergency(
        &self,
        endpoint: &str,
        broker_clock: &VectorClock,
        context: Option<EmergencyContext>,
    ) -> Result<(), FabricError> {
        let url = format!("{endpoint}/emergency");
        let kind = if context.is_some() {
            MessageKind::Emergency
        } else {
            MessageKind::Normal
        };
        let envelope = CausalMessage::send(broker_clock, kind, context, ());
        self.client
            .post(&url)
            .json(&envelope)
            .send()
            .await
            .map_err(|_| FabricError::PeerUnhealthy)?;
        Ok(())
    }
}

#[async_trait]
pub trait PeerClient: Send + Sync {
    /// One-shot health probe used by the discovery loop (spec §4.3.5).
    async fn probe(&self, endpoint: &str, timeout: Duration) -> bool;

    /// Exchange `BrokerMetadata` with a peer's `/broker/sync-metadata`.
    /// A timeout or transport failure surfaces as `PeerTimeout` and must
    /// not merge the caller's clock (spec §5).
    async fn sync_metadata(
        &self,
        endpoint: &str,
        mine: &BrokerMetadata,
        timeout: Duration,
    ) -> Result<BrokerMetadata, FabricError>;
}

/// The reference `reqwest`-backed implementation.
#[derive(Debug, Clone, Default)]
pub struct HttpPeerClient {
    client: reqwest::Client,
}

impl HttpPeerClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn probe(&self, endpoint: &str, timeout: Duration) -> bool {
        let url = format!("{endpoint}/broker/coordination-status");
        matches!(
            tokio::time::timeout(timeout, self.client.get(&url).send()).await,
            Ok(Ok(response)) if response.status().is_success()
        )
    }

    async fn sync_metadata(
        &self,
        endpoint: &str,
        mine: &BrokerMetadata,
        timeout: Duration,
    ) -> Result<BrokerMetadata, FabricError> {
        let url = format!("{endpoint}/broker/sync-metadata");
        let call = self.client.post(&url).json(mine).send();
        let response = tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| FabricError::PeerTimeout)?
            .map_err(|_| FabricError::PeerUnhealthy)?;
        response
            .json::<BrokerMetadata>()
            .await
            .map_err(|_| FabricError::TransportMalformed)
    }
}
