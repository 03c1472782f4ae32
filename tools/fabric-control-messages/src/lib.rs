//! Wire types shared between the `fabric-control` CLI and the broker
//! binary's HTTP surface (spec §6), split out from the CLI itself the
//! same way the teacher splits `boson-control-messages` from
//! `boson-control`.

use serde::{Deserialize, Serialize};

use fabric::clock::ClockSnapshot;
use fabric::emergency::EmergencyLevel;
use fabric::job::JobId;
use fabric::job::JobInfo;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub job_info: JobInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: JobId,
    pub clock: ClockSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InFlight { executor_id: String },
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclareEmergencyRequest {
    pub kind: String,
    pub level: EmergencyLevel,
    pub location: Option<String>,
}

pub use fabric::broker::sync::BrokerMetadata;
