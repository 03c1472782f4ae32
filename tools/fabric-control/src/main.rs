//! `fabric-control`: a thin CLI for talking to a running broker over
//! HTTP — submit a job, check its status, declare or clear a fleet
//! emergency, or print coordination status. Directly grounded in the
//! teacher's own `boson-control`: a `reqwest`-based command runner over
//! the message types defined in a sibling crate.

use std::collections::HashSet;

use clap::{Parser, Subcommand};
use fabric::job::{CapabilitiesRequired, JobInfo};
use fabric_control_messages::{
    BrokerMetadata, DeclareEmergencyRequest, JobStatus, SubmitJobRequest, SubmitJobResponse,
};
use uuid::Uuid;

#[derive(Parser)]
struct Args {
    /// Base URL of the broker to talk to, e.g. http://127.0.0.1:7000
    #[arg(long, global = true, default_value = "http://127.0.0.1:7000")]
    broker: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a job from a UTF-8 payload string.
    Submit {
        payload: String,
        #[arg(long, default_value_t = 0)]
        priority: u8,
        #[arg(long, default_value_t = 0.0)]
        deadline_urgency: f64,
        #[arg(long, default_value_t = 0.0)]
        computational_weight: f64,
        #[arg(long = "capability")]
        capabilities: Vec<String>,
    },
    /// Look up a job's dispatch status.
    Status { job_id: Uuid },
    /// Declare a fleet-wide emergency.
    DeclareEmergency {
        kind: String,
        #[arg(value_enum)]
        level: EmergencyLevelArg,
        #[arg(long)]
        location: Option<String>,
    },
    /// Clear the active fleet emergency, if any.
    ClearEmergency,
    /// Print the broker's current coordination-status snapshot.
    CoordinationStatus,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum EmergencyLevelArg {
    Low,
    Medium,
    High,
    Critical,
}

impl From<EmergencyLevelArg> for fabric::emergency::EmergencyLevel {
    fn from(value: EmergencyLevelArg) -> Self {
        match value {
            EmergencyLevelArg::Low => Self::Low,
            EmergencyLevelArg::Medium => Self::Medium,
            EmergencyLevelArg::High => Self::High,
            EmergencyLevelArg::Critical => Self::Critical,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = reqwest::Client::new();

    match args.command {
        Command::Submit {
            payload,
            priority,
            deadline_urgency,
            computational_weight,
            capabilities,
        } => {
            let request = SubmitJobRequest {
                job_info: JobInfo {
                    payload: payload.into_bytes(),
                    capabilities_required: CapabilitiesRequired(capabilities.into_iter().collect::<HashSet<_>>()),
                    dependencies: vec![],
                    user_priority: priority,
                    deadline_urgency,
                    computational_weight,
                    deadline: None,
                },
            };
            let response: SubmitJobResponse = client
                .post(format!("{}/jobs/submit", args.broker))
                .json(&request)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Status { job_id } => {
            let response: JobStatus = client
                .get(format!("{}/jobs/{job_id}", args.broker))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::DeclareEmergency { kind, level, location } => {
            let request = DeclareEmergencyRequest {
                kind,
                level: level.into(),
                location,
            };
            client
                .post(format!("{}/emergency/declare", args.broker))
                .json(&request)
                .send()
                .await?
                .error_for_status()?;
            println!("emergency declared");
        }
        Command::ClearEmergency => {
            client
                .post(format!("{}/emergency/clear", args.broker))
                .send()
                .await?
                .error_for_status()?;
            println!("emergency cleared");
        }
        Command::CoordinationStatus => {
            let response: BrokerMetadata = client
                .get(format!("{}/broker/coordination-status", args.broker))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }
    Ok(())
}
