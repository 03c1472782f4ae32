//! The stable error taxonomy clients and diagnostics observe (spec §7).
//! These are kinds, not exceptions: every variant maps to exactly one
//! HTTP status code over the reference transport.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FabricError {
    #[error("job {0} already submitted")]
    DuplicateSubmission(String),

    #[error("result for job {0} already accepted")]
    AlreadyAccepted(String),

    #[error("no executor satisfies the required capabilities")]
    NoCapableExecutor,

    #[error("broker job queue is saturated")]
    QueueSaturated,

    #[error("peer request timed out")]
    PeerTimeout,

    #[error("peer is unhealthy")]
    PeerUnhealthy,

    #[error("job {0} not found")]
    UnknownJob(String),

    #[error("executor {0} not found")]
    UnknownExecutor(String),

    #[error("message envelope missing or invalid")]
    TransportMalformed,

    #[error("job {0} failed in sandbox")]
    JobFailed(String),
}

impl FabricError {
    /// The stable status code this kind maps to over the reference HTTP
    /// transport (spec §6).
    pub fn status_code(&self) -> u16 {
        match self {
            FabricError::DuplicateSubmission(_) => 409,
            FabricError::AlreadyAccepted(_) => 409,
            FabricError::NoCapableExecutor => 412,
            FabricError::QueueSaturated => 413,
            FabricError::PeerTimeout | FabricError::PeerUnhealthy => 503,
            FabricError::UnknownJob(_) | FabricError::UnknownExecutor(_) => 404,
            FabricError::TransportMalformed => 400,
            FabricError::JobFailed(_) => 200,
        }
    }

    /// Whether the originating node's clock should still advance for this
    /// outcome (spec §7: e.g. `already-accepted` ticks because "the
    /// attempt is an event"; `duplicate-submission` and `queue-saturated`
    /// do not).
    pub fn advances_clock(&self) -> bool {
        !matches!(
            self,
            FabricError::DuplicateSubmission(_)
                | FabricError::QueueSaturated
                | FabricError::TransportMalformed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_spec_mapping() {
        assert_eq!(FabricError::AlreadyAccepted("j".into()).status_code(), 409);
        assert_eq!(FabricError::NoCapableExecutor.status_code(), 412);
        assert_eq!(FabricError::QueueSaturated.status_code(), 413);
        assert_eq!(FabricError::PeerUnhealthy.status_code(), 503);
        assert_eq!(FabricError::UnknownJob("j".into()).status_code(), 404);
    }

    #[test]
    fn duplicate_and_saturated_do_not_advance_clock() {
        assert!(!FabricError::DuplicateSubmission("j".into()).advances_clock());
        assert!(!FabricError::QueueSaturated.advances_clock());
        assert!(FabricError::AlreadyAccepted("j".into()).advances_clock());
    }
}
