//! Submission admission types
//!
//! A `SubmissionRequest` is what a client sends; a `Submission` is the
//! validated, compiled bundle the scheduler owns for its execution
//! lifetime. Rejections are typed decisions returned synchronously, never
//! raised mid-run.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::run::{Run, RunResult};
use crate::server::catalog::Target;

/// What a client asks the server to do
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRequest {
    /// Name of the catalog target to run against
    pub target: String,

    /// Participants this submission is on behalf of
    pub users: Vec<String>,

    /// Version of the submitting client
    pub client_version: semver::Version,
}

/// A validated, compiled submission owned by the scheduler
#[derive(Debug)]
pub struct Submission {
    pub id: Uuid,
    pub target: Target,
    pub users: Vec<String>,
    pub runs: Vec<Arc<Run>>,
}

impl Submission {
    /// Aggregate outcome across this submission's runs
    ///
    /// `Shutdown` only when every run shut down cleanly; otherwise the
    /// first non-clean result in run order. Not terminal while any run is
    /// still in flight.
    pub fn outcome(&self) -> RunResult {
        let mut outcome = RunResult::Shutdown;
        for run in &self.runs {
            let result = run.result();
            if !result.is_terminal() {
                return result;
            }
            if outcome == RunResult::Shutdown {
                outcome = result;
            }
        }
        outcome
    }
}

/// Machine-readable class of an admission rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    /// The request itself is malformed
    BadRequest,
    /// Client older than the accepted minimum
    VersionTooOld,
    /// Server draining or restricted
    ServiceUnavailable,
    /// Valid request the server cannot act on
    Unprocessable,
}

/// A typed admission decision against a submission
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub reason: RejectReason,
    pub message: String,
}

impl Rejection {
    pub fn new(reason: RejectReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.reason, self.message)
    }
}

/// Admission posture of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerStatus {
    Accepting,
    StaffOnly,
    Draining,
}

/// Point-in-time view of scheduler load
///
/// Counters are sampled without pausing running work, so the snapshot is
/// eventually consistent across fields.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CombinedStats {
    pub queued: u64,
    pub running: u64,
    pub completed: u64,
    pub capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_serializes_kebab_case() {
        let r = Rejection::new(RejectReason::VersionTooOld, "please upgrade");
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"version-too-old\""));
        assert!(json.contains("please upgrade"));
    }

    #[test]
    fn request_parses_from_json() {
        let json = r#"{"target":"asst1","users":["a@b.edu"],"client_version":"1.2.3"}"#;
        let req: SubmissionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.target, "asst1");
        assert_eq!(req.client_version, semver::Version::new(1, 2, 3));
    }
}
