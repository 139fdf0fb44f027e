//! Reconciliation lifecycle status

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state reported to the caller of a reconciliation
///
/// `Running` and `Failed` may be reported many times during one run;
/// `Success` and `Error` are terminal and reported at most once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// An attempt is starting
    Running,
    /// An attempt failed and another one will follow
    Failed,
    /// The component is installed and its workloads are ready
    Success,
    /// The run gave up
    Error,
}

impl Status {
    /// Whether no further status follows this one
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Success | Status::Error)
    }

    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Running => "running",
            Status::Failed => "failed",
            Status::Success => "success",
            Status::Error => "error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
