//! Failure reports for work that has no caller to return an error to.
//!
//! The poller and fire-and-forget commands run on their own tasks. When they fail, the
//! error is logged and published on a broadcast channel owned by the experiment, so the
//! application can react (show a dialog, restart polling, ...).

use crate::error::SyncError;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::error;

/// Capacity of the failure channel; slow receivers lag instead of blocking the poller.
pub(crate) const FAILURE_CHANNEL_CAPACITY: usize = 64;

/// Where a reported failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOrigin {
    /// The background poller; polling has stopped.
    Poller,
    /// A fire-and-forget `start_experiment`.
    StartCommand,
    /// A fire-and-forget `stop_experiment`.
    StopCommand,
    /// A fire-and-forget `clear_experiment_data`.
    ClearCommand,
}

impl fmt::Display for FailureOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureOrigin::Poller => "poller",
            FailureOrigin::StartCommand => "start command",
            FailureOrigin::StopCommand => "stop command",
            FailureOrigin::ClearCommand => "clear command",
        };
        f.write_str(label)
    }
}

/// One failure published on the experiment's failure channel.
#[derive(Debug, Clone)]
pub struct FailureReport {
    /// Task that failed
    pub origin: FailureOrigin,
    /// The error that ended it
    pub error: Arc<SyncError>,
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.origin, self.error)
    }
}

/// Log and publish a failure. Having no subscribers is not an error.
pub(crate) fn publish(
    sender: &broadcast::Sender<FailureReport>,
    origin: FailureOrigin,
    err: impl Into<Arc<SyncError>>,
) {
    let error = err.into();
    error!(%origin, error = %error, "Background operation failed");
    let _ = sender.send(FailureReport { origin, error });
}
