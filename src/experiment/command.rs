//! Remote experiment commands and their fire-and-forget task handles.

use super::report::{self, FailureOrigin};
use super::Shared;
use crate::error::{SyncError, SyncResult};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Commands that can run detached from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Start the remote experiment, then restart polling
    Start,
    /// Stop the remote experiment and polling
    Stop,
    /// Clear the remote data and stop polling
    Clear,
}

impl CommandKind {
    /// Failure channel origin for this command.
    pub fn origin(self) -> FailureOrigin {
        match self {
            CommandKind::Start => FailureOrigin::StartCommand,
            CommandKind::Stop => FailureOrigin::StopCommand,
            CommandKind::Clear => FailureOrigin::ClearCommand,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::Start => "start",
            CommandKind::Stop => "stop",
            CommandKind::Clear => "clear",
        };
        f.write_str(name)
    }
}

/// How a detached command ended.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    /// The device accepted the command and the local follow-up ran.
    Completed,
    /// The command failed; the same error was published on the failure channel.
    Failed(Arc<SyncError>),
    /// The command was cancelled before the device answered.
    Cancelled,
}

impl CommandOutcome {
    /// `true` for [`CommandOutcome::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, CommandOutcome::Completed)
    }
}

/// Handle to a fire-and-forget command.
///
/// Dropping the handle leaves the command running. [`Experiment::shutdown`](super::Experiment::shutdown)
/// cancels every command that is still waiting for the device.
#[derive(Debug)]
pub struct CommandTask {
    kind: CommandKind,
    token: CancellationToken,
    handle: JoinHandle<CommandOutcome>,
}

impl CommandTask {
    /// Which command this task runs.
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Abort the remote call if it has not been answered yet. Local cleanup (stopping the
    /// poller after `stop`/`clear`) still runs.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// `true` once the task has ended.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the command to end.
    pub async fn join(self) -> CommandOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(err) if err.is_cancelled() => CommandOutcome::Cancelled,
            Err(err) => CommandOutcome::Failed(Arc::new(SyncError::Runtime(err.to_string()))),
        }
    }
}

async fn cancellable<F>(token: &CancellationToken, call: F) -> SyncResult<()>
where
    F: Future<Output = SyncResult<()>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(SyncError::Cancelled),
        result = call => result,
    }
}

impl Shared {
    pub(crate) async fn run_command(
        self: &Arc<Self>,
        kind: CommandKind,
        token: &CancellationToken,
    ) -> SyncResult<()> {
        info!(command = %kind, "Sending command to remote experiment");
        match kind {
            CommandKind::Start => {
                cancellable(token, self.connection.start_experiment()).await?;
                self.restart_polling();
                Ok(())
            }
            CommandKind::Stop => {
                let result = cancellable(token, self.connection.stop_experiment()).await;
                self.stop_polling();
                result
            }
            CommandKind::Clear => {
                let result = cancellable(token, self.connection.clear_data()).await;
                if result.is_ok() {
                    // remote time restarts at zero; the next poll has to be a full one
                    self.state.lock().forget_continuous_value();
                }
                // clearing also halts the remote experiment
                self.stop_polling();
                result
            }
        }
    }

    pub(crate) fn spawn_command(self: &Arc<Self>, kind: CommandKind) -> CommandTask {
        let token = self.root_token.child_token();
        let task_token = token.clone();
        let shared = Arc::clone(self);

        let handle = self.runtime.spawn(async move {
            match shared.run_command(kind, &task_token).await {
                Ok(()) => CommandOutcome::Completed,
                Err(SyncError::Cancelled) => {
                    debug!(command = %kind, "Command cancelled");
                    CommandOutcome::Cancelled
                }
                Err(err) => {
                    let err = Arc::new(err);
                    report::publish(&shared.failures, kind.origin(), Arc::clone(&err));
                    CommandOutcome::Failed(err)
                }
            }
        });

        CommandTask {
            kind,
            token,
            handle,
        }
    }
}
