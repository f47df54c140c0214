//! Background polling loop.
//!
//! One poller task per experiment: build the request for new data, fetch it, merge it,
//! notify listeners, sleep for the update rate, repeat. Cancellation is observed before
//! every fetch, while a fetch is in flight, and during the sleep. A failed fetch ends the
//! loop and is published on the failure channel; there is no automatic retry.

use super::report::{self, FailureOrigin};
use super::Shared;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle handle of the currently running poller, if any.
#[derive(Debug, Default)]
pub(crate) struct PollerSlot {
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
    generation: u64,
}

impl PollerSlot {
    /// Signal the current poller to exit and detach from it.
    fn stop(&mut self) -> bool {
        let was_running = self.is_running();
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        was_running
    }

    fn is_running(&self) -> bool {
        let cancelled = self.cancel.as_ref().map_or(true, CancellationToken::is_cancelled);
        let finished = self.task.as_ref().map_or(true, JoinHandle::is_finished);
        !cancelled && !finished
    }
}

impl Shared {
    /// Stop the current poller (if any) and start a fresh one.
    ///
    /// Both happen under the slot lock, so concurrent restarts and stops can never leave
    /// two pollers alive.
    pub(crate) fn restart_polling(self: &Arc<Self>) {
        let mut slot = self.poller.lock();
        slot.stop();

        if self.root_token.is_cancelled() {
            warn!("Experiment is shut down; not starting a poller");
            return;
        }

        let token = self.root_token.child_token();
        slot.generation += 1;
        let generation = slot.generation;
        let task = self
            .runtime
            .spawn(poll_loop(Arc::clone(self), token.clone(), generation));

        slot.cancel = Some(token);
        slot.task = Some(task);
        info!(generation, update_rate = ?self.update_rate, "Poller started");
    }

    /// Stop the current poller. Returns `false` if none was running.
    pub(crate) fn stop_polling(&self) -> bool {
        let stopped = self.poller.lock().stop();
        if stopped {
            info!("Poller stopped");
        }
        stopped
    }

    pub(crate) fn is_polling(&self) -> bool {
        self.poller.lock().is_running()
    }
}

async fn poll_loop(shared: Arc<Shared>, cancel: CancellationToken, generation: u64) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let request = shared.state.lock().request_for_new_data();
        let request = match request {
            Ok(request) => request,
            Err(err) => {
                report::publish(&shared.failures, FailureOrigin::Poller, err);
                break;
            }
        };

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = shared.connection.fetch_data(&request) => result,
        };

        match fetched {
            Ok(buffers) => {
                if cancel.is_cancelled() {
                    break;
                }
                shared.merge_and_notify(buffers);
            }
            Err(err) => {
                report::publish(&shared.failures, FailureOrigin::Poller, err);
                break;
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(shared.update_rate) => {}
        }
    }

    debug!(generation, "Poller exited");
}
