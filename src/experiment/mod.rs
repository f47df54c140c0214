//! The synchronization engine.
//!
//! An [`Experiment`] mirrors a fixed set of remote buffers into local memory. A background
//! poller asks the device for everything newer than what it already has and merges the
//! answer into the local buffers, either appending (when a continuous buffer such as
//! `time` is configured) or replacing them (full updates). Readers take independent
//! copies at any time; listeners are told about every merged poll.
//!
//! # Example
//!
//! ```rust,no_run
//! use phyphox_sync::connection::{Connection, ConnectionSettings};
//! use phyphox_sync::data::Buffer;
//! use phyphox_sync::experiment::Experiment;
//! use std::time::Duration;
//!
//! # async fn demo() -> phyphox_sync::error::SyncResult<()> {
//! let connection = Connection::http(&ConnectionSettings::new("192.168.0.42", 8080))?;
//! let experiment = Experiment::new(
//!     connection,
//!     ["time", "accX"],
//!     Some(0),
//!     Duration::from_millis(200),
//! )?;
//!
//! experiment.add_data_listener(|new_data: &[Buffer], _full: bool| {
//!     for buffer in new_data {
//!         println!("{}: {} new samples", buffer.name(), buffer.size());
//!     }
//! });
//!
//! experiment.start_experiment(true).await?;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod listener;
pub(crate) mod poller;
pub mod report;
pub(crate) mod state;

pub use command::{CommandKind, CommandOutcome, CommandTask};
pub use listener::{DataListener, ListenerId};
pub use report::{FailureOrigin, FailureReport};
pub use state::BufferRef;

use crate::config::ExperimentSettings;
use crate::connection::{Connection, DataRequest};
use crate::data::Buffer;
use crate::error::{SyncError, SyncResult};
use listener::ListenerRegistry;
use parking_lot::Mutex;
use poller::PollerSlot;
use state::BufferState;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// State shared between the experiment handle, its poller and its command tasks.
pub(crate) struct Shared {
    connection: Connection,
    state: Mutex<BufferState>,
    listeners: ListenerRegistry,
    poller: Mutex<PollerSlot>,
    failures: broadcast::Sender<FailureReport>,
    update_rate: Duration,
    runtime: Handle,
    root_token: CancellationToken,
}

impl Shared {
    /// Merge one poll and notify listeners with the incremental view.
    ///
    /// Cursors only move when somebody is listening.
    pub(crate) fn merge_and_notify(&self, buffers: Vec<Buffer>) {
        let (new_data, full_update) = {
            let mut state = self.state.lock();
            state.merge(buffers);
            if self.listeners.is_empty() {
                return;
            }
            (state.new_data(), state.is_full_update())
        };
        self.listeners.notify(&new_data, full_update);
    }

    fn shutdown(&self) {
        self.root_token.cancel();
        self.stop_polling();
    }
}

/// Local mirror of one remote experiment.
///
/// Must be created inside a Tokio runtime; the poller and detached commands are spawned on
/// that runtime, so the methods themselves may be called from any thread. Dropping the
/// experiment shuts it down.
pub struct Experiment {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Experiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Experiment")
            .field("buffers", &self.buffer_names())
            .field("continuous_buffer", &self.continuous_buffer())
            .field("update_rate", &self.shared.update_rate)
            .field("polling", &self.is_polling())
            .finish()
    }
}

impl Experiment {
    /// Create an experiment for `buffer_names`.
    ///
    /// `continuous_index` names the monotonic reference buffer (usually `time`) by its
    /// position in `buffer_names`; without one every poll is a full update. Nothing is
    /// polled until [`start_experiment`](Self::start_experiment) or
    /// [`restart_polling`](Self::restart_polling).
    pub fn new<I, S>(
        connection: Connection,
        buffer_names: I,
        continuous_index: Option<usize>,
        update_rate: Duration,
    ) -> SyncResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = buffer_names.into_iter().map(Into::into).collect();
        validate_layout(&names, continuous_index, update_rate)?;

        let runtime = Handle::try_current().map_err(|e| {
            SyncError::Runtime(format!("an experiment must be created inside a Tokio runtime: {e}"))
        })?;
        let (failures, _) = broadcast::channel(report::FAILURE_CHANNEL_CAPACITY);

        info!(
            buffers = ?names,
            continuous = ?continuous_index.and_then(|i| names.get(i)),
            ?update_rate,
            "Created experiment"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                connection,
                state: Mutex::new(BufferState::new(&names, continuous_index)),
                listeners: ListenerRegistry::default(),
                poller: Mutex::new(PollerSlot::default()),
                failures,
                update_rate,
                runtime,
                root_token: CancellationToken::new(),
            }),
        })
    }

    /// Create an experiment from the `[experiment]` configuration section.
    pub fn from_settings(connection: Connection, settings: &ExperimentSettings) -> SyncResult<Self> {
        let continuous_index = match &settings.continuous_buffer {
            Some(name) => Some(settings.continuous_index().ok_or_else(|| {
                SyncError::Configuration(format!(
                    "continuous buffer '{name}' is not one of the experiment buffers"
                ))
            })?),
            None => None,
        };

        Self::new(
            connection,
            settings.buffers.iter().cloned(),
            continuous_index,
            settings.update_rate(),
        )
    }

    // =========================================================================
    // Layout
    // =========================================================================

    /// Registered buffer names, in registration (and request) order.
    pub fn buffer_names(&self) -> Vec<String> {
        self.shared.state.lock().names()
    }

    /// Name of the continuous buffer, if one is configured.
    pub fn continuous_buffer(&self) -> Option<String> {
        let state = self.shared.state.lock();
        state
            .continuous_index()
            .map(|index| state.names()[index].clone())
    }

    /// `true` if polls replace buffers instead of appending to them.
    pub fn is_full_update(&self) -> bool {
        self.shared.state.lock().is_full_update()
    }

    /// Delay between two polls.
    pub fn update_rate(&self) -> Duration {
        self.shared.update_rate
    }

    /// Last value of the continuous buffer received from the device.
    pub fn last_continuous_value(&self) -> Option<f64> {
        self.shared.state.lock().last_continuous_value()
    }

    /// The request the next poll would send.
    pub fn request_for_new_data(&self) -> SyncResult<DataRequest> {
        self.shared.state.lock().request_for_new_data()
    }

    // =========================================================================
    // Polling lifecycle
    // =========================================================================

    /// Stop the running poller, if any, and start a new one.
    pub fn restart_polling(&self) {
        self.shared.restart_polling();
    }

    /// Stop polling. Received data stays available. Returns `false` if nothing was polling.
    pub fn stop_polling(&self) -> bool {
        self.shared.stop_polling()
    }

    /// `true` while a poller is running.
    pub fn is_polling(&self) -> bool {
        self.shared.is_polling()
    }

    /// Stop polling and cancel every pending command. Nothing can be started afterwards.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    /// Receiver for poller and fire-and-forget command failures.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<FailureReport> {
        self.shared.failures.subscribe()
    }

    // =========================================================================
    // Remote commands
    // =========================================================================

    /// Start the remote experiment, then (re)start polling.
    ///
    /// With `wait` the call returns the device's answer. Without it the command runs on a
    /// detached task and failures only show up on [`subscribe_failures`](Self::subscribe_failures).
    pub async fn start_experiment(&self, wait: bool) -> SyncResult<()> {
        self.command(CommandKind::Start, wait).await
    }

    /// Stop the remote experiment. Polling stops even if the device call fails.
    pub async fn stop_experiment(&self, wait: bool) -> SyncResult<()> {
        self.command(CommandKind::Stop, wait).await
    }

    /// Delete the remote experiment's data. This also halts the remote experiment, so
    /// polling always stops afterwards.
    pub async fn clear_experiment_data(&self, wait: bool) -> SyncResult<()> {
        self.command(CommandKind::Clear, wait).await
    }

    /// Fire-and-forget [`start_experiment`](Self::start_experiment) returning its task.
    pub fn spawn_start_experiment(&self) -> CommandTask {
        self.shared.spawn_command(CommandKind::Start)
    }

    /// Fire-and-forget [`stop_experiment`](Self::stop_experiment) returning its task.
    pub fn spawn_stop_experiment(&self) -> CommandTask {
        self.shared.spawn_command(CommandKind::Stop)
    }

    /// Fire-and-forget [`clear_experiment_data`](Self::clear_experiment_data) returning its task.
    pub fn spawn_clear_experiment_data(&self) -> CommandTask {
        self.shared.spawn_command(CommandKind::Clear)
    }

    /// Write `value` into the remote input buffer `buffer_name`.
    pub async fn set_experiment_buffer(&self, buffer_name: &str, value: f64) -> SyncResult<()> {
        self.shared
            .connection
            .set_buffer_value(buffer_name, value)
            .await
    }

    /// Trigger the remote experiment element `element_id`.
    pub async fn trigger_experiment_element(&self, element_id: &str) -> SyncResult<()> {
        self.shared.connection.trigger_element(element_id).await
    }

    async fn command(&self, kind: CommandKind, wait: bool) -> SyncResult<()> {
        if wait {
            let token = self.shared.root_token.child_token();
            self.shared.run_command(kind, &token).await
        } else {
            drop(self.shared.spawn_command(kind));
            Ok(())
        }
    }

    // =========================================================================
    // Data access
    // =========================================================================

    /// Copy of every buffer. Marks all data as read.
    pub fn all_data(&self) -> Vec<Buffer> {
        self.shared.state.lock().all_data()
    }

    /// Copy of one buffer. Marks its data as read.
    pub fn buffer_data<'a>(&self, buffer: impl Into<BufferRef<'a>>) -> SyncResult<Buffer> {
        let mut state = self.shared.state.lock();
        let index = state.index_of(buffer.into())?;
        Ok(state.buffer_data(index))
    }

    /// Per buffer, the samples not yet returned by an incremental read.
    ///
    /// The most recent sample of each buffer is returned again by the next call.
    pub fn new_data(&self) -> Vec<Buffer> {
        self.shared.state.lock().new_data()
    }

    /// Incremental read of one buffer; see [`new_data`](Self::new_data).
    pub fn new_buffer_data<'a>(&self, buffer: impl Into<BufferRef<'a>>) -> SyncResult<Buffer> {
        let mut state = self.shared.state.lock();
        let index = state.index_of(buffer.into())?;
        Ok(state.new_buffer_data(index))
    }

    /// Read cursor of one buffer (`None` until something was read).
    pub fn last_read<'a>(&self, buffer: impl Into<BufferRef<'a>>) -> SyncResult<Option<usize>> {
        let state = self.shared.state.lock();
        let index = state.index_of(buffer.into())?;
        Ok(state.cursor(index))
    }

    /// Empty one local buffer and reset its cursor. The device is not contacted.
    pub fn clear_buffer<'a>(&self, buffer: impl Into<BufferRef<'a>>) -> SyncResult<()> {
        let mut state = self.shared.state.lock();
        let index = state.index_of(buffer.into())?;
        state.clear_buffer(index);
        Ok(())
    }

    /// Empty every local buffer and reset all cursors. The device is not contacted.
    pub fn clear_all_buffers(&self) {
        self.shared.state.lock().clear_all();
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    /// Register a listener for merged polls.
    pub fn add_data_listener<L>(&self, listener: L) -> ListenerId
    where
        L: DataListener + 'static,
    {
        self.shared.listeners.add(Arc::new(listener))
    }

    /// Register a listener that is shared with other owners.
    pub fn add_shared_data_listener(&self, listener: Arc<dyn DataListener>) -> ListenerId {
        self.shared.listeners.add(listener)
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn remove_data_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.len()
    }

    #[cfg(test)]
    pub(crate) fn merge_new_data(&self, buffers: Vec<Buffer>) {
        self.shared.merge_and_notify(buffers);
    }
}

impl Drop for Experiment {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

fn validate_layout(
    names: &[String],
    continuous_index: Option<usize>,
    update_rate: Duration,
) -> SyncResult<()> {
    if names.is_empty() {
        return Err(SyncError::Configuration(
            "Buffer names are empty. The names of the buffers are needed to get the data from the experiment."
                .to_string(),
        ));
    }
    if update_rate.is_zero() {
        return Err(SyncError::Configuration(
            "The update rate must be greater than zero".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for name in names {
        if name.is_empty() {
            return Err(SyncError::Configuration("Buffer names must not be empty".to_string()));
        }
        if !seen.insert(name.as_str()) {
            return Err(SyncError::Configuration(format!("Duplicate buffer name: {name}")));
        }
    }

    if let Some(index) = continuous_index {
        if index >= names.len() {
            return Err(SyncError::Configuration(format!(
                "Continuous buffer index {index} is out of range ({} buffers)",
                names.len()
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Transport;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OfflineTransport;

    #[async_trait]
    impl Transport for OfflineTransport {
        async fn get(&self, _path_and_query: &str) -> SyncResult<String> {
            Err(SyncError::connection("offline"))
        }
    }

    fn experiment(names: &[&str], continuous: Option<usize>) -> Experiment {
        Experiment::new(
            Connection::new(Arc::new(OfflineTransport)),
            names.iter().copied(),
            continuous,
            Duration::from_millis(50),
        )
        .unwrap()
    }

    fn buffer(name: &str, data: &[f64]) -> Vec<Buffer> {
        vec![Buffer::new(name, data.to_vec())]
    }

    #[tokio::test]
    async fn test_layout() {
        let experiment = experiment(&["time", "buffer_x"], Some(0));

        assert_eq!(experiment.all_data().len(), 2);
        assert_eq!(experiment.buffer_names(), vec!["time", "buffer_x"]);
        assert_eq!(experiment.continuous_buffer().as_deref(), Some("time"));
        assert!(!experiment.is_full_update());
        assert!(!experiment.is_polling());
    }

    #[tokio::test]
    async fn test_invalid_layouts() {
        let connection = || Connection::new(Arc::new(OfflineTransport));
        let rate = Duration::from_millis(10);

        assert!(Experiment::new(connection(), Vec::<String>::new(), None, rate).is_err());
        assert!(Experiment::new(connection(), ["x"], None, Duration::ZERO).is_err());
        assert!(Experiment::new(connection(), ["x", "x"], None, rate).is_err());
        assert!(Experiment::new(connection(), ["x", ""], None, rate).is_err());
        assert!(matches!(
            Experiment::new(connection(), ["x"], Some(1), rate),
            Err(SyncError::Configuration(_))
        ));
    }

    #[test]
    fn test_requires_runtime() {
        let result = Experiment::new(
            Connection::new(Arc::new(OfflineTransport)),
            ["x"],
            None,
            Duration::from_millis(10),
        );
        assert!(matches!(result, Err(SyncError::Runtime(_))));
    }

    #[tokio::test]
    async fn test_from_settings_resolves_continuous_name() {
        let settings = ExperimentSettings {
            buffers: vec!["accX".into(), "time".into()],
            continuous_buffer: Some("time".into()),
            update_rate_ms: 100,
        };
        let experiment =
            Experiment::from_settings(Connection::new(Arc::new(OfflineTransport)), &settings)
                .unwrap();

        assert_eq!(experiment.continuous_buffer().as_deref(), Some("time"));
        assert_eq!(experiment.update_rate(), Duration::from_millis(100));

        let missing = ExperimentSettings {
            continuous_buffer: Some("clock".into()),
            ..settings
        };
        assert!(Experiment::from_settings(
            Connection::new(Arc::new(OfflineTransport)),
            &missing
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_get_buffer() {
        let experiment = experiment(&["time", "buffer_x"], None);
        experiment.merge_new_data(buffer("time", &[1.0, 2.0, 3.0]));

        let time = experiment.buffer_data("time").unwrap();
        assert_eq!(time.size(), 3);
        assert_eq!(time.data(), &[1.0, 2.0, 3.0]);
        assert_eq!(experiment.buffer_data(0usize).unwrap(), time);
    }

    #[tokio::test]
    async fn test_get_buffer_wrong_name() {
        let experiment = experiment(&["time", "buffer_x"], None);

        assert!(matches!(
            experiment.buffer_data("non_existing_buffer_name"),
            Err(SyncError::BufferNotFound(_))
        ));
        assert!(experiment.new_buffer_data("missing").is_err());
        assert!(experiment.clear_buffer("missing").is_err());
        assert!(experiment.buffer_data(7usize).is_err());
    }

    #[tokio::test]
    async fn test_append_with_continuous_buffer() {
        let experiment = experiment(&["time", "buffer_x"], Some(0));
        experiment.merge_new_data(buffer("buffer_x", &[42.0, 43.0, 44.0, 45.0]));
        let complete = experiment.buffer_data("buffer_x").unwrap();
        assert_eq!(complete.size(), 4);

        experiment.merge_new_data(buffer("buffer_x", &[1.0, 2.0, 3.0]));

        let new_data = experiment.new_buffer_data("buffer_x").unwrap();
        assert_eq!(new_data.data(), &[1.0, 2.0, 3.0]);
        assert_eq!(
            experiment.buffer_data("buffer_x").unwrap().data(),
            &[42.0, 43.0, 44.0, 45.0, 1.0, 2.0, 3.0]
        );
        // copies handed out earlier are unaffected
        assert_eq!(complete.size(), 4);
    }

    #[tokio::test]
    async fn test_replace_without_continuous_buffer() {
        let experiment = experiment(&["buffer_x"], None);
        experiment.merge_new_data(buffer("buffer_x", &[42.0, 43.0, 44.0, 45.0]));
        experiment.merge_new_data(buffer("buffer_x", &[1.0, 2.0, 3.0]));

        let x = experiment.buffer_data("buffer_x").unwrap();
        assert_eq!(x.data(), &[1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_clear_buffers() {
        let experiment = experiment(&["time", "buffer_x"], Some(0));
        experiment.merge_new_data(buffer("buffer_x", &[42.0, 43.0, 44.0, 45.0]));

        experiment.clear_all_buffers();
        assert_eq!(experiment.last_read("buffer_x").unwrap(), None);

        experiment.merge_new_data(buffer("buffer_x", &[1.0, 2.0, 3.0]));
        assert_eq!(
            experiment.new_buffer_data("buffer_x").unwrap().data(),
            &[1.0, 2.0, 3.0]
        );
    }

    #[tokio::test]
    async fn test_clear_single_buffer() {
        let experiment = experiment(&["time", "buffer_x"], Some(0));
        experiment.merge_new_data(vec![
            Buffer::new("time", vec![1.0]),
            Buffer::new("buffer_x", vec![5.0]),
        ]);

        experiment.clear_buffer("buffer_x").unwrap();

        assert!(experiment.buffer_data("buffer_x").unwrap().is_empty());
        assert_eq!(experiment.buffer_data("time").unwrap().data(), &[1.0]);
    }

    #[tokio::test]
    async fn test_listener_receives_new_data() {
        let experiment = experiment(&["time", "buffer_x"], Some(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));

        {
            let calls = calls.clone();
            let received = received.clone();
            experiment.add_data_listener(move |new_data: &[Buffer], full_update: bool| {
                calls.fetch_add(1, Ordering::SeqCst);
                assert!(!full_update);
                received.lock().push(new_data.to_vec());
            });
        }

        experiment.merge_new_data(buffer("buffer_x", &[42.0, 43.0, 44.0, 45.0]));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let received = received.lock();
        assert_eq!(received[0].len(), 2);
        assert!(received[0][0].is_empty());
        assert_eq!(received[0][1].data(), &[42.0, 43.0, 44.0, 45.0]);
    }

    #[tokio::test]
    async fn test_listener_full_update_flag() {
        let experiment = experiment(&["buffer_x"], None);
        let flags = Arc::new(Mutex::new(Vec::new()));
        {
            let flags = flags.clone();
            experiment.add_data_listener(move |_: &[Buffer], full_update: bool| {
                flags.lock().push(full_update);
            });
        }

        experiment.merge_new_data(buffer("buffer_x", &[1.0]));
        assert_eq!(flags.lock().as_slice(), [true]);
    }

    #[tokio::test]
    async fn test_add_and_remove_listeners() {
        let experiment = experiment(&["time", "buffer_x"], Some(0));
        let calls = Arc::new(AtomicUsize::new(0));

        let id = {
            let calls = calls.clone();
            experiment.add_data_listener(move |_: &[Buffer], _: bool| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };

        experiment.merge_new_data(buffer("buffer_x", &[1.0, 2.0, 3.0]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(experiment.remove_data_listener(id));
        assert_eq!(experiment.listener_count(), 0);

        experiment.merge_new_data(buffer("buffer_x", &[4.0]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cursors_untouched_without_listeners() {
        let experiment = experiment(&["time", "buffer_x"], Some(0));
        experiment.merge_new_data(buffer("buffer_x", &[1.0, 2.0]));

        assert_eq!(experiment.last_read("buffer_x").unwrap(), None);
        assert_eq!(
            experiment.new_buffer_data("buffer_x").unwrap().data(),
            &[1.0, 2.0]
        );
    }

    #[tokio::test]
    async fn test_listener_may_read_experiment() {
        let experiment = Arc::new(experiment(&["time", "buffer_x"], Some(0)));
        let sizes = Arc::new(Mutex::new(Vec::new()));
        {
            let weak = Arc::downgrade(&experiment);
            let sizes = sizes.clone();
            experiment.add_data_listener(move |_: &[Buffer], _: bool| {
                if let Some(experiment) = weak.upgrade() {
                    let x = experiment.buffer_data("buffer_x").unwrap();
                    sizes.lock().push(x.size());
                }
            });
        }

        experiment.merge_new_data(buffer("buffer_x", &[1.0, 2.0]));
        assert_eq!(sizes.lock().as_slice(), [2]);
    }
}
