//! Custom error types for the synchronization engine.
//!
//! This module defines the primary error type, `SyncError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! everything that can go wrong between the remote device and the local buffer mirror.
//!
//! ## Error Hierarchy
//!
//! - **`ConnectionFailure`**: The transport failed, the device answered with a non-200
//!   status, or a payload could not be decoded. The underlying `reqwest` or `serde_json`
//!   error is kept as the source when there is one.
//! - **`RemoteRejection`**: A control payload decoded fine but reported `result: false`.
//!   The device does not say why, so neither do we.
//! - **`BufferNotFound`** / **`BufferIndexOutOfRange`**: A read or clear accessor was
//!   called with a buffer that is not registered in the experiment.
//! - **`RequestShapeMismatch`** / **`MissingBufferName`**: A data request could not be
//!   assembled. These indicate a defect in the caller, not a runtime condition.
//! - **`Config`** / **`Configuration`**: Loading or validating [`crate::config::SyncConfig`].
//! - **`Runtime`**: An experiment was created without a Tokio runtime to run its poller on.
//! - **`Cancelled`**: A command was cancelled (or the experiment shut down) before the device
//!   answered.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Everything that can go wrong in the crate.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Transport error, non-200 status or undecodable payload.
    #[error("Connection failure: {message}")]
    ConnectionFailure {
        /// What went wrong
        message: String,
        /// Underlying transport or decode error, if any
        #[source]
        source: Option<BoxedSource>,
    },

    /// The device answered a control command with `result: false`.
    #[error("Remote device rejected command '{command}'")]
    RemoteRejection {
        /// Rejected command name
        command: String,
    },

    /// No buffer with this name is registered.
    #[error("A buffer with the name '{0}' doesn't exist")]
    BufferNotFound(String),

    /// Buffer index past the registered buffers.
    #[error("Buffer index {index} is out of range ({len} buffers registered)")]
    BufferIndexOutOfRange {
        /// Requested index
        index: usize,
        /// Number of registered buffers
        len: usize,
    },

    /// Buffer and offset lists of a data request differ in length.
    #[error("The number of buffers ({buffers}) and the number of offsets ({offsets}) have to be equal")]
    RequestShapeMismatch {
        /// Number of buffer names
        buffers: usize,
        /// Number of offsets
        offsets: usize,
    },

    /// A request index carries or is referenced by an offset but has no buffer name.
    #[error("No buffer name was set for request index {index}")]
    MissingBufferName {
        /// Index without a name
        index: usize,
    },

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration or experiment layout is invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// No Tokio runtime was available, or a task failed to run.
    #[error("Tokio runtime error: {0}")]
    Runtime(String),

    /// Cancelled before the device answered.
    #[error("Operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Connection failure without an underlying error value.
    pub fn connection(message: impl Into<String>) -> Self {
        SyncError::ConnectionFailure {
            message: message.into(),
            source: None,
        }
    }

    /// Connection failure wrapping the error that caused it.
    pub fn connection_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SyncError::ConnectionFailure {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// `true` for failures on the device side of the connection (transport, status,
    /// payload or an explicit rejection).
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailure { .. } | SyncError::RemoteRejection { .. }
        )
    }
}

impl From<figment::Error> for SyncError {
    fn from(value: figment::Error) -> Self {
        SyncError::Config(Box::new(value))
    }
}
