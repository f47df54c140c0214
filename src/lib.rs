//! # phyphox_sync
//!
//! Client library for the remote-access web interface of the phyphox app. It mirrors the
//! buffers of a running experiment into local memory and lets an application start, stop
//! and clear the experiment, write input buffers and trigger experiment elements.
//!
//! ## Crate Structure
//!
//! - **`connection`**: HTTP transport, data request construction and the device's JSON
//!   payloads. See [`connection::Connection`] and [`connection::RequestBuilder`].
//! - **`data`**: The named sample [`data::Buffer`].
//! - **`experiment`**: The synchronization engine: local buffer state, background polling,
//!   listeners, remote commands and the failure channel. See [`experiment::Experiment`].
//! - **`config`**: Figment-based configuration for applications built on the library.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: The crate-wide [`error::SyncError`].
//!
//! The library never reads configuration or installs a subscriber on its own; both are
//! opt-in for the application.

pub mod config;
pub mod connection;
pub mod data;
pub mod error;
pub mod experiment;
pub mod logging;

pub use connection::{Connection, ConnectionSettings, DataRequest, RequestBuilder};
pub use data::Buffer;
pub use error::{SyncError, SyncResult};
pub use experiment::{DataListener, Experiment, FailureReport};
