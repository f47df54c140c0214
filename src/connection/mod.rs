//! Connection to a phyphox device in remote-access mode.
//!
//! [`Connection`] turns domain actions (fetch these buffers, start the experiment, ...) into
//! request paths for a [`Transport`] and turns the decoded payloads back into domain values.
//! It holds no data itself; the mirrored buffers live in
//! [`Experiment`](crate::experiment::Experiment).
//!
//! # Wire protocol
//!
//! - `GET /get?<buffer>=<offset>&...` returns buffer data (see [`request`]).
//! - `GET /control?cmd=start|stop|clear` controls the remote experiment.
//! - `GET /control?cmd=set&buffer=<name>&value=<value>` writes a value into an input buffer.
//! - `GET /control?cmd=trigger&element=<id>` triggers an experiment element.
//!
//! Query components are percent-encoded, so spaces in buffer names and the `|` of
//! buffer-relative offsets reach the device as `%20` and `%7C`.

pub mod payload;
pub mod request;
pub mod transport;

pub use request::{DataRequest, OffsetSpec, RequestBuilder, FULL_UPDATE};
pub use transport::{HttpTransport, Transport};

use crate::data::Buffer;
use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Address of the device's remote-access web server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Hostname or IP address of the phone
    pub host: String,
    /// Port of the remote-access server
    #[serde(default = "default_port")]
    pub port: u16,
    /// Per-request timeout in milliseconds (none if unset)
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_port() -> u16 {
    8080
}

impl ConnectionSettings {
    /// Settings for `host:port` without a request timeout.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout_ms: None,
        }
    }

    /// `http://host:port`
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Request timeout, if configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Control commands understood by the device's `/control` endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    /// Start measuring
    Start,
    /// Stop measuring
    Stop,
    /// Delete all recorded data (also stops the experiment)
    Clear,
    /// Write `value` into the input buffer `buffer`
    Set {
        /// Target buffer name
        buffer: String,
        /// Value to write
        value: f64,
    },
    /// Trigger the experiment element with the given id
    Trigger {
        /// Element id
        element: String,
    },
}

impl ControlCommand {
    /// Value of the `cmd` query parameter.
    pub fn name(&self) -> &'static str {
        match self {
            ControlCommand::Start => "start",
            ControlCommand::Stop => "stop",
            ControlCommand::Clear => "clear",
            ControlCommand::Set { .. } => "set",
            ControlCommand::Trigger { .. } => "trigger",
        }
    }

    /// Escaped `/control?...` path for this command.
    pub fn path(&self) -> String {
        match self {
            ControlCommand::Start | ControlCommand::Stop | ControlCommand::Clear => {
                format!("/control?cmd={}", self.name())
            }
            ControlCommand::Set { buffer, value } => format!(
                "/control?cmd=set&buffer={}&value={}",
                encode_component(buffer),
                encode_component(&request::format_offset(*value))
            ),
            ControlCommand::Trigger { element } => format!(
                "/control?cmd=trigger&element={}",
                encode_component(element)
            ),
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Percent-encode one query component.
pub fn encode_component(raw: &str) -> String {
    urlencoding::encode(raw).into_owned()
}

/// Escaped `/get?...` path for a data request.
pub fn data_path(request: &DataRequest) -> String {
    let query = request
        .entries()
        .map(|(buffer, offset)| format!("{}={}", encode_component(buffer), encode_component(offset)))
        .collect::<Vec<_>>()
        .join("&");
    format!("/get?{query}")
}

/// Domain-level access to one remote device.
#[derive(Clone)]
pub struct Connection {
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl Connection {
    /// Connection over an arbitrary transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// HTTP connection for the given settings.
    pub fn http(settings: &ConnectionSettings) -> SyncResult<Self> {
        let transport = HttpTransport::new(settings.base_url(), settings.timeout())?;
        info!(url = %transport.base_url(), "Created HTTP connection");
        Ok(Self::new(Arc::new(transport)))
    }

    /// Fetch the data described by `request`, one buffer per payload entry.
    pub async fn fetch_data(&self, request: &DataRequest) -> SyncResult<Vec<Buffer>> {
        let body = self.transport.get(&data_path(request)).await?;
        let buffers = payload::decode_buffers(&body)?;
        debug!(
            request = %request,
            buffers = buffers.len(),
            samples = buffers.iter().map(Buffer::size).sum::<usize>(),
            "Fetched data"
        );
        Ok(buffers)
    }

    /// Start the remote experiment.
    pub async fn start_experiment(&self) -> SyncResult<()> {
        self.send_command(&ControlCommand::Start).await
    }

    /// Stop the remote experiment.
    pub async fn stop_experiment(&self) -> SyncResult<()> {
        self.send_command(&ControlCommand::Stop).await
    }

    /// Delete the remote experiment's recorded data.
    pub async fn clear_data(&self) -> SyncResult<()> {
        self.send_command(&ControlCommand::Clear).await
    }

    /// Write `value` into the remote input buffer `buffer`.
    pub async fn set_buffer_value(&self, buffer: &str, value: f64) -> SyncResult<()> {
        self.send_command(&ControlCommand::Set {
            buffer: buffer.to_string(),
            value,
        })
        .await
    }

    /// Trigger the remote experiment element `element`.
    pub async fn trigger_element(&self, element: &str) -> SyncResult<()> {
        self.send_command(&ControlCommand::Trigger {
            element: element.to_string(),
        })
        .await
    }

    /// Send a control command and require `result: true`.
    pub async fn send_command(&self, command: &ControlCommand) -> SyncResult<()> {
        let body = self.transport.get(&command.path()).await?;
        if payload::decode_control_result(&body)? {
            debug!(command = %command, "Command accepted");
            Ok(())
        } else {
            Err(SyncError::RemoteRejection {
                command: command.name().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct ScriptedTransport {
        requests: Mutex<Vec<String>>,
        responses: Mutex<VecDeque<SyncResult<String>>>,
    }

    impl ScriptedTransport {
        fn respond(&self, body: &str) {
            self.responses.lock().push_back(Ok(body.to_string()));
        }

        fn fail(&self, message: &str) {
            self.responses
                .lock()
                .push_back(Err(SyncError::connection(message)));
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, path_and_query: &str) -> SyncResult<String> {
            self.requests.lock().push(path_and_query.to_string());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(SyncError::connection("no scripted response")))
        }
    }

    fn connection() -> (Arc<ScriptedTransport>, Connection) {
        let transport = Arc::new(ScriptedTransport::default());
        (transport.clone(), Connection::new(transport))
    }

    #[test]
    fn test_data_path_escapes_space_and_bar() {
        let mut builder = RequestBuilder::new();
        builder
            .set_buffer(0, "time")
            .set_buffer(1, "acc x")
            .set_offset(0, 1.5)
            .set_offset_to_buffer(1, 0, 1.5);
        let request = builder.build().unwrap();

        assert_eq!(data_path(&request), "/get?time=1.5&acc%20x=1.5%7Ctime");
    }

    #[test]
    fn test_control_paths() {
        assert_eq!(ControlCommand::Start.path(), "/control?cmd=start");
        assert_eq!(ControlCommand::Stop.path(), "/control?cmd=stop");
        assert_eq!(ControlCommand::Clear.path(), "/control?cmd=clear");
        assert_eq!(
            ControlCommand::Set {
                buffer: "set point".into(),
                value: 2.5
            }
            .path(),
            "/control?cmd=set&buffer=set%20point&value=2.5"
        );
        assert_eq!(
            ControlCommand::Trigger {
                element: "reset".into()
            }
            .path(),
            "/control?cmd=trigger&element=reset"
        );
    }

    #[test]
    fn test_settings_base_url() {
        let settings = ConnectionSettings::new("192.168.0.42", 8080);
        assert_eq!(settings.base_url(), "http://192.168.0.42:8080");
        assert_eq!(settings.timeout(), None);
    }

    #[tokio::test]
    async fn test_fetch_data() {
        let (transport, connection) = connection();
        transport.respond(r#"{"buffer": {"x": {"buffer": [42, 43]}}}"#);

        let request = DataRequest::new(vec!["x".into()], vec![None]).unwrap();
        let buffers = connection.fetch_data(&request).await.unwrap();

        assert_eq!(buffers, vec![Buffer::new("x", vec![42.0, 43.0])]);
        assert_eq!(transport.requests.lock().as_slice(), ["/get?x=full"]);
    }

    #[tokio::test]
    async fn test_fetch_data_transport_failure() {
        let (transport, connection) = connection();
        transport.fail("connection refused");

        let request = DataRequest::new(vec!["x".into()], vec![None]).unwrap();
        let err = connection.fetch_data(&request).await.unwrap_err();

        assert!(matches!(err, SyncError::ConnectionFailure { .. }));
    }

    #[tokio::test]
    async fn test_command_accepted() {
        let (transport, connection) = connection();
        transport.respond(r#"{"result"=true}"#);

        connection.start_experiment().await.unwrap();
        assert_eq!(transport.requests.lock().as_slice(), ["/control?cmd=start"]);
    }

    #[tokio::test]
    async fn test_command_rejected() {
        let (transport, connection) = connection();
        transport.respond(r#"{"result"=false}"#);

        let err = connection.clear_data().await.unwrap_err();
        assert!(matches!(err, SyncError::RemoteRejection { ref command } if command == "clear"));
    }

    #[tokio::test]
    async fn test_command_malformed_payload() {
        let (transport, connection) = connection();
        transport.respond("Internal error");

        let err = connection.trigger_element("btn").await.unwrap_err();
        assert!(matches!(err, SyncError::ConnectionFailure { .. }));
    }

    #[tokio::test]
    async fn test_set_buffer_value_path() {
        let (transport, connection) = connection();
        transport.respond(r#"{"result"=true}"#);

        connection.set_buffer_value("freq", 440.0).await.unwrap();
        assert_eq!(
            transport.requests.lock().as_slice(),
            ["/control?cmd=set&buffer=freq&value=440"]
        );
    }
}
