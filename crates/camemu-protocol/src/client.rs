use std::path::Path;
use std::time::{Duration, Instant};

use camemu_transport::{IpcStream, UnixEndpoint};
use camemu_wire::{FrameReader, FrameWriter, WireConfig, WireError};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ProtocolError, Result};
use crate::message::{values, ControlMessage, MessageIdGenerator, Params};

/// How long a request waits for its reply unless told otherwise.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(1000);

/// Request/reply client for the control channel.
///
/// Every request gets a fresh id; replies carrying any other id (late
/// answers to requests that already timed out) are discarded.
pub struct ControlClient {
    reader: FrameReader<IpcStream>,
    writer: FrameWriter<IpcStream>,
    ids: MessageIdGenerator,
    timeout: Duration,
}

impl ControlClient {
    /// Connect to a control endpoint.
    pub fn connect(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let stream = UnixEndpoint::connect(path)?;
        Self::from_stream(stream, timeout)
    }

    /// Wrap an already-connected stream.
    pub fn from_stream(stream: IpcStream, timeout: Duration) -> Result<Self> {
        let reader_stream = stream.try_clone()?;
        let config = WireConfig {
            read_timeout: Some(timeout),
            write_timeout: Some(timeout),
            ..WireConfig::default()
        };
        let reader = FrameReader::with_config_ipc(reader_stream, config.clone())?;
        let writer = FrameWriter::with_config_ipc(stream, config)?;
        Ok(Self {
            reader,
            writer,
            ids: MessageIdGenerator::new(),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send a `cmd` and wait for the `ack`/`nack` with the same id.
    pub fn request(&mut self, value: &str, params: Params) -> Result<ControlMessage> {
        let id = self.ids.next_id();
        let mut request = ControlMessage::command(value, id);
        request.params = params;

        debug!(id, value, "sending control request");
        self.writer.send(&request.encode()?).map_err(map_wire)?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ProtocolError::Timeout(self.timeout));
            }
            self.reader
                .set_read_timeout(Some(remaining))
                .map_err(map_wire)?;

            let payload = match self.reader.read_frame() {
                Ok(payload) => payload,
                Err(WireError::Timeout) => return Err(ProtocolError::Timeout(self.timeout)),
                Err(err) => return Err(map_wire(err)),
            };

            let reply = match ControlMessage::decode(&payload) {
                Ok(reply) => reply,
                Err(err) => {
                    warn!(error = %err, "ignoring undecodable reply");
                    continue;
                }
            };

            if reply.kind.is_reply() && reply.id == Some(id) {
                return Ok(reply);
            }
            debug!(
                expected = id,
                got = ?reply.id,
                kind = reply.kind.as_str(),
                "discarding stale reply"
            );
        }
    }

    /// Send a lifecycle verb in the `configure` + `params.command` form.
    pub fn command(&mut self, verb: &str) -> Result<ControlMessage> {
        let mut params = Params::new();
        params.insert("command".to_string(), Value::from(verb));
        self.request(values::CONFIGURE, params)
    }

    /// Send a lifecycle verb as the message value itself.
    pub fn lifecycle(&mut self, verb: &str) -> Result<ControlMessage> {
        self.request(verb, Params::new())
    }

    pub fn status(&mut self) -> Result<ControlMessage> {
        self.request(values::STATUS, Params::new())
    }

    pub fn request_configuration(&mut self) -> Result<ControlMessage> {
        self.request(values::REQUEST_CONFIGURATION, Params::new())
    }

    /// Send a `configure` request with arbitrary parameters.
    pub fn configure(&mut self, params: Params) -> Result<ControlMessage> {
        self.request(values::CONFIGURE, params)
    }
}

impl std::fmt::Debug for ControlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlClient")
            .field("stream", self.writer.get_ref())
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn map_wire(err: WireError) -> ProtocolError {
    match err {
        WireError::ConnectionClosed => ProtocolError::Disconnected,
        other => ProtocolError::Wire(other),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::thread;

    use super::*;
    use crate::message::MessageKind;

    fn server_side(stream: IpcStream) -> (FrameReader<IpcStream>, FrameWriter<IpcStream>) {
        let reader_stream = stream.try_clone().expect("stream should clone");
        (FrameReader::new(reader_stream), FrameWriter::new(stream))
    }

    #[test]
    fn request_returns_matching_ack() {
        let (client_end, server_end) = IpcStream::pair().expect("pair should open");
        let server = thread::spawn(move || {
            let (mut reader, mut writer) = server_side(server_end);
            let payload = reader.read_frame().expect("server should read request");
            let request = ControlMessage::decode(&payload).expect("request should decode");
            assert_eq!(request.value, "status");
            let reply = request.reply(true).with_param("status", "ok");
            writer
                .send(&reply.encode().expect("reply should encode"))
                .expect("server should reply");
        });

        let mut client =
            ControlClient::from_stream(client_end, DEFAULT_REQUEST_TIMEOUT).expect("client");
        let reply = client.status().expect("status should succeed");
        assert_eq!(reply.kind, MessageKind::Ack);
        assert_eq!(reply.id, Some(1));
        assert_eq!(reply.param_str("status"), Some("ok"));
        server.join().expect("server thread should finish");
    }

    #[test]
    fn stale_replies_are_discarded() {
        let (client_end, server_end) = IpcStream::pair().expect("pair should open");
        let server = thread::spawn(move || {
            let (mut reader, mut writer) = server_side(server_end);
            let payload = reader.read_frame().expect("server should read request");
            let request = ControlMessage::decode(&payload).expect("request should decode");

            let mut stale = request.reply(false);
            stale.id = Some(9999);
            writer
                .send(&stale.encode().expect("stale should encode"))
                .expect("send stale");
            writer
                .send(&request.reply(true).encode().expect("reply should encode"))
                .expect("send reply");
        });

        let mut client =
            ControlClient::from_stream(client_end, DEFAULT_REQUEST_TIMEOUT).expect("client");
        let reply = client.command("arm").expect("arm should succeed");
        assert_eq!(reply.kind, MessageKind::Ack);
        assert_eq!(reply.value, "configure");
        server.join().expect("server thread should finish");
    }

    #[test]
    fn silent_server_times_out() {
        let (client_end, server_end) = IpcStream::pair().expect("pair should open");
        let mut client =
            ControlClient::from_stream(client_end, Duration::from_millis(80)).expect("client");

        let started = Instant::now();
        let err = client.lifecycle("connect").expect_err("request should time out");
        assert!(matches!(err, ProtocolError::Timeout(_)));
        assert!(started.elapsed() >= Duration::from_millis(80));
        drop(server_end);
    }

    #[test]
    fn closed_server_reports_disconnected() {
        let (client_end, server_end) = IpcStream::pair().expect("pair should open");
        let server = thread::spawn(move || {
            let (mut reader, _writer) = server_side(server_end);
            let _ = reader.read_frame();
        });

        let mut client =
            ControlClient::from_stream(client_end, DEFAULT_REQUEST_TIMEOUT).expect("client");
        let err = client.status().expect_err("request should fail");
        server.join().expect("server thread should finish");
        assert!(matches!(err, ProtocolError::Disconnected));
    }

    #[test]
    fn ids_advance_per_request() {
        let (client_end, server_end) = IpcStream::pair().expect("pair should open");
        let server = thread::spawn(move || {
            let (mut reader, mut writer) = server_side(server_end);
            let mut seen = Vec::new();
            for _ in 0..3 {
                let payload = reader.read_frame().expect("server should read request");
                let request = ControlMessage::decode(&payload).expect("request should decode");
                seen.push(request.id.expect("request should carry an id"));
                writer
                    .send(&request.reply(true).encode().expect("encode"))
                    .expect("reply");
            }
            seen
        });

        let mut client =
            ControlClient::from_stream(client_end, DEFAULT_REQUEST_TIMEOUT).expect("client");
        for _ in 0..3 {
            client.status().expect("status should succeed");
        }
        assert_eq!(server.join().expect("server thread"), vec![1, 2, 3]);
    }
}
