//! Request dispatch for the control channel.

use std::sync::Arc;
use std::time::Duration;

use camemu_buffer::BufferPool;
use camemu_protocol::{values, ControlMessage, MessageKind, NotificationSink, Params};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::CameraConfig;
use crate::error::{CameraError, Result};
use crate::producer::{AcquisitionCounters, ProductionLoop};
use crate::release::buffer_config_notification;
use crate::state::{CameraState, CameraStateMachine, LifecycleCommand};

/// Name reported in status replies.
pub const CAMERA_NAME: &str = "PCO Camera Emulator";

/// A decoded control request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Status,
    RequestConfiguration,
    Configure(Params),
    Lifecycle(LifecycleCommand),
    Reset,
}

impl Request {
    /// Interpret a `cmd` envelope. Lifecycle verbs are accepted directly or
    /// as `configure` with a `command` parameter.
    pub fn parse(message: &ControlMessage) -> Result<Self> {
        if message.kind != MessageKind::Command {
            return Err(CameraError::UnexpectedKind(message.kind.as_str()));
        }
        match message.value.as_str() {
            values::STATUS => Ok(Request::Status),
            values::REQUEST_CONFIGURATION => Ok(Request::RequestConfiguration),
            values::CONFIGURE => match message.param("command") {
                Some(Value::String(command)) => Self::parse_command(command),
                Some(other) => Err(CameraError::UnknownCommand(other.to_string())),
                None => match message.param("camera") {
                    Some(Value::Object(camera)) => Ok(Request::Configure(camera.clone())),
                    Some(_) => Err(CameraError::InvalidConfig(
                        "camera parameter must be an object".into(),
                    )),
                    None => Err(CameraError::InvalidConfig(
                        "configure needs a camera or command parameter".into(),
                    )),
                },
            },
            other => Self::parse_command(other),
        }
    }

    fn parse_command(raw: &str) -> Result<Self> {
        if raw == values::RESET {
            return Ok(Request::Reset);
        }
        LifecycleCommand::parse(raw)
            .map(Request::Lifecycle)
            .ok_or_else(|| CameraError::UnknownCommand(raw.to_string()))
    }
}

/// Settings that shape replies and the production loop.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub frame_timeout_ms: u64,
    pub enable_packet_logging: bool,
    pub acquire_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            frame_timeout_ms: 10,
            enable_packet_logging: false,
            acquire_timeout: Duration::from_millis(100),
        }
    }
}

/// Owns the camera state, its configuration and the active production loop.
pub struct CameraController {
    machine: CameraStateMachine,
    config: CameraConfig,
    settings: ControllerSettings,
    pool: Arc<BufferPool>,
    sink: Arc<dyn NotificationSink>,
    counters: Arc<AcquisitionCounters>,
    production: Option<ProductionLoop>,
}

impl CameraController {
    pub fn new(
        config: CameraConfig,
        settings: ControllerSettings,
        pool: Arc<BufferPool>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            machine: CameraStateMachine::new(),
            config,
            settings,
            pool,
            sink,
            counters: Arc::new(AcquisitionCounters::new()),
            production: None,
        }
    }

    pub fn state(&self) -> CameraState {
        self.machine.state()
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn counters(&self) -> &Arc<AcquisitionCounters> {
        &self.counters
    }

    /// Handle one request and build its reply. Never fails: every problem
    /// becomes a `nack` carrying an `error` parameter.
    pub fn handle(&mut self, message: &ControlMessage) -> ControlMessage {
        self.reap_finished();

        let (request, outcome) = match Request::parse(message) {
            Ok(request) => {
                let outcome = self.dispatch(&request);
                (Some(request), outcome)
            }
            Err(err) => (None, Err(err)),
        };

        let mut reply = message.reply(outcome.is_ok());
        if let Err(err) = &outcome {
            warn!(request = %message.value, id = ?message.id, error = %err, "request rejected");
            reply.set_param("error", err.to_string());
        }
        match request {
            Some(Request::Status) => self.fill_status(&mut reply),
            Some(Request::RequestConfiguration) => self.fill_configuration(&mut reply),
            _ => {}
        }
        reply
    }

    fn dispatch(&mut self, request: &Request) -> Result<()> {
        match request {
            Request::Status | Request::RequestConfiguration => Ok(()),
            Request::Configure(camera) => {
                self.machine.check_configure()?;
                self.config.apply(camera)?;
                info!(config = ?self.config, "camera configured");
                Ok(())
            }
            Request::Lifecycle(command) => self.lifecycle(*command),
            Request::Reset => {
                self.stop_production();
                self.machine.reset();
                info!("camera reset");
                Ok(())
            }
        }
    }

    fn lifecycle(&mut self, command: LifecycleCommand) -> Result<()> {
        let next = self.machine.peek(command)?;
        match command {
            LifecycleCommand::Start => self.start_production()?,
            LifecycleCommand::Stop => self.stop_production(),
            _ => {}
        }
        self.machine.handle(command)?;
        info!(%command, state = %next, "camera transition");
        Ok(())
    }

    fn start_production(&mut self) -> Result<()> {
        // A previous run that already ended is joined here.
        self.stop_production();
        if let Err(err) = self.sink.publish(&buffer_config_notification(&self.pool)) {
            warn!(error = %err, "failed to announce buffer config");
        }
        let production = ProductionLoop::spawn(
            self.config.clone(),
            Arc::clone(&self.pool),
            Arc::clone(&self.sink),
            Arc::clone(&self.counters),
            self.settings.acquire_timeout,
        )?;
        self.production = Some(production);
        Ok(())
    }

    fn stop_production(&mut self) {
        if let Some(production) = self.production.take() {
            production.stop();
        }
    }

    /// Join a loop that ended on its own and fall back to armed.
    fn reap_finished(&mut self) {
        if self.production.as_ref().is_some_and(ProductionLoop::is_finished) {
            self.stop_production();
            if self.machine.complete_run() {
                info!(
                    frames = self.counters.frames_acquired(),
                    "acquisition complete, camera armed"
                );
            }
        }
    }

    fn fill_status(&self, reply: &mut ControlMessage) {
        let acquisition = self.counters.snapshot();
        reply.set_param("name", CAMERA_NAME);
        reply.set_param(
            "acquisition",
            json!({
                "acquiring": self.production.is_some() && acquisition.acquiring,
                "frames_acquired": acquisition.frames_acquired,
                "error": acquisition.error,
            }),
        );
        reply.set_param("camera", json!({ "state": self.machine.state().as_str() }));
        let buffers = self.pool.stats();
        reply.set_param(
            "buffers",
            json!({
                "capacity": buffers.capacity,
                "free": buffers.free,
                "producer_held": buffers.producer_held,
                "consumer_held": buffers.consumer_held,
            }),
        );
    }

    fn fill_configuration(&self, reply: &mut ControlMessage) {
        reply.set_param("enable_packet_logging", self.settings.enable_packet_logging);
        reply.set_param("frame_timeout_ms", self.settings.frame_timeout_ms);
        match serde_json::to_value(&self.config) {
            Ok(camera) => reply.set_param("camera", camera),
            Err(err) => warn!(error = %err, "failed to serialize camera config"),
        }
    }
}

impl Drop for CameraController {
    fn drop(&mut self) {
        self.stop_production();
    }
}

impl std::fmt::Debug for CameraController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraController")
            .field("state", &self.machine.state())
            .field("config", &self.config)
            .field("production", &self.production)
            .finish()
    }
}
