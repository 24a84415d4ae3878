//! Camera emulator for the acquisition control path.
//!
//! A [`CameraController`] drives the lifecycle state machine and owns the
//! [`ProductionLoop`] spawned on `start`; the loop fills shared buffers and
//! announces them with `frame_ready`. A [`ReleaseListener`] returns buffers
//! the consumer is done with, and a [`ControlServer`] exposes the controller
//! on the control channel. [`Emulator`] wires all of it together.

pub mod config;
pub mod controller;
pub mod emulator;
pub mod error;
pub mod producer;
pub mod release;
pub mod server;
pub mod source;
pub mod state;

pub use config::{CameraConfig, EmulatorConfig};
pub use controller::{CameraController, ControllerSettings, Request, CAMERA_NAME};
pub use emulator::Emulator;
pub use error::{CameraError, Result};
pub use producer::{AcquisitionCounters, AcquisitionSnapshot, ProductionLoop};
pub use release::{buffer_config_notification, ReleaseListener, ReleaseStats};
pub use server::{ControlServer, ServerHandle};
pub use source::{DirectorySource, Frame, FrameSource, PatternSource};
pub use state::{CameraState, CameraStateMachine, LifecycleCommand, TransitionError};
