use std::path::PathBuf;
use std::time::Duration;

use camemu_buffer::{
    DataType, RegionLayout, DEFAULT_BUFFER_SIZE, DEFAULT_SHARED_BUFFER_NAME,
    DEFAULT_SHARED_MEMORY_SIZE,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{CameraError, Result};

/// Acquisition parameters, changed through `configure` requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Frames per run; 0 runs until stopped.
    #[serde(alias = "number_of_frames")]
    pub num_frames: u64,
    #[serde(alias = "frame_delay", alias = "delay_time_ms")]
    pub frame_delay_ms: u64,
    #[serde(alias = "frame_exposure")]
    pub exposure_time_ms: u64,
    /// Directory of raw frame files; empty selects the synthetic pattern.
    #[serde(alias = "images_file_path")]
    pub images_path: String,
    pub frame_width: u32,
    pub frame_height: u32,
    pub data_type: DataType,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            num_frames: 0,
            frame_delay_ms: 1000,
            exposure_time_ms: 1000,
            images_path: String::new(),
            frame_width: 256,
            frame_height: 256,
            data_type: DataType::Uint8,
        }
    }
}

/// Frame numbers are `u32`, so one run holds at most this many frames.
pub const MAX_FRAMES_PER_RUN: u64 = u32::MAX as u64;

const KNOWN_KEYS: [&str; 7] = [
    "num_frames",
    "frame_delay_ms",
    "exposure_time_ms",
    "images_path",
    "frame_width",
    "frame_height",
    "data_type",
];

impl CameraConfig {
    /// Interval between frame starts.
    pub fn frame_period(&self) -> Duration {
        Duration::from_millis(self.frame_delay_ms.saturating_add(self.exposure_time_ms))
    }

    /// Payload bytes of one synthetic frame, `None` if the geometry overflows.
    pub fn frame_len(&self) -> Option<usize> {
        crate::source::frame_len(self.frame_width, self.frame_height, self.data_type)
    }

    /// Apply a partial update. Keys may use either the current or the
    /// historical field names; unknown keys are ignored with a warning.
    pub fn apply(&mut self, patch: &Map<String, Value>) -> Result<()> {
        let mut merged = match serde_json::to_value(&*self) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(CameraError::InvalidConfig("config is not an object".into())),
            Err(err) => return Err(CameraError::InvalidConfig(err.to_string())),
        };

        for (key, value) in patch {
            let key = canonical_key(key);
            if !KNOWN_KEYS.contains(&key) {
                warn!(key, "ignoring unknown camera config key");
                continue;
            }
            merged.insert(key.to_string(), value.clone());
        }

        let updated: CameraConfig = serde_json::from_value(Value::Object(merged))
            .map_err(|err| CameraError::InvalidConfig(err.to_string()))?;
        if updated.num_frames > MAX_FRAMES_PER_RUN {
            return Err(CameraError::InvalidConfig(format!(
                "num_frames {} exceeds {MAX_FRAMES_PER_RUN}",
                updated.num_frames
            )));
        }
        *self = updated;
        Ok(())
    }
}

fn canonical_key(key: &str) -> &str {
    match key {
        "number_of_frames" => "num_frames",
        "frame_delay" | "delay_time_ms" => "frame_delay_ms",
        "frame_exposure" => "exposure_time_ms",
        "images_file_path" => "images_path",
        other => other,
    }
}

/// Everything needed to stand up an emulator instance.
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    pub ctrl_endpoint: PathBuf,
    pub ready_endpoint: PathBuf,
    pub release_endpoint: PathBuf,
    pub shared_buffer_name: String,
    /// Directory for the shared region; `None` uses the platform default.
    pub shm_dir: Option<PathBuf>,
    pub shared_memory_size: usize,
    pub buffer_size: usize,
    /// Reported in the configuration reply.
    pub frame_timeout_ms: u64,
    pub enable_packet_logging: bool,
    /// Bounded wait for each free-buffer attempt in the production loop.
    pub acquire_timeout: Duration,
    pub camera: CameraConfig,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        let runtime = default_runtime_dir();
        Self {
            ctrl_endpoint: runtime.join("ctrl.sock"),
            ready_endpoint: runtime.join("ready.sock"),
            release_endpoint: runtime.join("release.sock"),
            shared_buffer_name: DEFAULT_SHARED_BUFFER_NAME.to_string(),
            shm_dir: None,
            shared_memory_size: DEFAULT_SHARED_MEMORY_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            frame_timeout_ms: 10,
            enable_packet_logging: false,
            acquire_timeout: Duration::from_millis(100),
            camera: CameraConfig::default(),
        }
    }
}

impl EmulatorConfig {
    pub fn layout(&self) -> Result<RegionLayout> {
        Ok(RegionLayout::from_memory_size(
            self.shared_memory_size,
            self.buffer_size,
        )?)
    }
}

/// Directory holding the default control and notification sockets.
pub fn default_runtime_dir() -> PathBuf {
    std::env::temp_dir().join("camemu")
}
