use std::path::PathBuf;
use std::time::Duration;

use camemu::buffer::{DEFAULT_BUFFER_SIZE, DEFAULT_SHARED_BUFFER_NAME, DEFAULT_SHARED_MEMORY_SIZE};
use camemu::camera::config::default_runtime_dir;
use camemu::protocol::ControlClient;
use clap::{Args, Subcommand};

use crate::exit::{protocol_error, CliError, CliResult};
use crate::output::OutputFormat;

pub mod config;
pub mod emulate;
pub mod lifecycle;
pub mod status;
pub mod version;
pub mod watch;

/// Options shared by every subcommand.
#[derive(Debug)]
pub struct GlobalArgs {
    pub ctrl: Option<PathBuf>,
    pub timeout: String,
    pub format: OutputFormat,
}

impl GlobalArgs {
    pub fn ctrl_endpoint(&self) -> PathBuf {
        self.ctrl
            .clone()
            .unwrap_or_else(|| default_runtime_dir().join("ctrl.sock"))
    }

    pub fn timeout(&self) -> CliResult<Duration> {
        parse_duration(&self.timeout)
    }

    /// Open a control session; `connect` waits up to the reply timeout.
    pub fn client(&self) -> CliResult<ControlClient> {
        let path = self.ctrl_endpoint();
        let timeout = self.timeout()?;
        ControlClient::connect(&path, timeout).map_err(|err| {
            protocol_error(&format!("connect to {} failed", path.display()), &err)
        })
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the camera emulator until interrupted.
    Emulate(EmulateArgs),
    /// Connect the camera (disconnected -> connected).
    Connect(LifecycleArgs),
    /// Disconnect the camera (connected -> disconnected).
    Disconnect(LifecycleArgs),
    /// Arm the camera (connected -> armed).
    Arm(LifecycleArgs),
    /// Disarm the camera (armed -> connected).
    Disarm(LifecycleArgs),
    /// Start acquisition (armed -> running).
    Start(LifecycleArgs),
    /// Stop acquisition (running -> armed).
    Stop(LifecycleArgs),
    /// Halt any acquisition and return the camera to disconnected.
    Reset,
    /// Print the camera status.
    Status,
    /// Set camera configuration, or print it when no pairs are given.
    Config(ConfigArgs),
    /// Subscribe to frame notifications and release frames.
    Watch(WatchArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, global: &GlobalArgs) -> CliResult<i32> {
    match command {
        Command::Emulate(args) => emulate::run(args, global),
        Command::Connect(args) => lifecycle::run("connect", args, global),
        Command::Disconnect(args) => lifecycle::run("disconnect", args, global),
        Command::Arm(args) => lifecycle::run("arm", args, global),
        Command::Disarm(args) => lifecycle::run("disarm", args, global),
        Command::Start(args) => lifecycle::run("start", args, global),
        Command::Stop(args) => lifecycle::run("stop", args, global),
        Command::Reset => lifecycle::reset(global),
        Command::Status => status::run(global),
        Command::Config(args) => config::run(args, global),
        Command::Watch(args) => watch::run(args, global),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct EmulateArgs {
    /// Ready (frame notification) endpoint.
    #[arg(long, value_name = "PATH", env = "CAMEMU_READY")]
    pub ready: Option<PathBuf>,
    /// Release endpoint.
    #[arg(long, value_name = "PATH", env = "CAMEMU_RELEASE")]
    pub release: Option<PathBuf>,
    /// Shared buffer name.
    #[arg(long, env = "CAMEMU_SHM_NAME", default_value = DEFAULT_SHARED_BUFFER_NAME)]
    pub shm_name: String,
    /// Directory holding the shared buffer region (default: /dev/shm).
    #[arg(long, value_name = "DIR", env = "CAMEMU_SHM_DIR")]
    pub shm_dir: Option<PathBuf>,
    /// Total shared memory budget in bytes.
    #[arg(long, default_value_t = DEFAULT_SHARED_MEMORY_SIZE)]
    pub memory_size: usize,
    /// Size of each buffer in bytes, header included.
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,
    /// Control reply timeout reported to clients, in milliseconds.
    #[arg(long, default_value_t = 10)]
    pub frame_timeout_ms: u64,
    /// Trace every control envelope.
    #[arg(long)]
    pub packet_logging: bool,
    /// Frames per acquisition (0 runs until stopped).
    #[arg(long)]
    pub num_frames: Option<u64>,
    #[arg(long, value_name = "MS")]
    pub frame_delay_ms: Option<u64>,
    #[arg(long, value_name = "MS")]
    pub exposure_time_ms: Option<u64>,
    /// Directory of raw frame files; empty uses a generated pattern.
    #[arg(long, value_name = "DIR")]
    pub images_path: Option<String>,
    #[arg(long)]
    pub frame_width: Option<u32>,
    #[arg(long)]
    pub frame_height: Option<u32>,
    /// Pixel type name (uint8, uint16, uint32, uint64, float).
    #[arg(long)]
    pub data_type: Option<String>,
}

#[derive(Args, Debug)]
pub struct LifecycleArgs {
    /// Send the verb as the message value instead of `configure` + `command`.
    #[arg(long)]
    pub direct: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// `key=value` (string) or `key:=json` pairs for the camera section.
    pub pairs: Vec<String>,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Ready (frame notification) endpoint.
    #[arg(long, value_name = "PATH", env = "CAMEMU_READY")]
    pub ready: Option<PathBuf>,
    /// Release endpoint.
    #[arg(long, value_name = "PATH", env = "CAMEMU_RELEASE")]
    pub release: Option<PathBuf>,
    /// Read each frame header from shared memory.
    #[arg(long)]
    pub headers: bool,
    /// Directory holding the shared buffer region (default: /dev/shm).
    #[arg(long, value_name = "DIR", env = "CAMEMU_SHM_DIR")]
    pub shm_dir: Option<PathBuf>,
    /// Do not hand buffers back after printing.
    #[arg(long)]
    pub no_release: bool,
    /// Exit after this many `frame_ready` notifications.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show build details.
    #[arg(long)]
    pub extended: bool,
}

/// Resolve an optional endpoint against the default runtime directory.
pub fn endpoint_or_default(path: Option<PathBuf>, file_name: &str) -> PathBuf {
    path.unwrap_or_else(|| default_runtime_dir().join(file_name))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
