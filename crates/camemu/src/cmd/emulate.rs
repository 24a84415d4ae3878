use std::path::Path;

use camemu::buffer::DataType;
use camemu::camera::{Emulator, EmulatorConfig};
use tracing::info;

use crate::cmd::{endpoint_or_default, EmulateArgs, GlobalArgs};
use crate::exit::{camera_error, io_error, CliError, CliResult, INTERNAL, SUCCESS};

pub fn run(args: EmulateArgs, global: &GlobalArgs) -> CliResult<i32> {
    let config = build_config(args, global)?;
    for endpoint in [
        &config.ctrl_endpoint,
        &config.ready_endpoint,
        &config.release_endpoint,
    ] {
        ensure_parent(endpoint)?;
    }

    let emulator =
        Emulator::start(config).map_err(|err| camera_error("emulator start failed", &err))?;

    let handle = emulator.handle();
    ctrlc::set_handler(move || handle.shutdown()).map_err(|err| {
        CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
    })?;

    emulator.run();
    info!("emulator stopped");
    Ok(SUCCESS)
}

fn build_config(args: EmulateArgs, global: &GlobalArgs) -> CliResult<EmulatorConfig> {
    let mut config = EmulatorConfig {
        ctrl_endpoint: global.ctrl_endpoint(),
        ready_endpoint: endpoint_or_default(args.ready, "ready.sock"),
        release_endpoint: endpoint_or_default(args.release, "release.sock"),
        shared_buffer_name: args.shm_name,
        shm_dir: args.shm_dir,
        shared_memory_size: args.memory_size,
        buffer_size: args.buffer_size,
        frame_timeout_ms: args.frame_timeout_ms,
        enable_packet_logging: args.packet_logging,
        ..EmulatorConfig::default()
    };

    let camera = &mut config.camera;
    if let Some(num_frames) = args.num_frames {
        camera.num_frames = num_frames;
    }
    if let Some(delay) = args.frame_delay_ms {
        camera.frame_delay_ms = delay;
    }
    if let Some(exposure) = args.exposure_time_ms {
        camera.exposure_time_ms = exposure;
    }
    if let Some(images_path) = args.images_path {
        camera.images_path = images_path;
    }
    if let Some(width) = args.frame_width {
        camera.frame_width = width;
    }
    if let Some(height) = args.frame_height {
        camera.frame_height = height;
    }
    if let Some(name) = args.data_type {
        camera.data_type = match DataType::from_name(&name) {
            DataType::Unknown => {
                return Err(CliError::usage(format!("unknown data type '{name}'")));
            }
            known => known,
        };
    }

    Ok(config)
}

fn ensure_parent(path: &Path) -> CliResult<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)
            .map_err(|err| io_error(&format!("create {} failed", dir.display()), &err)),
        _ => Ok(()),
    }
}
