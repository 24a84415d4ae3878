use camemu::buffer::{FRAME_HEADER_LEN, REGION_HEADER_LEN};
use camemu::camera::CAMERA_NAME;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("camemu {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: camemu");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("camera: {CAMERA_NAME}");
    println!(
        "target: {}",
        option_env!("CAMEMU_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "rustc: {}",
        option_env!("RUSTC_VERSION").unwrap_or("unknown")
    );
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!("frame_header_bytes: {FRAME_HEADER_LEN}");
    println!("region_header_bytes: {REGION_HEADER_LEN}");

    Ok(SUCCESS)
}
