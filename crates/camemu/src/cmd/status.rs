use crate::cmd::lifecycle::finish;
use crate::cmd::GlobalArgs;
use crate::exit::{protocol_error, CliResult};

pub fn run(global: &GlobalArgs) -> CliResult<i32> {
    let mut client = global.client()?;
    let reply = client
        .status()
        .map_err(|err| protocol_error("status failed", &err))?;
    Ok(finish(&reply, global))
}
