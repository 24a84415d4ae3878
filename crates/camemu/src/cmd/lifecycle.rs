use camemu::protocol::{values, ControlMessage, Params};

use crate::cmd::{GlobalArgs, LifecycleArgs};
use crate::exit::{protocol_error, CliResult, FAILURE, SUCCESS};
use crate::output::{is_nack, print_reply};

pub fn run(verb: &str, args: LifecycleArgs, global: &GlobalArgs) -> CliResult<i32> {
    let mut client = global.client()?;
    let reply = if args.direct {
        client.lifecycle(verb)
    } else {
        client.command(verb)
    }
    .map_err(|err| protocol_error(&format!("{verb} failed"), &err))?;
    Ok(finish(&reply, global))
}

pub fn reset(global: &GlobalArgs) -> CliResult<i32> {
    let mut client = global.client()?;
    let reply = client
        .request(values::RESET, Params::new())
        .map_err(|err| protocol_error("reset failed", &err))?;
    Ok(finish(&reply, global))
}

/// Print the reply and turn a nack into a failure exit code.
pub fn finish(reply: &ControlMessage, global: &GlobalArgs) -> i32 {
    print_reply(reply, global.format);
    if is_nack(reply) {
        FAILURE
    } else {
        SUCCESS
    }
}
