use camemu::protocol::Params;
use serde_json::Value;

use crate::cmd::lifecycle::finish;
use crate::cmd::{ConfigArgs, GlobalArgs};
use crate::exit::{protocol_error, CliError, CliResult};

pub fn run(args: ConfigArgs, global: &GlobalArgs) -> CliResult<i32> {
    let camera = parse_pairs(&args.pairs)?;
    let mut client = global.client()?;

    let reply = if camera.is_empty() {
        client.request_configuration()
    } else {
        let mut params = Params::new();
        params.insert("camera".to_string(), Value::Object(camera));
        client.configure(params)
    }
    .map_err(|err| protocol_error("config failed", &err))?;

    Ok(finish(&reply, global))
}

/// `key=value` sends a string, `key:=json` sends raw JSON.
fn parse_pairs(pairs: &[String]) -> CliResult<Params> {
    let mut camera = Params::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            return Err(CliError::usage(format!(
                "expected key=value or key:=json, got '{pair}'"
            )));
        };
        match key.strip_suffix(':') {
            Some(key) => {
                let value: Value = serde_json::from_str(raw).map_err(|err| {
                    CliError::usage(format!("invalid JSON for '{key}': {err}"))
                })?;
                insert(&mut camera, key, value)?;
            }
            None => insert(&mut camera, key, Value::from(raw))?,
        }
    }
    Ok(camera)
}

fn insert(camera: &mut Params, key: &str, value: Value) -> CliResult<()> {
    let key = key.trim();
    if key.is_empty() {
        return Err(CliError::usage("config key must not be empty"));
    }
    camera.insert(key.to_string(), value);
    Ok(())
}
