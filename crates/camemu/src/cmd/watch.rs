use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camemu::buffer::{FrameHeader, SharedRegion};
use camemu::protocol::{values, ControlMessage, Notifier, ProtocolError, Subscriber};
use tracing::{debug, warn};

use crate::cmd::{endpoint_or_default, GlobalArgs, WatchArgs};
use crate::exit::{buffer_error, protocol_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::print_notification;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: WatchArgs, global: &GlobalArgs) -> CliResult<i32> {
    let timeout = global.timeout()?;
    let ready = endpoint_or_default(args.ready.clone(), "ready.sock");
    let release = endpoint_or_default(args.release.clone(), "release.sock");

    let mut subscriber = Subscriber::connect(&ready, timeout)
        .map_err(|err| protocol_error(&format!("subscribe to {} failed", ready.display()), &err))?;
    let notifier = Notifier::connect(&release, timeout).map_err(|err| {
        protocol_error(&format!("connect to {} failed", release.display()), &err)
    })?;
    request_buffer_config(&notifier)?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;

    let mut region: Option<SharedRegion> = None;
    let mut frames_seen = 0usize;
    let mut configured = false;

    while running.load(Ordering::SeqCst) {
        let message = match subscriber.recv(POLL_INTERVAL) {
            Ok(Some(message)) => message,
            Ok(None) => {
                // The publisher may not have registered us when the first
                // request was answered.
                if !configured {
                    request_buffer_config(&notifier)?;
                }
                continue;
            }
            Err(ProtocolError::Disconnected) => {
                warn!("ready endpoint closed");
                break;
            }
            Err(ProtocolError::MalformedMessage(reason)) => {
                warn!(%reason, "skipping malformed notification");
                continue;
            }
            Err(err) => return Err(protocol_error("receive failed", &err)),
        };

        match message.value.as_str() {
            values::BUFFER_CONFIG => {
                configured = true;
                if args.headers {
                    region = Some(attach(&message, &args)?);
                }
                print_notification(&message, None, global.format);
            }
            values::FRAME_READY => {
                let header = region
                    .as_ref()
                    .and_then(|region| read_header(region, &message));
                print_notification(&message, header.as_ref(), global.format);

                if !args.no_release {
                    let reply = ControlMessage::notify(values::FRAME_RELEASE)
                        .with_param("frame", message.param("frame").cloned().unwrap_or_default())
                        .with_param(
                            "buffer_id",
                            message.param("buffer_id").cloned().unwrap_or_default(),
                        );
                    notifier
                        .send(&reply)
                        .map_err(|err| protocol_error("frame_release failed", &err))?;
                }

                frames_seen = frames_seen.saturating_add(1);
                if args.count.is_some_and(|count| frames_seen >= count) {
                    break;
                }
            }
            _ => print_notification(&message, None, global.format),
        }
    }

    Ok(SUCCESS)
}

fn request_buffer_config(notifier: &Notifier) -> CliResult<()> {
    notifier
        .send(&ControlMessage::notify(values::REQUEST_BUFFER_CONFIG))
        .map_err(|err| protocol_error("request_buffer_config failed", &err))
}

/// Map the region announced by a `buffer_config` notification.
fn attach(message: &ControlMessage, args: &WatchArgs) -> CliResult<SharedRegion> {
    let name = message.param_str("shared_buffer_name").ok_or_else(|| {
        CliError::new(
            crate::exit::DATA_INVALID,
            "buffer_config without shared_buffer_name",
        )
    })?;
    let region = match &args.shm_dir {
        Some(dir) => SharedRegion::open_in(dir, name),
        None => SharedRegion::open(name),
    }
    .map_err(|err| buffer_error(&format!("open shared buffer '{name}' failed"), &err))?;
    debug!(name, buffers = region.layout().buffer_count, "attached shared buffer");
    Ok(region)
}

fn read_header(region: &SharedRegion, message: &ControlMessage) -> Option<FrameHeader> {
    let index = usize::try_from(message.param_u64("buffer_id")?).ok()?;
    match region.buffer(index).and_then(FrameHeader::decode) {
        Ok(header) => Some(header),
        Err(err) => {
            warn!(buffer_id = index, error = %err, "unreadable frame header");
            None
        }
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
