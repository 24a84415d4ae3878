use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use camemu_buffer::{BufferPool, BufferSlot, RegionLayout};
use camemu_camera::{CameraConfig, CameraController, CameraState, ControllerSettings};
use camemu_protocol::{ControlMessage, MessageKind};
use crossbeam_channel::Receiver;
use serde_json::json;

struct Rig {
    controller: CameraController,
    pool: Arc<BufferPool>,
    notifications: Receiver<ControlMessage>,
    next_id: u32,
}

impl Rig {
    fn new(buffers: usize) -> Self {
        let pool = Arc::new(
            BufferPool::anonymous(RegionLayout::new(buffers, 256).expect("layout"))
                .expect("pool"),
        );
        let (tx, rx) = crossbeam_channel::unbounded();
        let config = CameraConfig {
            frame_delay_ms: 0,
            exposure_time_ms: 1,
            frame_width: 8,
            frame_height: 8,
            ..CameraConfig::default()
        };
        let settings = ControllerSettings {
            acquire_timeout: Duration::from_millis(20),
            ..ControllerSettings::default()
        };
        Self {
            controller: CameraController::new(config, settings, Arc::clone(&pool), Arc::new(tx)),
            pool,
            notifications: rx,
            next_id: 0,
        }
    }

    fn send(&mut self, value: &str) -> ControlMessage {
        self.next_id += 1;
        self.controller
            .handle(&ControlMessage::command(value, self.next_id))
    }

    fn send_with(&mut self, value: &str, key: &str, param: serde_json::Value) -> ControlMessage {
        self.next_id += 1;
        self.controller
            .handle(&ControlMessage::command(value, self.next_id).with_param(key, param))
    }

    fn frame_ready_numbers(&self) -> Vec<u64> {
        self.notifications
            .try_iter()
            .filter(|msg| msg.value == "frame_ready")
            .map(|msg| msg.param_u64("frame").expect("frame param"))
            .collect()
    }

    fn wait_for_state(&mut self, expected: CameraState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let status = self.send("status");
            if status.param("camera").expect("camera")["state"] == expected.as_str() {
                return;
            }
            assert!(Instant::now() < deadline, "never reached {expected}");
            thread::sleep(Duration::from_millis(10));
        }
    }
}

fn assert_ack(reply: &ControlMessage) {
    assert_eq!(
        reply.kind,
        MessageKind::Ack,
        "expected ack, got {reply}"
    );
}

#[test]
fn three_frame_run_returns_to_armed() {
    let mut rig = Rig::new(4);
    assert_ack(&rig.send_with("configure", "camera", json!({"num_frames": 3})));
    assert_ack(&rig.send("connect"));
    assert_ack(&rig.send("arm"));
    assert_ack(&rig.send("start"));

    rig.wait_for_state(CameraState::Armed);
    assert_eq!(rig.frame_ready_numbers(), vec![0, 1, 2]);

    let status = rig.send("status");
    let acquisition = status.param("acquisition").expect("acquisition");
    assert_eq!(acquisition["frames_acquired"], 3);
    assert_eq!(acquisition["acquiring"], false);
    assert!(acquisition["error"].is_null());
}

#[test]
fn start_while_disconnected_is_nacked_without_change() {
    let mut rig = Rig::new(2);
    let reply = rig.send("start");
    assert_eq!(reply.kind, MessageKind::Nack);
    assert_eq!(reply.value, "start");
    assert_eq!(reply.id, Some(1));
    assert_eq!(
        reply.param_str("error"),
        Some("start is not valid in disconnected state")
    );
    assert_eq!(rig.controller.state(), CameraState::Disconnected);
    assert!(rig.notifications.try_recv().is_err());
}

#[test]
fn skipping_states_is_rejected_in_both_directions() {
    let mut rig = Rig::new(2);
    assert_eq!(rig.send("arm").kind, MessageKind::Nack);
    assert_ack(&rig.send("connect"));
    assert_eq!(rig.send("start").kind, MessageKind::Nack);
    assert_ack(&rig.send("arm"));
    assert_eq!(rig.send("disconnect").kind, MessageKind::Nack);
    assert_eq!(rig.controller.state(), CameraState::Armed);
}

#[test]
fn configure_command_form_drives_lifecycle() {
    let mut rig = Rig::new(2);
    assert_ack(&rig.send_with("configure", "command", json!("connect")));
    assert_eq!(rig.controller.state(), CameraState::Connected);
    let reply = rig.send_with("configure", "command", json!("warp"));
    assert_eq!(reply.kind, MessageKind::Nack);
    assert_eq!(reply.param_str("error"), Some("unknown command 'warp'"));
}

#[test]
fn exhausted_pool_keeps_running_until_stop() {
    let mut rig = Rig::new(2);
    assert_ack(&rig.send("connect"));
    assert_ack(&rig.send("arm"));
    assert_ack(&rig.send("start"));

    let deadline = Instant::now() + Duration::from_secs(5);
    while rig.pool.stats().consumer_held < 2 {
        assert!(Instant::now() < deadline, "two frames never published");
        thread::sleep(Duration::from_millis(5));
    }
    thread::sleep(Duration::from_millis(100));

    let status = rig.send("status");
    assert_eq!(status.param("camera").expect("camera")["state"], "running");
    assert_eq!(status.param("acquisition").expect("acq")["acquiring"], true);
    assert_eq!(status.param("buffers").expect("buffers")["free"], 0);

    assert_ack(&rig.send("stop"));
    assert_eq!(rig.controller.state(), CameraState::Armed);
    assert_eq!(rig.frame_ready_numbers(), vec![0, 1]);
}

#[test]
fn no_frame_ready_after_stop_returns() {
    let mut rig = Rig::new(4);
    assert_ack(&rig.send("connect"));
    assert_ack(&rig.send("arm"));
    assert_ack(&rig.send("start"));

    // Keep the consumer side moving so the loop never blocks on the pool.
    let mut seen = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while seen.len() < 5 {
        assert!(Instant::now() < deadline, "frames stalled");
        if let Ok(msg) = rig.notifications.recv_timeout(Duration::from_millis(50)) {
            if msg.value == "frame_ready" {
                let slot = msg.param_u64("buffer_id").expect("buffer id") as usize;
                rig.pool.reclaim(BufferSlot::new(slot)).expect("reclaim");
                seen.push(msg.param_u64("frame").expect("frame"));
            }
        }
    }

    assert_ack(&rig.send("stop"));
    let after_stop = rig.frame_ready_numbers();
    thread::sleep(Duration::from_millis(50));
    assert!(rig.frame_ready_numbers().is_empty(), "published after stop");

    let mut all = seen;
    all.extend(after_stop);
    for pair in all.windows(2) {
        assert_eq!(pair[1], pair[0] + 1, "frame numbers must be consecutive");
    }
    assert_eq!(all[0], 0);
}

#[test]
fn oversized_geometry_skips_frames_and_keeps_serving() {
    let mut rig = Rig::new(2);
    assert_ack(&rig.send_with(
        "configure",
        "camera",
        json!({
            "num_frames": 3,
            "frame_width": 4_000_000,
            "frame_height": 4_000_000,
            "data_type": "uint64"
        }),
    ));
    assert_ack(&rig.send("connect"));
    assert_ack(&rig.send("arm"));
    assert_ack(&rig.send("start"));

    rig.wait_for_state(CameraState::Armed);
    assert!(rig.frame_ready_numbers().is_empty());

    let status = rig.send("status");
    assert_ack(&status);
    let acquisition = status.param("acquisition").expect("acquisition");
    assert_eq!(acquisition["frames_acquired"], 0);
    assert!(acquisition["error"].is_null());
    assert_eq!(status.param("buffers").expect("buffers")["free"], 2);
    assert_eq!(rig.pool.stats().free, 2);
}

#[test]
fn configure_is_refused_only_while_running() {
    let mut rig = Rig::new(2);
    assert_ack(&rig.send_with("configure", "camera", json!({"frame_delay": 3})));
    assert_ack(&rig.send("connect"));
    assert_ack(&rig.send("arm"));
    assert_ack(&rig.send("start"));

    let reply = rig.send_with("configure", "camera", json!({"num_frames": 9}));
    assert_eq!(reply.kind, MessageKind::Nack);
    assert_eq!(
        reply.param_str("error"),
        Some("configure is not valid in running state")
    );
    assert_eq!(rig.controller.config().frame_delay_ms, 3);
    assert_ack(&rig.send("stop"));
}

#[test]
fn reset_stops_acquisition_from_any_state() {
    let mut rig = Rig::new(2);
    assert_ack(&rig.send("connect"));
    assert_ack(&rig.send("arm"));
    assert_ack(&rig.send("start"));
    assert_ack(&rig.send("reset"));
    assert_eq!(rig.controller.state(), CameraState::Disconnected);

    let status = rig.send("status");
    assert_eq!(status.param("acquisition").expect("acq")["acquiring"], false);
    rig.frame_ready_numbers();
    thread::sleep(Duration::from_millis(50));
    assert!(rig.frame_ready_numbers().is_empty());

    assert_ack(&rig.send("reset"));
}

#[test]
fn bad_image_directory_surfaces_in_status() {
    let mut rig = Rig::new(2);
    assert_ack(&rig.send_with(
        "configure",
        "camera",
        json!({"images_path": "/nonexistent/camemu-frames"}),
    ));
    assert_ack(&rig.send("connect"));
    assert_ack(&rig.send("arm"));
    assert_ack(&rig.send("start"));
    rig.wait_for_state(CameraState::Armed);

    let status = rig.send("status");
    let error = status.param("acquisition").expect("acq")["error"]
        .as_str()
        .expect("error string")
        .to_string();
    assert!(error.contains("/nonexistent/camemu-frames"));
    assert_eq!(rig.pool.stats().free, 2);
}

#[test]
fn configuration_reply_reports_camera_config() {
    let mut rig = Rig::new(2);
    assert_ack(&rig.send_with("configure", "camera", json!({"num_frames": 7})));
    let reply = rig.send("request_configuration");
    assert_ack(&reply);
    assert_eq!(reply.param("camera").expect("camera")["num_frames"], 7);
    assert_eq!(reply.param_u64("frame_timeout_ms"), Some(10));
    assert_eq!(reply.param("enable_packet_logging"), Some(&json!(false)));
}

#[test]
fn start_announces_buffer_config() {
    let mut rig = Rig::new(3);
    assert_ack(&rig.send_with("configure", "camera", json!({"num_frames": 1})));
    assert_ack(&rig.send("connect"));
    assert_ack(&rig.send("arm"));
    assert_ack(&rig.send("start"));

    let first = rig
        .notifications
        .recv_timeout(Duration::from_secs(2))
        .expect("first notification");
    assert_eq!(first.value, "buffer_config");
    assert_eq!(first.param_u64("num_buffers"), Some(3));
}

#[test]
fn non_command_envelopes_are_nacked() {
    let mut rig = Rig::new(2);
    let reply = rig
        .controller
        .handle(&ControlMessage::new(MessageKind::Ack, "connect", Some(5)));
    assert_eq!(reply.kind, MessageKind::Nack);
    assert_eq!(reply.id, Some(5));
    assert_eq!(rig.controller.state(), CameraState::Disconnected);
}
