use std::sync::Arc;

use camemu_buffer::{BufferPool, SharedRegion};
use camemu_protocol::{Inbox, NotificationSink, Publisher};
use parking_lot::Mutex;
use tracing::info;

use crate::config::EmulatorConfig;
use crate::controller::{CameraController, ControllerSettings};
use crate::error::Result;
use crate::release::{buffer_config_notification, ReleaseListener};
use crate::server::{ControlServer, ServerHandle};

const RELEASE_QUEUE_DEPTH: usize = 256;

/// A complete emulator: shared buffers, notification endpoints, release
/// listener and control server, wired together.
pub struct Emulator {
    server: ControlServer,
    controller: Arc<Mutex<CameraController>>,
    release: ReleaseListener,
    publisher: Arc<Publisher>,
    inbox: Inbox,
    pool: Arc<BufferPool>,
}

impl Emulator {
    pub fn start(config: EmulatorConfig) -> Result<Self> {
        let layout = config.layout()?;
        let region = match &config.shm_dir {
            Some(dir) => SharedRegion::create_in(dir, &config.shared_buffer_name, layout)?,
            None => SharedRegion::create(&config.shared_buffer_name, layout)?,
        };
        let pool = Arc::new(BufferPool::new(region)?);

        let publisher = Arc::new(Publisher::bind(&config.ready_endpoint)?);
        let inbox = Inbox::bind(&config.release_endpoint, RELEASE_QUEUE_DEPTH)?;
        let sink: Arc<dyn NotificationSink> = publisher.clone();

        let release = ReleaseListener::spawn(inbox.receiver(), Arc::clone(&pool), Arc::clone(&sink))?;

        let settings = ControllerSettings {
            frame_timeout_ms: config.frame_timeout_ms,
            enable_packet_logging: config.enable_packet_logging,
            acquire_timeout: config.acquire_timeout,
        };
        let controller = Arc::new(Mutex::new(CameraController::new(
            config.camera.clone(),
            settings,
            Arc::clone(&pool),
            sink,
        )));
        let server = ControlServer::bind(&config.ctrl_endpoint, Arc::clone(&controller))?;

        // Consumers that are already listening learn the layout right away;
        // later ones ask with `request_buffer_config`.
        publisher.broadcast(&buffer_config_notification(&pool))?;
        info!(
            ctrl = %config.ctrl_endpoint.display(),
            ready = %config.ready_endpoint.display(),
            release = %config.release_endpoint.display(),
            buffers = pool.capacity(),
            "emulator started"
        );

        Ok(Self {
            server,
            controller,
            release,
            publisher,
            inbox,
            pool,
        })
    }

    pub fn handle(&self) -> ServerHandle {
        self.server.handle()
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn controller(&self) -> &Arc<Mutex<CameraController>> {
        &self.controller
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    pub fn release_listener(&self) -> &ReleaseListener {
        &self.release
    }

    /// Serve until a [`ServerHandle`] asks for shutdown, then tear down.
    pub fn run(self) {
        let Self {
            server,
            controller,
            release,
            publisher,
            inbox,
            pool,
        } = self;
        server.wait();
        teardown(controller, release, publisher, inbox, pool);
    }

    pub fn shutdown(self) {
        let Self {
            server,
            controller,
            release,
            publisher,
            inbox,
            pool,
        } = self;
        server.shutdown();
        teardown(controller, release, publisher, inbox, pool);
    }
}

/// Stop the production loop before the endpoints and the region go away.
fn teardown(
    controller: Arc<Mutex<CameraController>>,
    release: ReleaseListener,
    publisher: Arc<Publisher>,
    inbox: Inbox,
    pool: Arc<BufferPool>,
) {
    drop(controller);
    release.shutdown();
    drop(inbox);
    drop(publisher);
    info!(stats = ?pool.stats(), "emulator stopped");
}

impl std::fmt::Debug for Emulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emulator")
            .field("server", &self.server)
            .field("pool", &self.pool)
            .finish()
    }
}
