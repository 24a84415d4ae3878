//! Camera acquisition control path: a camera emulator that streams frames
//! through shared memory, and the control protocol used to drive it.
//!
//! # Crate Structure
//!
//! - [`transport`] - Unix domain socket endpoints and streams
//! - [`wire`] - Length-prefixed framing of envelopes
//! - [`protocol`] - Control envelope, request/reply client, notifications
//! - [`buffer`] - Shared-memory buffer pool and frame header codec
//! - [`camera`] - Lifecycle state machine, frame production, control server

/// Re-export transport types.
pub mod transport {
    pub use camemu_transport::*;
}

/// Re-export framing types.
pub mod wire {
    pub use camemu_wire::*;
}

/// Re-export protocol types.
pub mod protocol {
    pub use camemu_protocol::*;
}

/// Re-export buffer pool types.
pub mod buffer {
    pub use camemu_buffer::*;
}

/// Re-export emulator types.
pub mod camera {
    pub use camemu_camera::*;
}
