//! The camemu control message protocol.
//!
//! One envelope shape ([`ControlMessage`]) serves two channels:
//! - the control channel, where a [`ControlClient`] sends `cmd` requests and
//!   the server answers each with an `ack` or `nack` carrying the same id;
//! - the buffer notification channels, where fire-and-forget `notify`
//!   messages flow from a [`Publisher`] to its [`Subscriber`]s, and from
//!   [`Notifier`]s into an [`Inbox`].

pub mod client;
pub mod error;
pub mod message;
pub mod notify;

pub use client::{ControlClient, DEFAULT_REQUEST_TIMEOUT};
pub use error::{ProtocolError, Result};
pub use message::{values, ControlMessage, MessageIdGenerator, MessageKind, Params};
pub use notify::{Inbox, NotificationSink, Notifier, Publisher, Subscriber};
