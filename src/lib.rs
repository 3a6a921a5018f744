//! # gallery-notify
//!
//! Real-time notification client for the image gallery.
//!
//! Keeps a server-sent event stream open with bounded exponential backoff,
//! turns image status changes into toasts and cache invalidations, and exposes
//! connection status for the UI.

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(missing_debug_implementations, missing_docs)]
#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod handler;
pub mod machine;
pub mod notification;
pub mod policy;
pub mod transport;

mod error;
pub use error::{Error, Result};

pub use client::{NotificationClient, Status};
pub use config::ClientConfig;
pub use handler::Handlers;
pub use machine::ConnectionState;
pub use notification::{QueryKey, Severity};
pub use policy::ReconnectPolicy;

use snafu::prelude::*;

/// Create a client on the sse transport using configuration from environment
///
/// # Panics
///
/// Must be called within a tokio runtime.
pub fn from_env(handlers: Handlers) -> Result<NotificationClient> {
    let config = ClientConfig::from_env().context(error::InvalidConfig)?;

    log::info!("Notification stream: {}", config.stream_url());

    NotificationClient::with_sse(config, handlers).context(error::CreateTransportFailed)
}
