//! One-directional push stream abstraction.
//!
//! A [`Transport`] opens a [`TransportHandle`] synchronously, the way a browser
//! `EventSource` does: the handle exists immediately and reports connection
//! progress later through [`TransportSignal`]s.

mod sse;

#[cfg(test)]
pub(crate) mod fake;

pub use sse::{CreateClientError, SseTransport};

use std::fmt::Debug;

use snafu::prelude::*;
use url::Url;

/// Error when a transport handle cannot be constructed
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum OpenError {
    /// stream url is not http(s)
    #[snafu(display("the url {url} has invalid schema {schema}, only http or https is ok"))]
    InvalidSchema {
        /// the url
        url: String,
        /// invalid schema
        schema: String,
    },

    /// transport refused to open for other reason
    #[snafu(display("open {url} refused: {reason}"))]
    Refused {
        /// the url
        url: String,
        /// why
        reason: String,
    },
}

/// Readiness of a transport handle, same meaning as `EventSource.readyState`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// connection not yet established
    Connecting,
    /// receiving
    Open,
    /// will never deliver again
    Closed,
}

/// Lifecycle signal delivered by a transport handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// connection established
    Open,
    /// text payload received
    Message(String),
    /// connection failed or broken
    Error,
}

/// A live stream connection.
#[async_trait::async_trait]
pub trait TransportHandle: Debug + Send {
    /// Next signal, `None` once the handle will never deliver again
    async fn next_signal(&mut self) -> Option<TransportSignal>;

    /// current readiness
    fn ready_state(&self) -> ReadyState;

    /// Close the connection. Must be idempotent.
    fn close(&mut self);
}

/// Factory of transport handles.
pub trait Transport: Debug + Send + Sync {
    /// Open a handle to `url`. An error here means the handle could not even be
    /// constructed (bad url, bad client setup).
    fn open(&self, url: &Url) -> Result<Box<dyn TransportHandle>, OpenError>;
}
