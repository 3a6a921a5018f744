//! crate error types

use snafu::prelude::*;

use crate::{config::ConfigError, transport::CreateClientError};

/// crate result type
pub type Result<T> = std::result::Result<T, Error>;

/// crate error type
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    /// Client configuration invalid
    #[snafu(display("invalid notification client config: {source}"))]
    InvalidConfig {
        /// source error
        source: ConfigError,
    },

    /// Create transport failed
    #[snafu(display("create notification transport failed: {source}"))]
    CreateTransportFailed {
        /// source error
        source: CreateClientError,
    },
}
