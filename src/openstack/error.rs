//! Error types for the OpenStack provider.

use thiserror::Error;

use crate::config::ConfigError;
use crate::provider::{ProviderError, ProviderErrorKind};

/// Errors raised by the OpenStack provider.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OpenStackError {
    /// The `OS_*` configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// The build spec lacks an OpenStack specific field.
    #[error("invalid build spec: {0}")]
    Spec(String),
    /// Keystone rejected the credentials or returned no token.
    #[error("keystone authentication failed: {0}")]
    Auth(String),
    /// The service catalogue has no usable endpoint.
    #[error("no {interface} endpoint for service `{service}` in the catalogue")]
    MissingEndpoint {
        /// Service type, for example `compute`.
        service: String,
        /// Interface requested.
        interface: String,
    },
    /// A named resource (flavour, image, network) does not exist.
    #[error("{kind} `{name}` not found")]
    NotFound {
        /// Resource kind.
        kind: &'static str,
        /// Name or identifier looked up.
        name: String,
    },
    /// An API call returned an error status.
    #[error("openstack api error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the error body.
        message: String,
    },
    /// Transport or decoding failure.
    #[error("openstack request failed: {0}")]
    Transport(String),
}

impl OpenStackError {
    pub(super) fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

impl ProviderError for OpenStackError {
    fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::Api { status, message } => match status {
                404 => ProviderErrorKind::NotFound,
                409 => ProviderErrorKind::Collision,
                413 => ProviderErrorKind::Quota,
                _ if message.to_ascii_lowercase().contains("quota") => ProviderErrorKind::Quota,
                _ => ProviderErrorKind::Other,
            },
            Self::NotFound { .. } => ProviderErrorKind::NotFound,
            Self::Config(_)
            | Self::Spec(_)
            | Self::Auth(_)
            | Self::MissingEndpoint { .. }
            | Self::Transport(_) => ProviderErrorKind::Other,
        }
    }
}

impl From<ConfigError> for OpenStackError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
