//! Error types for the libvirt provider.

use thiserror::Error;

use crate::config::ConfigError;
use crate::provider::{ProviderError, ProviderErrorKind};
use crate::remote::RemoteError;

/// Errors raised by the libvirt provider.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LibvirtError {
    /// The `OFEN_LIBVIRT_*` configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// The build spec cannot be served by a local hypervisor.
    #[error("invalid build spec: {0}")]
    Spec(String),
    /// The spec names a size class that has no definition.
    #[error("unknown instance type `{0}`; expected small, medium, large or xlarge")]
    UnknownInstanceType(String),
    /// A tool ran and exited non-zero.
    #[error("{program} {action} failed with status {status}: {stderr}")]
    Command {
        /// Executable that failed.
        program: String,
        /// What it was asked to do.
        action: String,
        /// Exit status text.
        status: String,
        /// Trimmed stderr.
        stderr: String,
    },
    /// A tool could not be started.
    #[error(transparent)]
    Spawn(#[from] RemoteError),
    /// A local file operation failed.
    #[error("{path}: {message}")]
    Io {
        /// Path being touched.
        path: String,
        /// Operating system error string.
        message: String,
    },
    /// The named domain or image does not exist.
    #[error("{kind} `{name}` not found")]
    NotFound {
        /// `domain` or `image`.
        kind: &'static str,
        /// Name looked up.
        name: String,
    },
    /// The guest did not report a usable state.
    #[error("domain {name} entered state `{state}`")]
    DomainState {
        /// Domain name.
        name: String,
        /// State reported by `virsh domstate`.
        state: String,
    },
}

impl LibvirtError {
    pub(super) fn io(path: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}

/// Whether `virsh` stderr reports a missing domain.
pub(crate) fn is_missing_domain(stderr: &str) -> bool {
    let lowered = stderr.to_ascii_lowercase();
    lowered.contains("failed to get domain") || lowered.contains("domain not found")
}

impl ProviderError for LibvirtError {
    fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::NotFound { .. } => ProviderErrorKind::NotFound,
            Self::Command { stderr, .. } if is_missing_domain(stderr) => {
                ProviderErrorKind::NotFound
            }
            Self::Command { stderr, .. } if stderr.contains("already exists") => {
                ProviderErrorKind::Collision
            }
            Self::Config(_)
            | Self::Spec(_)
            | Self::UnknownInstanceType(_)
            | Self::Command { .. }
            | Self::Spawn(_)
            | Self::Io { .. }
            | Self::DomainState { .. } => ProviderErrorKind::Other,
        }
    }
}

impl From<ConfigError> for LibvirtError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
