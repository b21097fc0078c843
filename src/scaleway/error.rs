//! Error types for the Scaleway provider.

use scaleway_rs::{ScalewayApiError, ScalewayError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::provider::{ProviderError, ProviderErrorKind};

/// Errors raised by the Scaleway provider.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScalewayProviderError {
    /// Raised when the high-level configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when the build spec lacks a Scaleway specific field.
    #[error("invalid build spec: {0}")]
    Spec(String),
    /// Raised when the requested image label cannot be resolved.
    #[error("image '{label}' (arch {arch}) not found in zone {zone}")]
    ImageNotFound {
        /// Image label passed by the caller.
        label: String,
        /// Architecture requested by the caller.
        arch: String,
        /// Zone used for the lookup.
        zone: String,
    },
    /// Raised when the server type is not available in the selected zone.
    #[error("instance type '{instance_type}' not available in zone {zone}")]
    InstanceTypeUnavailable {
        /// Requested commercial type.
        instance_type: String,
        /// Target zone.
        zone: String,
    },
    /// Raised when an instance cannot be powered on.
    #[error("instance {instance_id} in state {state} cannot be powered on")]
    PowerOnNotAllowed {
        /// Provider instance identifier.
        instance_id: String,
        /// Current state reported by the provider.
        state: String,
    },
    /// The API answered with an error document.
    #[error("scaleway api error ({etype}): {message}")]
    Api {
        /// HTTP status, when the call went through raw HTTP.
        status: Option<u16>,
        /// Scaleway error type, for example `not_found` or `quotas_exceeded`.
        etype: String,
        /// Message returned by the API.
        message: String,
    },
    /// Transport or decoding failure.
    #[error("provider error: {message}")]
    Provider {
        /// Message returned by the HTTP client or SDK.
        message: String,
    },
}

impl ScalewayProviderError {
    pub(super) fn from_api(status: Option<u16>, api_err: ScalewayApiError) -> Self {
        Self::Api {
            status,
            etype: api_err.etype,
            message: api_err.message,
        }
    }

    pub(super) fn transport(err: impl std::fmt::Display) -> Self {
        Self::Provider {
            message: err.to_string(),
        }
    }
}

impl ProviderError for ScalewayProviderError {
    fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::Api {
                status, etype, message,
            } => classify_api(*status, etype, message),
            Self::ImageNotFound { .. } => ProviderErrorKind::NotFound,
            Self::Config(_)
            | Self::Spec(_)
            | Self::InstanceTypeUnavailable { .. }
            | Self::PowerOnNotAllowed { .. }
            | Self::Provider { .. } => ProviderErrorKind::Other,
        }
    }
}

fn classify_api(status: Option<u16>, etype: &str, message: &str) -> ProviderErrorKind {
    if status == Some(404) || etype == "not_found" || etype == "unknown_resource" {
        return ProviderErrorKind::NotFound;
    }
    if status == Some(409) || etype == "conflict" || etype == "already_exists" {
        return ProviderErrorKind::Collision;
    }
    if etype == "quotas_exceeded" || message.to_ascii_lowercase().contains("quota") {
        return ProviderErrorKind::Quota;
    }
    ProviderErrorKind::Other
}

impl From<ScalewayError> for ScalewayProviderError {
    fn from(value: ScalewayError) -> Self {
        match value {
            ScalewayError::Api(api_err) => Self::from_api(None, api_err),
            other => Self::transport(other),
        }
    }
}

impl From<ConfigError> for ScalewayProviderError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
