//! Build failure taxonomy.

use std::time::Duration;

use thiserror::Error;

use crate::provider::InstanceStatus;
use crate::remote::RemoteError;

use super::state::Phase;

/// Fatal errors surfaced by [`super::Builder::bake`]. Teardown has already
/// run by the time one is returned.
#[derive(Debug, Error)]
pub enum BuildError<E>
where
    E: std::error::Error + 'static,
{
    /// The provider rejected the spec before anything was created.
    #[error("build spec rejected by provider: {0}")]
    Config(#[source] E),
    /// A credential or access rule name collided, or quota ran out.
    #[error("could not acquire ephemeral resources: {0}")]
    QuotaOrCollision(#[source] E),
    /// Any other provider failure.
    #[error("provider failed during {phase}: {source}")]
    Provider {
        /// Phase that was running.
        phase: Phase,
        /// Provider error.
        #[source]
        source: E,
    },
    /// The instance never reported running.
    #[error("instance did not start within {}s", .timeout.as_secs())]
    LaunchTimeout {
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// The instance entered a state it cannot boot from.
    #[error("instance {instance} entered {status} while starting")]
    LaunchFailed {
        /// Provider identifier.
        instance: String,
        /// Status observed.
        status: InstanceStatus,
    },
    /// The guest never accepted an SSH session.
    #[error("instance not reachable after {attempts} attempts: {last_reason}")]
    UnreachableTimeout {
        /// Attempts made.
        attempts: u32,
        /// Reason given by the last attempt.
        last_reason: String,
    },
    /// The generated key was rejected outright.
    #[error("authentication failed: {0}")]
    Auth(#[source] RemoteError),
    /// SSH failed in a way retrying cannot fix.
    #[error("connection failed: {0}")]
    Connect(#[source] RemoteError),
    /// An upload failed.
    #[error("upload failed: {0}")]
    Upload(#[source] RemoteError),
    /// Uploads or commands ran past their deadline.
    #[error("{stage} did not finish within {}s", .timeout.as_secs())]
    ConfigureTimeout {
        /// `uploads` or `commands`.
        stage: &'static str,
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// The image never became available.
    #[error("image did not become available within {}s", .timeout.as_secs())]
    ImageTimeout {
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// The backend marked the image as failed.
    #[error("image {image} failed")]
    ImageFailed {
        /// Provider identifier.
        image: String,
    },
    /// A local process or work area operation failed.
    #[error("local operation failed: {0}")]
    Local(String),
    /// A remote command could not be started.
    #[error("remote execution failed: {0}")]
    Remote(#[source] RemoteError),
    /// The build was cancelled.
    #[error("build interrupted")]
    Interrupted,
    /// `bake` was called twice on one builder.
    #[error("builder has already run")]
    AlreadyUsed,
}
