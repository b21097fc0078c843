//! Deadlines and retry budgets applied to each build phase.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::config::ConfigError;

/// Timing knobs, in whole seconds, loaded from `OFEN_BUILD_*` variables and
/// configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "OFEN_BUILD")]
pub struct PolicyConfig {
    /// Deadline for the instance to report running.
    #[ortho_config(default = 600)]
    pub launch_timeout_secs: u64,
    /// Connection attempts before giving up on the guest.
    #[ortho_config(default = 15)]
    pub ssh_attempts: u32,
    /// Pause between connection attempts.
    #[ortho_config(default = 4)]
    pub ssh_retry_delay_secs: u64,
    /// Deadline covering every upload.
    #[ortho_config(default = 1200)]
    pub upload_timeout_secs: u64,
    /// Deadline covering every configuration command.
    #[ortho_config(default = 1200)]
    pub command_timeout_secs: u64,
    /// Deadline for the snapshot to become available.
    #[ortho_config(default = 1200)]
    pub image_timeout_secs: u64,
    /// Deadline for a terminated instance to disappear during teardown.
    #[ortho_config(default = 300)]
    pub teardown_timeout_secs: u64,
}

impl PolicyConfig {
    /// Loads policy values without consulting process arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("ofen")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Converts the raw values into a [`BuildPolicy`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the attempt budget is zero.
    pub fn into_policy(self) -> Result<BuildPolicy, ConfigError> {
        if self.ssh_attempts == 0 {
            return Err(ConfigError::Invalid(String::from(
                "ssh_attempts must be at least 1 (OFEN_BUILD_SSH_ATTEMPTS)",
            )));
        }
        Ok(BuildPolicy {
            launch_timeout: Duration::from_secs(self.launch_timeout_secs),
            ssh_attempts: self.ssh_attempts,
            ssh_retry_delay: Duration::from_secs(self.ssh_retry_delay_secs),
            upload_timeout: Duration::from_secs(self.upload_timeout_secs),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            image_timeout: Duration::from_secs(self.image_timeout_secs),
            teardown_timeout: Duration::from_secs(self.teardown_timeout_secs),
        })
    }
}

/// Deadlines and retry budgets used by the builder.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BuildPolicy {
    /// Deadline for launch plus the wait for `Running`.
    pub launch_timeout: Duration,
    /// Connection attempts, counting the first one.
    pub ssh_attempts: u32,
    /// Fixed pause between connection attempts.
    pub ssh_retry_delay: Duration,
    /// Deadline covering every upload.
    pub upload_timeout: Duration,
    /// Deadline covering every configuration command.
    pub command_timeout: Duration,
    /// Deadline for snapshot plus the wait for `Available`.
    pub image_timeout: Duration,
    /// Deadline for waiting on termination during teardown.
    pub teardown_timeout: Duration,
}

impl Default for BuildPolicy {
    fn default() -> Self {
        Self {
            launch_timeout: Duration::from_secs(600),
            ssh_attempts: 15,
            ssh_retry_delay: Duration::from_secs(4),
            upload_timeout: Duration::from_secs(1200),
            command_timeout: Duration::from_secs(1200),
            image_timeout: Duration::from_secs(1200),
            teardown_timeout: Duration::from_secs(300),
        }
    }
}
