//! SSH client configuration loaded via `ortho-config`.
//!
//! The builder authenticates with a key it generates itself, so this layer
//! only covers binaries and connection options. Values merge defaults,
//! `ofen.toml` and `OFEN_SSH_*` environment variables.

use ortho_config::OrthoConfig;
use serde::Deserialize;

use super::RemoteError;

/// SSH and SCP settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "OFEN_SSH",
    discovery(
        app_name = "ofen",
        env_var = "OFEN_CONFIG_PATH",
        config_file_name = "ofen.toml",
        dotfile_name = ".ofen.toml",
        project_file_name = "ofen.toml"
    )
)]
pub struct SshConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// Path to the `ssh-keygen` executable used for ephemeral keys.
    #[ortho_config(default = "ssh-keygen".to_owned())]
    pub keygen_bin: String,
    /// TCP port the guest's SSH daemon listens on.
    #[ortho_config(default = 22)]
    pub port: u16,
    /// Seconds `ssh` waits for the TCP handshake on each attempt.
    #[ortho_config(default = 10)]
    pub connect_timeout_secs: u64,
    /// Whether to enforce host key checking; defaults to disabling to smooth
    /// ephemeral hosts.
    #[ortho_config(default = false)]
    pub strict_host_key_checking: bool,
    /// Known hosts file override; defaults to `/dev/null` for ephemeral hosts.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub known_hosts_file: String,
}

impl SshConfig {
    /// Ensures the binaries and port are usable.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when a binary path is blank or
    /// the port is zero.
    pub fn validate(&self) -> Result<(), RemoteError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.scp_bin, "scp_bin")?;
        Self::require_value(&self.keygen_bin, "keygen_bin")?;
        if self.port == 0 {
            return Err(RemoteError::InvalidConfig {
                field: String::from("port"),
            });
        }
        Ok(())
    }

    /// Loads configuration from defaults, configuration files and the
    /// environment without consulting process arguments.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::ConfigLoad`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, RemoteError> {
        Self::load_from_iter([std::ffi::OsString::from("ofen")])
            .map_err(|err| RemoteError::ConfigLoad(err.to_string()))
    }

    fn require_value(value: &str, field: &str) -> Result<(), RemoteError> {
        if value.trim().is_empty() {
            return Err(RemoteError::InvalidConfig {
                field: field.to_owned(),
            });
        }
        Ok(())
    }
}
