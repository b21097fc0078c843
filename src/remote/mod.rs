//! Remote execution over the system `ssh` and `scp` clients.
//!
//! The client knows nothing about clouds. It opens an authenticated session
//! to one host, runs commands in that session capturing exit status and
//! output, and copies files. Every process call runs on tokio's blocking
//! pool so that the builder's phase deadlines can abandon a hung transfer.

use std::ffi::OsString;
use std::net::IpAddr;

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::debug;

mod classify;
mod config;
mod keys;
mod runner;
mod util;

pub use classify::{ConnectOutcome, SSH_CLIENT_FAILURE, classify_connect};
pub use config::SshConfig;
pub use keys::{KeyPair, generate_keypair};
pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner, StreamingCommandRunner};
pub use util::expand_tilde;

/// Errors surfaced by the remote execution client.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// Raised when configuration is missing required values.
    #[error("missing {field}: set OFEN_SSH_{env_suffix} or add {field} to [ssh] in ofen.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when layered configuration cannot be merged.
    #[error("ssh configuration parsing failed: {0}")]
    ConfigLoad(String),
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// The host refused or dropped the connection; it may not be up yet.
    #[error("{host} not reachable yet: {reason}")]
    Unreachable {
        /// Address that was tried.
        host: String,
        /// Last line reported by `ssh`.
        reason: String,
    },
    /// The private key was rejected outright.
    #[error("ssh key rejected for {host}: {reason}")]
    Auth {
        /// Address that was tried.
        host: String,
        /// Last line reported by `ssh`.
        reason: String,
    },
    /// Any other client-side failure.
    #[error("ssh connection to {host} failed: {reason}")]
    Connect {
        /// Address that was tried.
        host: String,
        /// Last line reported by `ssh`.
        reason: String,
    },
    /// Raised when an upload source does not exist locally.
    #[error("upload source missing: {path}")]
    MissingLocal {
        /// Expanded local path.
        path: Utf8PathBuf,
    },
    /// Raised when `scp` completes with a non-zero exit code.
    #[error("copying {local} to {remote} failed with status {status_text}: {stderr}")]
    Transfer {
        /// Local source path.
        local: Utf8PathBuf,
        /// Remote destination path.
        remote: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from `scp`.
        stderr: String,
    },
    /// Raised when the ephemeral keypair cannot be produced.
    #[error("ssh key generation failed: {0}")]
    KeyGeneration(String),
}

/// Everything needed to address one guest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshTarget {
    /// Login user on the guest.
    pub user: String,
    /// Address resolved from the provider.
    pub host: IpAddr,
    /// Private key used for authentication.
    pub identity: Utf8PathBuf,
}

impl SshTarget {
    fn ssh_destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn scp_destination(&self, remote: &str) -> String {
        match self.host {
            IpAddr::V4(addr) => format!("{}@{addr}:{remote}", self.user),
            IpAddr::V6(addr) => format!("{}@[{addr}]:{remote}", self.user),
        }
    }
}

/// Output of a command executed in a session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCommandOutput {
    /// Exit code reported by the remote shell, if any.
    pub exit_code: Option<i32>,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

/// Factory for SSH sessions backed by a [`CommandRunner`].
#[derive(Clone, Debug)]
pub struct SshClient<R: CommandRunner> {
    config: SshConfig,
    runner: R,
}

impl SshClient<StreamingCommandRunner> {
    /// Convenience constructor that streams remote output to the terminal.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when validation fails.
    pub fn with_streaming_runner(config: SshConfig) -> Result<Self, RemoteError> {
        Self::new(config, StreamingCommandRunner)
    }
}

impl<R> SshClient<R>
where
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    /// Creates a new client using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when configuration validation
    /// fails.
    pub fn new(config: SshConfig, runner: R) -> Result<Self, RemoteError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Generates the build's ephemeral keypair inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::KeyGeneration`] when `ssh-keygen` fails.
    pub async fn generate_keypair(
        &self,
        dir: &Utf8Path,
        name: &str,
    ) -> Result<KeyPair, RemoteError> {
        let runner = self.runner.clone();
        let keygen_bin = self.config.keygen_bin.clone();
        let dir_owned = dir.to_path_buf();
        let name_owned = name.to_owned();
        tokio::task::spawn_blocking(move || {
            generate_keypair(&runner, &keygen_bin, &dir_owned, &name_owned)
        })
        .await
        .map_err(|err| RemoteError::KeyGeneration(err.to_string()))?
    }

    /// Opens a session by running `true` on the guest.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Unreachable`] for conditions worth retrying,
    /// [`RemoteError::Auth`] when the key is rejected outright and
    /// [`RemoteError::Connect`] for any other client failure.
    pub async fn connect(&self, target: &SshTarget) -> Result<SshSession<R>, RemoteError> {
        let mut args = self.ssh_options(target);
        args.push(OsString::from("-o"));
        args.push(OsString::from(format!(
            "ConnectTimeout={}",
            self.config.connect_timeout_secs
        )));
        args.push(OsString::from(target.ssh_destination()));
        args.push(OsString::from("true"));

        let output = self.run_blocking(&self.config.ssh_bin, args).await?;
        let host = target.host.to_string();
        match classify_connect(&output) {
            ConnectOutcome::Connected => Ok(SshSession {
                client: self.clone(),
                target: target.clone(),
            }),
            ConnectOutcome::Retryable(reason) => Err(RemoteError::Unreachable { host, reason }),
            ConnectOutcome::AuthRejected(reason) => Err(RemoteError::Auth { host, reason }),
            ConnectOutcome::Fatal(reason) => Err(RemoteError::Connect { host, reason }),
        }
    }

    fn ssh_options(&self, target: &SshTarget) -> Vec<OsString> {
        self.common_options("-p", target)
    }

    fn scp_options(&self, target: &SshTarget) -> Vec<OsString> {
        self.common_options("-P", target)
    }

    fn common_options(&self, port_flag: &str, target: &SshTarget) -> Vec<OsString> {
        let mut args = vec![
            OsString::from(port_flag),
            OsString::from(self.config.port.to_string()),
            OsString::from("-i"),
            OsString::from(target.identity.as_str()),
            OsString::from("-o"),
            OsString::from("BatchMode=yes"),
            OsString::from("-o"),
            OsString::from("IdentitiesOnly=yes"),
        ];

        if !self.config.strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.known_hosts_file
            )));
        }

        args
    }

    async fn run_blocking(
        &self,
        program: &str,
        args: Vec<OsString>,
    ) -> Result<CommandOutput, RemoteError> {
        let runner = self.runner.clone();
        let program_owned = program.to_owned();
        tokio::task::spawn_blocking(move || runner.run(&program_owned, &args))
            .await
            .map_err(|err| RemoteError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?
    }
}

/// An authenticated session to one guest.
///
/// OpenSSH has no persistent connection to hold, so the session is the
/// proven-good target plus the client that reached it. Dropping it closes it.
#[derive(Clone, Debug)]
pub struct SshSession<R: CommandRunner> {
    client: SshClient<R>,
    target: SshTarget,
}

impl<R> SshSession<R>
where
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    /// The target this session authenticated against.
    #[must_use]
    pub const fn target(&self) -> &SshTarget {
        &self.target
    }

    /// Runs `command` through the guest's login shell.
    ///
    /// A non-zero exit status is returned as data, not as an error.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Spawn`] when `ssh` cannot be started.
    ///
    /// # Security
    ///
    /// `command` is passed verbatim to the remote shell.
    pub async fn execute(&self, command: &str) -> Result<RemoteCommandOutput, RemoteError> {
        let mut args = self.client.ssh_options(&self.target);
        args.push(OsString::from(self.target.ssh_destination()));
        args.push(OsString::from(command));

        let output = self
            .client
            .run_blocking(&self.client.config.ssh_bin, args)
            .await?;
        Ok(RemoteCommandOutput {
            exit_code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// Copies `local` to `remote`, creating the remote parent first.
    ///
    /// Directory creation is best-effort; `scp` reports the real failure if
    /// the parent is still missing.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::MissingLocal`] when the source does not exist
    /// and [`RemoteError::Transfer`] when `scp` fails.
    pub async fn copy(&self, local: &Utf8Path, remote: &str) -> Result<(), RemoteError> {
        let expanded = Utf8PathBuf::from(expand_tilde(local.as_str()));
        if !expanded.exists() {
            return Err(RemoteError::MissingLocal { path: expanded });
        }

        if let Some(parent) = remote_parent(remote) {
            let mkdir = mkdir_command(parent);
            match self.execute(&mkdir).await {
                Ok(output) if output.exit_code == Some(0) => {}
                Ok(output) => debug!(
                    parent,
                    status = ?output.exit_code,
                    "remote mkdir failed; letting scp report"
                ),
                Err(err) => debug!(parent, error = %err, "remote mkdir failed; letting scp report"),
            }
        }

        let mut args = self.client.scp_options(&self.target);
        if expanded.is_dir() {
            args.push(OsString::from("-r"));
        }
        args.push(OsString::from(expanded.as_str()));
        args.push(OsString::from(self.target.scp_destination(remote)));

        let output = self
            .client
            .run_blocking(&self.client.config.scp_bin, args)
            .await?;
        if output.is_success() {
            return Ok(());
        }

        Err(RemoteError::Transfer {
            local: expanded,
            remote: remote.to_owned(),
            status_text: output.status_text(),
            stderr: output.stderr.trim().to_owned(),
        })
    }
}

fn remote_parent(remote: &str) -> Option<&str> {
    let (parent, _) = remote.trim_end_matches('/').rsplit_once('/')?;
    if parent.is_empty() || parent == "~" {
        None
    } else {
        Some(parent)
    }
}

/// `mkdir -p` for `parent`, leaving a leading `~/` unquoted so the remote
/// shell expands it.
fn mkdir_command(parent: &str) -> String {
    match parent.strip_prefix("~/") {
        Some(rest) => format!("mkdir -p ~/{}", escape(rest.into())),
        None => format!("mkdir -p {}", escape(parent.into())),
    }
}
