//! Binary entry point for the `ofen` image baker.

mod cli;

use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use camino::Utf8PathBuf;
use clap::{CommandFactory, Parser};
use thiserror::Error;
use tracing::error;
use tracing_subscriber::EnvFilter;

use ofen::builder::PolicyConfig;
use ofen::config::{ConfigError, LibvirtConfig, OpenStackConfig, ScalewayConfig};
use ofen::driver::{self, DriverError, ProviderKind, UnknownProvider};
use ofen::libvirt::{LibvirtError, LibvirtProvider};
use ofen::openstack::{OpenStackError, OpenStackProvider, OpenStackSession};
use ofen::provider::Provider;
use ofen::remote::{ProcessCommandRunner, RemoteError, SshClient, SshConfig};
use ofen::scaleway::{ScalewayProvider, ScalewayProviderError};
use ofen::spec::{SpecDocument, SpecError};

use cli::{Cli, Command};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Spec(#[from] SpecError),
    #[error(transparent)]
    Provider(#[from] UnknownProvider),
    #[error("backend setup failed: {0}")]
    Backend(String),
    #[error("ssh setup failed: {0}")]
    Ssh(#[from] RemoteError),
    #[error("path is not valid UTF-8: {0}")]
    Path(String),
    #[error("{0}")]
    Driver(String),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl<E: std::error::Error + 'static> From<DriverError<E>> for CliError {
    fn from(value: DriverError<E>) -> Self {
        Self::Driver(value.to_string())
    }
}

impl From<ScalewayProviderError> for CliError {
    fn from(value: ScalewayProviderError) -> Self {
        Self::Backend(value.to_string())
    }
}

impl From<OpenStackError> for CliError {
    fn from(value: OpenStackError) -> Self {
        Self::Backend(value.to_string())
    }
}

impl From<LibvirtError> for CliError {
    fn from(value: LibvirtError) -> Self {
        Self::Backend(value.to_string())
    }
}

/// What to run once a provider is ready.
enum Operation {
    Bake(SpecDocument),
    List,
    Delete(String),
    Info(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "ofen failed");
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ofen=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn report_error(err: &CliError) {
    writeln!(io::stderr(), "error: {err}").ok();
}

async fn run(cli: Cli) -> Result<i32, CliError> {
    let Some(command) = cli.command else {
        let mut stderr = io::stderr();
        writeln!(stderr, "{}", Cli::command().render_help())?;
        return Ok(1);
    };

    let operation = match command {
        Command::Bake(args) => Operation::Bake(SpecDocument::load(&utf8(args.spec)?)?),
        Command::List => Operation::List,
        Command::Delete(args) => Operation::Delete(args.image),
        Command::Info(args) => Operation::Info(args.image),
    };
    let document = match &operation {
        Operation::Bake(document) => Some(document),
        Operation::List | Operation::Delete(_) | Operation::Info(_) => None,
    };
    let kind = ProviderKind::select(cli.provider.as_deref(), document)?;

    match kind {
        ProviderKind::Scaleway => {
            let provider = ScalewayProvider::new(ScalewayConfig::load_without_cli_args()?)?;
            dispatch(&provider, operation).await
        }
        ProviderKind::OpenStack => {
            let config = OpenStackConfig::load_without_cli_args()?;
            let session = OpenStackSession::authenticate(&config).await?;
            dispatch(&OpenStackProvider::new(session), operation).await
        }
        ProviderKind::Libvirt => {
            let image_dir = cli.image_dir.map(utf8).transpose()?;
            let provider = LibvirtProvider::new(
                LibvirtConfig::load_without_cli_args()?,
                cli.uri,
                image_dir,
                ProcessCommandRunner,
            )?;
            dispatch(&provider, operation).await
        }
    }
}

async fn dispatch<P: Provider>(provider: &P, operation: Operation) -> Result<i32, CliError> {
    match operation {
        Operation::Bake(document) => {
            let policy = PolicyConfig::load_without_cli_args()?.into_policy()?;
            let ssh = SshClient::with_streaming_runner(SshConfig::load_without_cli_args()?)?;
            let outcome = driver::bake(provider, ssh, policy, document, interrupted()).await?;
            driver::write_bake_outcome(&mut io::stdout().lock(), &outcome)?;
            Ok(outcome.exit_code())
        }
        Operation::List => {
            let images = driver::list(provider).await?;
            driver::write_listing(&mut io::stdout().lock(), &images)?;
            Ok(0)
        }
        Operation::Info(name) => {
            let details = driver::info(provider, &name).await?;
            driver::write_details(&mut io::stdout().lock(), &details)?;
            Ok(0)
        }
        Operation::Delete(name) => {
            driver::delete(provider, &name).await?;
            writeln!(io::stdout().lock(), "deleted {name}")?;
            Ok(0)
        }
    }
}

/// Resolves on Ctrl-C. If the handler cannot be installed the build simply
/// runs without interruption.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn utf8(path: PathBuf) -> Result<Utf8PathBuf, CliError> {
    Utf8PathBuf::from_path_buf(path).map_err(|raw| CliError::Path(raw.display().to_string()))
}
