//! Local hypervisor provider driven through `virsh`, `qemu-img` and an ISO
//! builder.
//!
//! Nothing is registered with the hypervisor before launch: the credential
//! is the key file in the work area and the access rule is the libvirt
//! network itself. The guest disk, seed ISO and domain XML all live in the
//! work area, so removing it is the last teardown step.

mod domain;
mod error;
mod files;
mod guest;
mod images;
mod sizes;

use std::ffi::OsString;
use std::sync::Mutex;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::config::LibvirtConfig;
use crate::provider::{
    AccessRuleRef, AccessRuleSpec, CredentialRef, CredentialRequest, ImageDetails, ImageRef,
    ImageStatus, ImageSummary, InstanceAddresses, InstanceRef, InstanceStatus, LaunchRequest,
    Provider, ProviderFuture, SnapshotRequest,
};
use crate::remote::{CommandOutput, CommandRunner};
use crate::spec::BuildSpec;

pub use domain::{DomainSpec, map_domstate, parse_disk_source, parse_domifaddr, render_domain_xml};
pub use error::LibvirtError;
pub use sizes::{GuestResources, resolve_resources};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Guest preparation run before the disk is captured.
///
/// Removing the build key ends SSH access, so it shares the last command.
pub const SYSPREP_COMMANDS: &[&str] = &[
    "sudo rm -f /etc/ssh/ssh_host_*",
    "sudo truncate -s 0 /etc/machine-id",
    "sudo rm -f /var/lib/dbus/machine-id",
    "sudo cloud-init clean --logs",
    "sudo rm -rf /tmp/* /var/tmp/*",
    "sudo rm -f /etc/udev/rules.d/70-persistent-net.rules",
    "sudo find /var/log -type f -exec truncate -s 0 {} +",
    "rm -f ~/.bash_history && sudo rm -f /root/.bash_history",
    "rm -f ~/.ssh/authorized_keys && sync",
];

/// Provider that bakes qcow2 images on a local libvirt hypervisor.
pub struct LibvirtProvider<R: CommandRunner> {
    config: LibvirtConfig,
    uri_override: Option<String>,
    image_dir: Utf8PathBuf,
    runner: R,
    poll_interval: Duration,
    launch_uri: Mutex<Option<String>>,
}

impl<R> LibvirtProvider<R>
where
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    /// Creates a provider. `uri` and `image_dir` come from the command line
    /// and take precedence over the spec and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LibvirtError::Config`] when the configuration is
    /// incomplete.
    pub fn new(
        config: LibvirtConfig,
        uri: Option<String>,
        image_dir: Option<Utf8PathBuf>,
        runner: R,
    ) -> Result<Self, LibvirtError> {
        config.validate()?;
        let resolved_dir = image_dir.unwrap_or_else(|| Utf8PathBuf::from(&config.image_dir));
        Ok(Self {
            config,
            uri_override: uri.filter(|value| !value.trim().is_empty()),
            image_dir: resolved_dir,
            runner,
            poll_interval: POLL_INTERVAL,
            launch_uri: Mutex::new(None),
        })
    }

    /// Overrides the status poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Connection URI: `--uri`, then the spec's `region`, then
    /// configuration.
    #[must_use]
    pub fn uri_for(&self, spec: Option<&BuildSpec>) -> String {
        self.uri_override
            .clone()
            .or_else(|| spec.and_then(|build| build.region.clone()))
            .unwrap_or_else(|| self.config.uri.clone())
    }

    /// Where an image named `name` lives. Paths are used as given.
    #[must_use]
    pub fn image_path(&self, name: &str) -> Utf8PathBuf {
        if name.contains('/') {
            Utf8PathBuf::from(name)
        } else if name.ends_with(".qcow2") {
            self.image_dir.join(name)
        } else {
            self.image_dir.join(format!("{name}.qcow2"))
        }
    }

    /// Output path for a bake of `spec`.
    #[must_use]
    pub fn output_path(&self, spec: &BuildSpec) -> Utf8PathBuf {
        spec.output_path
            .clone()
            .unwrap_or_else(|| self.image_path(&spec.name))
    }

    fn base_image(spec: &BuildSpec) -> Option<&str> {
        spec.base_image_for("path")
            .or_else(|| spec.base_image_for("name"))
    }

    async fn run_tool(
        &self,
        program: &str,
        args: Vec<OsString>,
    ) -> Result<CommandOutput, LibvirtError> {
        debug!(program, ?args, "running hypervisor tool");
        let runner = self.runner.clone();
        let program_owned = program.to_owned();
        let output = tokio::task::spawn_blocking(move || runner.run(&program_owned, &args))
            .await
            .map_err(|err| LibvirtError::Command {
                program: program.to_owned(),
                action: String::from("join"),
                status: String::from("unknown"),
                stderr: err.to_string(),
            })??;
        Ok(output)
    }

    /// Runs a tool and turns a non-zero exit into [`LibvirtError::Command`].
    async fn run_checked(
        &self,
        program: &str,
        action: &str,
        args: Vec<OsString>,
    ) -> Result<String, LibvirtError> {
        let output = self.run_tool(program, args).await?;
        if output.is_success() {
            return Ok(output.stdout);
        }
        Err(LibvirtError::Command {
            program: program.to_owned(),
            action: action.to_owned(),
            status: output.status_text(),
            stderr: output.stderr.trim().to_owned(),
        })
    }

    async fn virsh(&self, uri: &str, action: &str, rest: &[&str]) -> Result<String, LibvirtError> {
        self.run_checked(&self.config.virsh_bin, action, virsh_args(uri, rest))
            .await
    }

    async fn qemu_img(&self, action: &str, args: &[&str]) -> Result<String, LibvirtError> {
        self.run_checked(
            &self.config.qemu_img_bin,
            action,
            args.iter().map(OsString::from).collect(),
        )
        .await
    }
}

fn virsh_args(uri: &str, rest: &[&str]) -> Vec<OsString> {
    let mut args = vec![OsString::from("-c"), OsString::from(uri)];
    args.extend(rest.iter().map(OsString::from));
    args
}

/// Text stored in the domain description to find it from its credential.
#[must_use]
pub fn credential_marker(credential: &str) -> String {
    format!("ofen-key:{credential}")
}

impl<R> Provider for LibvirtProvider<R>
where
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    type Error = LibvirtError;

    fn name(&self) -> &'static str {
        "libvirt"
    }

    fn requires_region(&self) -> bool {
        false
    }

    fn check_spec(&self, spec: &BuildSpec) -> Result<(), Self::Error> {
        resolve_resources(spec)?;
        if Self::base_image(spec).is_none() {
            return Err(LibvirtError::Spec(String::from(
                "base_image needs a `path` entry naming a local disk image",
            )));
        }
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn work_area_root(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.config.work_root)
    }

    fn pre_image_commands(&self) -> Vec<String> {
        SYSPREP_COMMANDS.iter().map(|command| (*command).to_owned()).collect()
    }

    fn create_credential<'a>(
        &'a self,
        request: &'a CredentialRequest,
    ) -> ProviderFuture<'a, CredentialRef, Self::Error> {
        Box::pin(async move {
            Ok(CredentialRef {
                id: request.name.clone(),
                name: request.name.clone(),
            })
        })
    }

    fn delete_credential<'a>(
        &'a self,
        _credential: &'a CredentialRef,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async { Ok(()) })
    }

    fn create_access_rule<'a>(
        &'a self,
        spec: &'a AccessRuleSpec,
    ) -> ProviderFuture<'a, AccessRuleRef, Self::Error> {
        Box::pin(async move {
            Ok(AccessRuleRef {
                id: spec.name.clone(),
                name: spec.name.clone(),
                zone: None,
            })
        })
    }

    fn delete_access_rule<'a>(
        &'a self,
        _rule: &'a AccessRuleRef,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async { Ok(()) })
    }

    fn launch<'a>(
        &'a self,
        request: &'a LaunchRequest<'a>,
    ) -> ProviderFuture<'a, InstanceRef, Self::Error> {
        Box::pin(self.launch_domain(request))
    }

    fn poll_status<'a>(
        &'a self,
        instance: &'a InstanceRef,
    ) -> ProviderFuture<'a, InstanceStatus, Self::Error> {
        Box::pin(self.domain_status(instance))
    }

    fn resolve_address<'a>(
        &'a self,
        instance: &'a InstanceRef,
    ) -> ProviderFuture<'a, InstanceAddresses, Self::Error> {
        Box::pin(self.domain_addresses(instance))
    }

    fn terminate<'a>(&'a self, instance: &'a InstanceRef) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(self.remove_domain(instance))
    }

    fn find_instances_by_credential<'a>(
        &'a self,
        credential: &'a CredentialRef,
    ) -> ProviderFuture<'a, Vec<InstanceRef>, Self::Error> {
        Box::pin(self.domains_marked_with(credential))
    }

    fn snapshot<'a>(
        &'a self,
        instance: &'a InstanceRef,
        request: &'a SnapshotRequest<'a>,
    ) -> ProviderFuture<'a, ImageRef, Self::Error> {
        Box::pin(self.capture_disk(instance, request))
    }

    fn image_status<'a>(
        &'a self,
        image: &'a ImageRef,
    ) -> ProviderFuture<'a, ImageStatus, Self::Error> {
        Box::pin(async move {
            let status = if files::exists(Utf8Path::new(&image.id)) {
                ImageStatus::Available
            } else {
                ImageStatus::Failed
            };
            Ok(status)
        })
    }

    fn existing_image<'a>(
        &'a self,
        spec: &'a BuildSpec,
    ) -> ProviderFuture<'a, Option<ImageRef>, Self::Error> {
        Box::pin(async move {
            let path = self.output_path(spec);
            Ok(files::exists(&path).then(|| ImageRef {
                id: path.to_string(),
                name: spec.name.clone(),
                zone: None,
            }))
        })
    }

    fn list_images(&self) -> ProviderFuture<'_, Vec<ImageSummary>, Self::Error> {
        Box::pin(async move { self.local_images() })
    }

    fn image_info<'a>(&'a self, name: &'a str) -> ProviderFuture<'a, ImageDetails, Self::Error> {
        Box::pin(self.describe_image(name))
    }

    fn delete_image<'a>(&'a self, name: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move { self.remove_image(name) })
    }
}
