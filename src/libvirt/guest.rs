//! Domain lifecycle: disk preparation, seed ISO, define and start, status,
//! addresses and removal.

use std::ffi::OsString;

use camino::Utf8Path;
use tracing::{debug, info};

use crate::cloud_init::{render_meta_data, render_user_data};
use crate::provider::{CredentialRef, InstanceAddresses, InstanceRef, InstanceStatus, LaunchRequest};
use crate::remote::CommandRunner;

use super::domain::{DomainSpec, map_domstate, parse_domifaddr, render_domain_xml};
use super::error::is_missing_domain;
use super::{LibvirtError, LibvirtProvider, credential_marker, files, resolve_resources};

/// Prefix every build domain carries.
const DOMAIN_PREFIX: &str = "ofen-build-";

impl<R> LibvirtProvider<R>
where
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    pub(super) async fn launch_domain(
        &self,
        request: &LaunchRequest<'_>,
    ) -> Result<InstanceRef, LibvirtError> {
        let spec = request.spec;
        let resources = resolve_resources(spec)?;
        let base = Self::base_image(spec)
            .ok_or_else(|| LibvirtError::Spec(String::from("base_image has no `path` entry")))?;
        let uri = self.uri_for(Some(spec));
        if let Ok(mut recorded) = self.launch_uri.lock() {
            *recorded = Some(uri.clone());
        }

        let area = request.work_area;
        let disk = area.join(format!("{}.qcow2", request.name));
        self.qemu_img("convert", &["convert", "-O", "qcow2", base, disk.as_str()])
            .await?;
        self.qemu_img("resize", &["resize", disk.as_str(), &resources.disk])
            .await?;

        let seed = self.build_seed(area, request).await?;

        let network = spec.network.as_deref().unwrap_or(&self.config.network);
        let xml = render_domain_xml(&DomainSpec {
            name: request.name,
            description: &credential_marker(&request.credential.name),
            resources: &resources,
            disk: &disk,
            seed: &seed,
            network,
        });
        let xml_path = area.join("domain.xml");
        files::write(&xml_path, &xml)?;

        self.virsh(&uri, "define", &["define", xml_path.as_str()])
            .await?;
        self.virsh(&uri, "start", &["start", request.name]).await?;
        info!(domain = request.name, %uri, "domain started");

        Ok(InstanceRef {
            id: request.name.to_owned(),
            name: request.name.to_owned(),
            zone: uri,
        })
    }

    /// Writes NoCloud user-data and meta-data and packs them into a
    /// `cidata` ISO.
    async fn build_seed(
        &self,
        area: &Utf8Path,
        request: &LaunchRequest<'_>,
    ) -> Result<camino::Utf8PathBuf, LibvirtError> {
        let user_data = area.join("user-data");
        let meta_data = area.join("meta-data");
        files::write(
            &user_data,
            &render_user_data(&request.spec.user, request.public_key),
        )?;
        files::write(&meta_data, &render_meta_data(request.name, request.name))?;

        let seed = area.join("seed.iso");
        let args = [
            "-output",
            seed.as_str(),
            "-volid",
            "cidata",
            "-joliet",
            "-rock",
            user_data.as_str(),
            meta_data.as_str(),
        ]
        .iter()
        .map(OsString::from)
        .collect();
        self.run_checked(&self.config.iso_bin, "seed", args).await?;
        Ok(seed)
    }

    pub(super) async fn domain_state(&self, instance: &InstanceRef) -> Result<Option<String>, LibvirtError> {
        match self
            .virsh(&instance.zone, "domstate", &["domstate", &instance.id])
            .await
        {
            Ok(state) => Ok(Some(state.trim().to_owned())),
            Err(LibvirtError::Command { stderr, .. }) if is_missing_domain(&stderr) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub(super) async fn domain_status(
        &self,
        instance: &InstanceRef,
    ) -> Result<InstanceStatus, LibvirtError> {
        Ok(self
            .domain_state(instance)
            .await?
            .map_or(InstanceStatus::Terminated, |state| map_domstate(&state)))
    }

    /// Asks the guest agent first, then the DHCP lease table. Either source
    /// may be unavailable while the guest boots.
    pub(super) async fn domain_addresses(
        &self,
        instance: &InstanceRef,
    ) -> Result<InstanceAddresses, LibvirtError> {
        let agent = self.domifaddr(instance, "agent").await?;
        let lease = self.domifaddr(instance, "lease").await?;
        Ok(InstanceAddresses {
            public: None,
            private: agent,
            lease,
        })
    }

    async fn domifaddr(
        &self,
        instance: &InstanceRef,
        source: &str,
    ) -> Result<Option<std::net::IpAddr>, LibvirtError> {
        let args = super::virsh_args(
            &instance.zone,
            &["domifaddr", &instance.id, "--source", source],
        );
        let output = self.run_tool(&self.config.virsh_bin, args).await?;
        if !output.is_success() {
            debug!(domain = %instance.id, source, stderr = %output.stderr.trim(), "no address yet");
            return Ok(None);
        }
        Ok(parse_domifaddr(&output.stdout))
    }

    /// Forces the domain off and undefines it. A missing domain is
    /// success.
    pub(super) async fn remove_domain(&self, instance: &InstanceRef) -> Result<(), LibvirtError> {
        let Some(state) = self.domain_state(instance).await? else {
            return Ok(());
        };
        if state != "shut off" {
            self.force_off(instance).await?;
        }
        match self
            .virsh(&instance.zone, "undefine", &["undefine", &instance.id])
            .await
        {
            Err(LibvirtError::Command { stderr, .. }) if is_missing_domain(&stderr) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    pub(super) async fn force_off(&self, instance: &InstanceRef) -> Result<(), LibvirtError> {
        match self
            .virsh(&instance.zone, "destroy", &["destroy", &instance.id])
            .await
        {
            Ok(_) => Ok(()),
            Err(LibvirtError::Command { stderr, .. })
                if is_missing_domain(&stderr) || stderr.contains("not running") =>
            {
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub(super) async fn domains_marked_with(
        &self,
        credential: &CredentialRef,
    ) -> Result<Vec<InstanceRef>, LibvirtError> {
        let uri = self
            .launch_uri
            .lock()
            .ok()
            .and_then(|recorded| recorded.clone())
            .unwrap_or_else(|| self.uri_for(None));
        let listing = self
            .virsh(&uri, "list", &["list", "--all", "--name"])
            .await?;
        let marker = credential_marker(&credential.name);

        let mut found = Vec::new();
        for name in listing
            .lines()
            .map(str::trim)
            .filter(|name| name.starts_with(DOMAIN_PREFIX))
        {
            let description = self.virsh(&uri, "desc", &["desc", name]).await?;
            if description.trim() == marker {
                found.push(InstanceRef {
                    id: name.to_owned(),
                    name: name.to_owned(),
                    zone: uri.clone(),
                });
            }
        }
        Ok(found)
    }
}
