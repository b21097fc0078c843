//! Server launch, status and termination through Nova.

use std::collections::BTreeMap;
use std::net::IpAddr;

use reqwest::Method;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::provider::{
    CredentialRef, InstanceAddresses, InstanceRef, InstanceStatus, LaunchRequest,
};

use super::session::query_url;
use super::types::{
    BlockDevice, CREDENTIAL_METADATA_KEY, CreateServer, CreateServerEnvelope,
    CreatedServerEnvelope, FlavorList, NetworkList, SecurityGroupName, ServerBody,
    ServerEnvelope, ServerList,
};
use super::{OpenStackError, OpenStackProvider};

/// Maps a Nova server status onto the provider-neutral status.
pub(crate) fn map_status(status: &str) -> InstanceStatus {
    match status {
        "ACTIVE" => InstanceStatus::Running,
        "SHUTOFF" | "SUSPENDED" | "PAUSED" => InstanceStatus::Stopped,
        "DELETED" | "SOFT_DELETED" => InstanceStatus::Terminated,
        "ERROR" => InstanceStatus::Failed,
        _ => InstanceStatus::Pending,
    }
}

/// Splits the server's IPv4 addresses into floating (public) and fixed
/// (private) slots.
pub(crate) fn addresses_of(server: &ServerBody) -> InstanceAddresses {
    let mut found = InstanceAddresses::default();
    for address in server.addresses.values().flatten() {
        if address.version != 4 {
            continue;
        }
        let Ok(ip) = address.addr.parse::<IpAddr>() else {
            continue;
        };
        match address.kind.as_deref() {
            Some("floating") => {
                found.public.get_or_insert(ip);
            }
            _ => {
                found.private.get_or_insert(ip);
            }
        }
    }
    found
}

/// Whether the server was launched with `credential`.
pub(crate) fn launched_with(server: &ServerBody, credential: &CredentialRef) -> bool {
    server.key_name.as_deref() == Some(credential.name.as_str())
        || server
            .metadata
            .get(CREDENTIAL_METADATA_KEY)
            .is_some_and(|name| *name == credential.name)
}

impl OpenStackProvider {
    pub(super) async fn boot_server(
        &self,
        request: &LaunchRequest<'_>,
    ) -> Result<InstanceRef, OpenStackError> {
        let spec = request.spec;
        let flavor = self.resolve_flavor(&spec.instance_type).await?;
        let image = self.resolve_base_image(spec).await?;
        let networks = match spec.network.as_deref() {
            Some(name) => json!([{ "uuid": self.resolve_network(name).await? }]),
            None => Value::String(String::from("auto")),
        };

        let (image_ref, block_device_mapping_v2) = match spec.volume_size {
            Some(volume_size) => (
                String::new(),
                Some(vec![BlockDevice {
                    boot_index: 0,
                    uuid: image,
                    source_type: "image",
                    destination_type: "volume",
                    volume_size,
                    delete_on_termination: true,
                }]),
            ),
            None => (image, None),
        };

        let payload = CreateServerEnvelope {
            server: CreateServer {
                name: request.name.to_owned(),
                flavor_ref: flavor,
                image_ref,
                key_name: request.credential.name.clone(),
                security_groups: vec![SecurityGroupName {
                    name: request.access_rule.name.clone(),
                }],
                networks,
                metadata: BTreeMap::from([(
                    String::from(CREDENTIAL_METADATA_KEY),
                    request.credential.name.clone(),
                )]),
                block_device_mapping_v2,
            },
        };
        let created: CreatedServerEnvelope = self
            .session
            .send_json(Method::POST, &self.session.compute_url("servers"), &payload)
            .await?;
        info!(instance = %created.server.id, "server submitted");

        Ok(InstanceRef {
            id: created.server.id,
            name: request.name.to_owned(),
            zone: self.session.region_label().to_owned(),
        })
    }

    async fn resolve_flavor(&self, wanted: &str) -> Result<String, OpenStackError> {
        let list: FlavorList = self
            .session
            .get(&self.session.compute_url("flavors"))
            .await?;
        list.flavors
            .into_iter()
            .find(|flavor| flavor.name == wanted || flavor.id == wanted)
            .map(|flavor| flavor.id)
            .ok_or_else(|| OpenStackError::NotFound {
                kind: "flavour",
                name: wanted.to_owned(),
            })
    }

    async fn resolve_network(&self, name: &str) -> Result<String, OpenStackError> {
        let url = query_url(&self.session.network_url("networks"), &[("name", name)])?;
        let list: NetworkList = self.session.get(&url).await?;
        list.networks
            .into_iter()
            .next()
            .map(|network| network.id)
            .ok_or_else(|| OpenStackError::NotFound {
                kind: "network",
                name: name.to_owned(),
            })
    }

    /// Reads the server, mapping a 404 to `None`.
    pub(super) async fn fetch_server(
        &self,
        instance: &InstanceRef,
    ) -> Result<Option<ServerBody>, OpenStackError> {
        let url = self.session.compute_url(&format!("servers/{}", instance.id));
        match self.session.get::<ServerEnvelope>(&url).await {
            Ok(envelope) => Ok(Some(envelope.server)),
            Err(OpenStackError::Api { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub(super) async fn delete_server(&self, instance: &InstanceRef) -> Result<(), OpenStackError> {
        let url = self.session.compute_url(&format!("servers/{}", instance.id));
        match self.session.delete(&url).await {
            Err(OpenStackError::Api { status: 404, .. }) => {
                debug!(instance = %instance.id, "server already gone");
                Ok(())
            }
            other => other,
        }
    }

    pub(super) async fn servers_with_key(
        &self,
        credential: &CredentialRef,
    ) -> Result<Vec<InstanceRef>, OpenStackError> {
        let list: ServerList = self
            .session
            .get(&self.session.compute_url("servers/detail"))
            .await?;
        Ok(list
            .servers
            .into_iter()
            .filter(|server| launched_with(server, credential))
            .map(|server| InstanceRef {
                id: server.id,
                name: server.name,
                zone: self.session.region_label().to_owned(),
            })
            .collect())
    }

    /// Stops the server before imaging and waits for `SHUTOFF`.
    pub(super) async fn stop_server(&self, instance: &InstanceRef) -> Result<(), OpenStackError> {
        let Some(server) = self.fetch_server(instance).await? else {
            return Err(OpenStackError::NotFound {
                kind: "server",
                name: instance.id.clone(),
            });
        };
        if server.status != "SHUTOFF" {
            let url = self
                .session
                .compute_url(&format!("servers/{}/action", instance.id));
            self.session
                .send_raw(Method::POST, &url, &json!({ "os-stop": null }))
                .await?;
        }

        loop {
            match self.fetch_server(instance).await? {
                Some(current) if current.status == "SHUTOFF" => return Ok(()),
                Some(current) if current.status == "ERROR" => {
                    return Err(OpenStackError::Api {
                        status: 500,
                        message: format!("server {} entered ERROR while stopping", instance.id),
                    });
                }
                Some(_) => tokio::time::sleep(self.poll_interval).await,
                None => {
                    return Err(OpenStackError::NotFound {
                        kind: "server",
                        name: instance.id.clone(),
                    });
                }
            }
        }
    }
}
