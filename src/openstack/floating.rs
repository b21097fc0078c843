//! Floating IPs allocated through Neutron for builds that ask for one.

use std::net::IpAddr;

use reqwest::Method;
use tracing::{debug, info};

use crate::provider::{InstanceRef, PublicAddressRef};

use super::session::query_url;
use super::types::{
    FloatingIpBody, FloatingIpEnvelope, FloatingIpRequest, NetworkList, NewFloatingIp, PortList,
};
use super::{OpenStackError, OpenStackProvider};

/// Converts Neutron's allocation into the handle kept by the builder.
pub(crate) fn public_address_of(body: FloatingIpBody) -> Result<PublicAddressRef, OpenStackError> {
    let address = body
        .floating_ip_address
        .parse::<IpAddr>()
        .map_err(|err| {
            OpenStackError::transport(format!(
                "floating IP {} has an invalid address `{}`: {err}",
                body.id, body.floating_ip_address
            ))
        })?;
    Ok(PublicAddressRef {
        id: body.id,
        address,
    })
}

impl OpenStackProvider {
    /// Allocates a floating IP on the first external network and binds it
    /// to the server's port.
    pub(super) async fn allocate_floating_ip(
        &self,
        instance: &InstanceRef,
    ) -> Result<PublicAddressRef, OpenStackError> {
        let port = self.server_port(instance).await?;
        let network = self.external_network().await?;
        let payload = FloatingIpRequest {
            floatingip: NewFloatingIp {
                floating_network_id: &network,
                port_id: &port,
                description: "temporary floating IP for ofen builds",
            },
        };
        let created: FloatingIpEnvelope = self
            .session
            .send_json(
                Method::POST,
                &self.session.network_url("floatingips"),
                &payload,
            )
            .await?;
        let address = public_address_of(created.floatingip)?;
        info!(floating_ip = %address.address, id = %address.id, "floating IP allocated");
        Ok(address)
    }

    pub(super) async fn release_floating_ip(
        &self,
        address: &PublicAddressRef,
    ) -> Result<(), OpenStackError> {
        let url = self
            .session
            .network_url(&format!("floatingips/{}", address.id));
        match self.session.delete(&url).await {
            Err(OpenStackError::Api { status: 404, .. }) => {
                debug!(id = %address.id, "floating IP already released");
                Ok(())
            }
            other => other,
        }
    }

    async fn server_port(&self, instance: &InstanceRef) -> Result<String, OpenStackError> {
        let url = query_url(
            &self.session.network_url("ports"),
            &[("device_id", instance.id.as_str())],
        )?;
        let list: PortList = self.session.get(&url).await?;
        list.ports
            .into_iter()
            .next()
            .map(|port| port.id)
            .ok_or_else(|| OpenStackError::NotFound {
                kind: "port",
                name: instance.id.clone(),
            })
    }

    async fn external_network(&self) -> Result<String, OpenStackError> {
        let url = query_url(
            &self.session.network_url("networks"),
            &[("router:external", "true")],
        )?;
        let list: NetworkList = self.session.get(&url).await?;
        list.networks
            .into_iter()
            .next()
            .map(|network| network.id)
            .ok_or_else(|| OpenStackError::NotFound {
                kind: "external network",
                name: String::from("router:external=true"),
            })
    }
}
