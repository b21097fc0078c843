//! Wire types for Keystone, Nova, Neutron and Glance.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata key linking a server to the keypair it was launched with.
pub(crate) const CREDENTIAL_METADATA_KEY: &str = "ofen-key";

#[derive(Deserialize)]
pub(crate) struct TokenEnvelope {
    pub(crate) token: TokenBody,
}

#[derive(Deserialize)]
pub(crate) struct TokenBody {
    #[serde(default)]
    pub(crate) catalog: Vec<CatalogEntry>,
    pub(crate) project: ProjectBody,
}

#[derive(Deserialize)]
pub(crate) struct ProjectBody {
    pub(crate) id: String,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct CatalogEntry {
    #[serde(rename = "type")]
    pub(crate) service_type: String,
    #[serde(default)]
    pub(crate) endpoints: Vec<CatalogEndpoint>,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct CatalogEndpoint {
    pub(crate) interface: String,
    #[serde(default)]
    pub(crate) region_id: Option<String>,
    pub(crate) url: String,
}

#[derive(Serialize)]
pub(crate) struct KeypairEnvelope<'a> {
    pub(crate) keypair: KeypairRequest<'a>,
}

#[derive(Serialize)]
pub(crate) struct KeypairRequest<'a> {
    pub(crate) name: &'a str,
    pub(crate) public_key: &'a str,
}

#[derive(Deserialize)]
pub(crate) struct KeypairResponse {
    pub(crate) keypair: KeypairBody,
}

#[derive(Deserialize)]
pub(crate) struct KeypairBody {
    pub(crate) name: String,
}

#[derive(Serialize)]
pub(crate) struct SecurityGroupRequest<'a> {
    pub(crate) security_group: NewSecurityGroup<'a>,
}

#[derive(Serialize)]
pub(crate) struct NewSecurityGroup<'a> {
    pub(crate) name: &'a str,
    pub(crate) description: &'a str,
}

#[derive(Deserialize)]
pub(crate) struct SecurityGroupResponse {
    pub(crate) security_group: NamedResource,
}

#[derive(Serialize)]
pub(crate) struct SecurityGroupRuleEnvelope<'a> {
    pub(crate) security_group_rule: SecurityGroupRule<'a>,
}

#[derive(Serialize)]
pub(crate) struct SecurityGroupRule<'a> {
    pub(crate) security_group_id: &'a str,
    pub(crate) direction: &'a str,
    pub(crate) ethertype: &'a str,
    pub(crate) protocol: &'a str,
    pub(crate) port_range_min: u16,
    pub(crate) port_range_max: u16,
    pub(crate) remote_ip_prefix: &'a str,
}

/// Any resource with an id and a name.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct NamedResource {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) name: String,
}

#[derive(Deserialize)]
pub(crate) struct NetworkList {
    pub(crate) networks: Vec<NamedResource>,
}

#[derive(Deserialize)]
pub(crate) struct PortList {
    pub(crate) ports: Vec<NamedResource>,
}

#[derive(Serialize)]
pub(crate) struct FloatingIpRequest<'a> {
    pub(crate) floatingip: NewFloatingIp<'a>,
}

#[derive(Serialize)]
pub(crate) struct NewFloatingIp<'a> {
    pub(crate) floating_network_id: &'a str,
    pub(crate) port_id: &'a str,
    pub(crate) description: &'a str,
}

#[derive(Deserialize)]
pub(crate) struct FloatingIpEnvelope {
    pub(crate) floatingip: FloatingIpBody,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct FloatingIpBody {
    pub(crate) id: String,
    pub(crate) floating_ip_address: String,
}

#[derive(Deserialize)]
pub(crate) struct FlavorList {
    pub(crate) flavors: Vec<NamedResource>,
}

#[derive(Serialize)]
pub(crate) struct CreateServerEnvelope {
    pub(crate) server: CreateServer,
}

#[derive(Serialize)]
pub(crate) struct CreateServer {
    pub(crate) name: String,
    #[serde(rename = "flavorRef")]
    pub(crate) flavor_ref: String,
    #[serde(rename = "imageRef")]
    pub(crate) image_ref: String,
    pub(crate) key_name: String,
    pub(crate) security_groups: Vec<SecurityGroupName>,
    pub(crate) networks: Value,
    pub(crate) metadata: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) block_device_mapping_v2: Option<Vec<BlockDevice>>,
}

#[derive(Serialize)]
pub(crate) struct SecurityGroupName {
    pub(crate) name: String,
}

#[derive(Serialize)]
pub(crate) struct BlockDevice {
    pub(crate) boot_index: u32,
    pub(crate) uuid: String,
    pub(crate) source_type: &'static str,
    pub(crate) destination_type: &'static str,
    pub(crate) volume_size: u32,
    pub(crate) delete_on_termination: bool,
}

#[derive(Deserialize)]
pub(crate) struct CreatedServerEnvelope {
    pub(crate) server: CreatedServer,
}

#[derive(Deserialize)]
pub(crate) struct CreatedServer {
    pub(crate) id: String,
}

#[derive(Deserialize)]
pub(crate) struct ServerEnvelope {
    pub(crate) server: ServerBody,
}

#[derive(Deserialize)]
pub(crate) struct ServerList {
    pub(crate) servers: Vec<ServerBody>,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ServerBody {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) status: String,
    #[serde(default)]
    pub(crate) key_name: Option<String>,
    #[serde(default)]
    pub(crate) metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub(crate) addresses: BTreeMap<String, Vec<ServerAddress>>,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ServerAddress {
    pub(crate) addr: String,
    #[serde(default)]
    pub(crate) version: u8,
    #[serde(rename = "OS-EXT-IPS:type", default)]
    pub(crate) kind: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct CreateImageAction<'a> {
    #[serde(rename = "createImage")]
    pub(crate) create_image: CreateImage<'a>,
}

#[derive(Serialize)]
pub(crate) struct CreateImage<'a> {
    pub(crate) name: &'a str,
    pub(crate) metadata: BTreeMap<&'a str, &'a str>,
}

#[derive(Deserialize)]
pub(crate) struct CreateImageResponse {
    pub(crate) image_id: String,
}

#[derive(Deserialize)]
pub(crate) struct GlanceImageList {
    pub(crate) images: Vec<Value>,
}
