//! Nova keypairs and Neutron security groups.

use reqwest::Method;
use tracing::warn;

use crate::provider::{AccessRuleRef, AccessRuleSpec, CredentialRef, CredentialRequest};

use super::types::{
    KeypairEnvelope, KeypairRequest, KeypairResponse, NewSecurityGroup, SecurityGroupRequest,
    SecurityGroupResponse, SecurityGroupRule, SecurityGroupRuleEnvelope,
};
use super::{OpenStackError, OpenStackProvider};

impl OpenStackProvider {
    /// Imports the public key as a Nova keypair. Nova keys keypairs by name,
    /// so the name doubles as the identifier.
    pub(super) async fn import_keypair(
        &self,
        request: &CredentialRequest,
    ) -> Result<CredentialRef, OpenStackError> {
        let payload = KeypairEnvelope {
            keypair: KeypairRequest {
                name: &request.name,
                public_key: &request.public_key,
            },
        };
        let created: KeypairResponse = self
            .session
            .send_json(Method::POST, &self.session.compute_url("os-keypairs"), &payload)
            .await?;
        Ok(CredentialRef {
            id: created.keypair.name.clone(),
            name: created.keypair.name,
        })
    }

    pub(super) async fn delete_keypair(
        &self,
        credential: &CredentialRef,
    ) -> Result<(), OpenStackError> {
        self.session
            .delete(
                &self
                    .session
                    .compute_url(&format!("os-keypairs/{}", credential.id)),
            )
            .await
    }

    /// Creates a group with the requested ingress ports. Neutron adds the
    /// default egress rules itself.
    pub(super) async fn create_security_group(
        &self,
        spec: &AccessRuleSpec,
    ) -> Result<AccessRuleRef, OpenStackError> {
        let payload = SecurityGroupRequest {
            security_group: NewSecurityGroup {
                name: &spec.name,
                description: "temporary security group for ofen builds",
            },
        };
        let created: SecurityGroupResponse = self
            .session
            .send_json(
                Method::POST,
                &self.session.network_url("security-groups"),
                &payload,
            )
            .await?;
        let group = AccessRuleRef {
            id: created.security_group.id,
            name: created.security_group.name,
            zone: spec.zone.clone(),
        };

        for port in &spec.inbound_tcp_ports {
            let rule = SecurityGroupRuleEnvelope {
                security_group_rule: SecurityGroupRule {
                    security_group_id: &group.id,
                    direction: "ingress",
                    ethertype: "IPv4",
                    protocol: "tcp",
                    port_range_min: *port,
                    port_range_max: *port,
                    remote_ip_prefix: "0.0.0.0/0",
                },
            };
            if let Err(err) = self
                .session
                .send_raw(
                    Method::POST,
                    &self.session.network_url("security-group-rules"),
                    &rule,
                )
                .await
            {
                if let Err(cleanup) = self.delete_security_group(&group).await {
                    warn!(group = %group.id, error = %cleanup, "could not remove partial security group");
                }
                return Err(err);
            }
        }
        Ok(group)
    }

    pub(super) async fn delete_security_group(
        &self,
        rule: &AccessRuleRef,
    ) -> Result<(), OpenStackError> {
        self.session
            .delete(
                &self
                    .session
                    .network_url(&format!("security-groups/{}", rule.id)),
            )
            .await
    }
}
