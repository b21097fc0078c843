//! Ephemeral SSH keys (IAM) and security groups.
//!
//! IAM keys are project wide, so Scaleway injects them into every new
//! instance of the project. The key is also passed through cloud-init so
//! the build user receives it regardless of the image's default user.

use reqwest::Method;
use tracing::warn;

use crate::provider::{AccessRuleRef, AccessRuleSpec, CredentialRef, CredentialRequest};

use super::types::{
    CreateSecurityGroupRequest, CreateSshKeyRequest, SecurityGroupEnvelope,
    SecurityGroupRuleRequest, SshKeyResponse,
};
use super::{ScalewayProvider, ScalewayProviderError};

impl ScalewayProvider {
    pub(super) async fn register_key(
        &self,
        request: &CredentialRequest,
    ) -> Result<CredentialRef, ScalewayProviderError> {
        let payload = CreateSshKeyRequest {
            name: &request.name,
            public_key: &request.public_key,
            project_id: &self.config.default_project_id,
        };
        let key: SshKeyResponse = self
            .http
            .send_json(Method::POST, &self.http.iam_url("ssh-keys"), &payload)
            .await?;
        Ok(CredentialRef {
            id: key.id,
            name: key.name,
        })
    }

    pub(super) async fn remove_key(
        &self,
        credential: &CredentialRef,
    ) -> Result<(), ScalewayProviderError> {
        self.http
            .delete(&self.http.iam_url(&format!("ssh-keys/{}", credential.id)))
            .await
    }

    /// Creates a stateful group that drops inbound traffic except the
    /// requested TCP ports. Removes the group again if a rule fails.
    pub(super) async fn create_security_group(
        &self,
        spec: &AccessRuleSpec,
    ) -> Result<AccessRuleRef, ScalewayProviderError> {
        let zone = self.zone_for(spec.zone.as_deref());
        let payload = CreateSecurityGroupRequest {
            name: &spec.name,
            project: &self.config.default_project_id,
            description: "ofen build access",
            stateful: true,
            inbound_default_policy: "drop",
            outbound_default_policy: "accept",
        };
        let created: SecurityGroupEnvelope = self
            .http
            .send_json(
                Method::POST,
                &self.http.instance_url(zone, "security_groups"),
                &payload,
            )
            .await?;
        let group = AccessRuleRef {
            id: created.security_group.id,
            name: created.security_group.name,
            zone: Some(zone.to_owned()),
        };

        for port in &spec.inbound_tcp_ports {
            let rule = SecurityGroupRuleRequest {
                action: "accept",
                direction: "inbound",
                protocol: "TCP",
                ip_range: "0.0.0.0/0",
                dest_port_from: *port,
            };
            let url = self
                .http
                .instance_url(zone, &format!("security_groups/{}/rules", group.id));
            if let Err(err) = self
                .http
                .send_empty(Method::POST, &url, Some(&rule))
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
    ) -> Result<(), ScalewayProviderError> {
        let zone = self.zone_for(rule.zone.as_deref());
        self.http
            .delete(
                &self
                    .http
                    .instance_url(zone, &format!("security_groups/{}", rule.id)),
            )
            .await
    }
}
