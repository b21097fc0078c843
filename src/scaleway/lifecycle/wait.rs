//! Status, termination and lookup helpers for the Scaleway provider.

use crate::provider::{CredentialRef, InstanceRef};
use crate::scaleway::types::{ServerEnvelope, ServerList, credential_tag};

use super::super::{ScalewayProvider, ScalewayProviderError};
use super::InstanceSnapshot;

impl ScalewayProvider {
    /// Reads the server, mapping a 404 to `None`.
    pub(in crate::scaleway) async fn fetch_instance(
        &self,
        handle: &InstanceRef,
    ) -> Result<Option<InstanceSnapshot>, ScalewayProviderError> {
        let url = self
            .http
            .instance_url(&handle.zone, &format!("servers/{}", handle.id));
        match self.http.get::<ServerEnvelope>(&url).await {
            Ok(envelope) => Ok(Some(InstanceSnapshot::from(envelope.server))),
            Err(ScalewayProviderError::Api {
                status: Some(404), ..
            }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Terminates a running server (removing its volumes) or deletes a
    /// stopped one.
    pub(in crate::scaleway) async fn terminate_server(
        &self,
        handle: &InstanceRef,
    ) -> Result<(), ScalewayProviderError> {
        let Some(server) = self.fetch_instance(handle).await? else {
            return Ok(());
        };

        if server.allows("terminate") {
            self.api
                .perform_instance_action_async(&handle.zone, &handle.id, "terminate")
                .await?;
            return Ok(());
        }

        self.api
            .delete_instance_async(&handle.zone, &handle.id)
            .await?;
        Ok(())
    }

    pub(in crate::scaleway) async fn servers_tagged_with(
        &self,
        credential: &CredentialRef,
        zone: &str,
    ) -> Result<Vec<InstanceRef>, ScalewayProviderError> {
        let url = self.http.instance_url(
            zone,
            &format!("servers?tags={}", credential_tag(&credential.name)),
        );
        let list: ServerList = self.http.get(&url).await?;
        Ok(list
            .servers
            .into_iter()
            .map(|server| InstanceRef {
                zone: server.zone.unwrap_or_else(|| zone.to_owned()),
                id: server.id,
                name: server.name,
            })
            .collect())
    }
}
