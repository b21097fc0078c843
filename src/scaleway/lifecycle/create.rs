//! Instance creation helpers for the Scaleway provider.
//!
//! Scaleway instances must receive cloud-init user-data before first boot.
//! The creation request sets `stopped: true`, the user data is attached to
//! the stopped server, and only then is it powered on.

use reqwest::Method;
use serde_json::json;

use crate::cloud_init::render_user_data;
use crate::provider::{InstanceRef, LaunchRequest};
use crate::scaleway::types::{
    CreateServerRequest, INSTANCE_TAG, ServerEnvelope, Zone, credential_tag,
};

use super::super::{ScalewayProvider, ScalewayProviderError};
use super::InstanceSnapshot;

impl ScalewayProvider {
    pub(in crate::scaleway) async fn power_on_if_needed(
        &self,
        zone: &Zone,
        snapshot: &InstanceSnapshot,
    ) -> Result<(), ScalewayProviderError> {
        if snapshot.state.as_str() == "running" {
            return Ok(());
        }

        if snapshot.allows("poweron") {
            self.api
                .perform_instance_action_async(zone.as_str(), snapshot.id.as_str(), "poweron")
                .await?;
            return Ok(());
        }

        Err(ScalewayProviderError::PowerOnNotAllowed {
            instance_id: snapshot.id.as_str().to_owned(),
            state: snapshot.state.as_str().to_owned(),
        })
    }

    /// Creates the build server stopped, attaches cloud-init user data and
    /// powers it on.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayProviderError`] when the API rejects the request,
    /// the instance type or image.
    pub(in crate::scaleway) async fn launch_server(
        &self,
        request: &LaunchRequest<'_>,
    ) -> Result<InstanceRef, ScalewayProviderError> {
        let zone = Zone::from(self.build_zone(request.spec)?);
        let image_id = self.resolve_base_image(request.spec, &zone).await?;
        let instance_type = request.spec.instance_type.clone();

        let payload = CreateServerRequest {
            name: request.name.to_owned(),
            commercial_type: instance_type.clone(),
            image: image_id,
            project: self.config.default_project_id.clone(),
            routed_ip_enabled: true,
            dynamic_ip_required: true,
            tags: vec![
                String::from(INSTANCE_TAG),
                credential_tag(&request.credential.name),
            ],
            security_group: request.access_rule.id.clone(),
            stopped: true,
            organization: self.config.default_organization_id.clone(),
            volumes: request
                .spec
                .volume_size
                .map(|gigabytes| root_volume(u64::from(gigabytes))),
        };

        let url = self.http.instance_url(zone.as_str(), "servers");
        let created: ServerEnvelope = match self
            .http
            .send_json(Method::POST, &url, &payload)
            .await
        {
            Ok(created) => created,
            Err(ScalewayProviderError::Api { etype, message, .. })
                if etype == "invalid_arguments" && message.contains("commercial_type") =>
            {
                return Err(ScalewayProviderError::InstanceTypeUnavailable {
                    instance_type,
                    zone: zone.as_str().to_owned(),
                });
            }
            Err(err) => return Err(err),
        };

        let handle = InstanceRef {
            id: created.server.id.clone(),
            name: created.server.name.clone(),
            zone: zone.as_str().to_owned(),
        };
        let snapshot = InstanceSnapshot::from(created.server);

        let user_data = render_user_data(&request.spec.user, request.public_key);
        let user_data_url = self.http.instance_url(
            zone.as_str(),
            &format!("servers/{}/user_data/cloud-init", handle.id),
        );
        self.http.patch_text(&user_data_url, user_data).await?;
        self.power_on_if_needed(&zone, &snapshot).await?;
        Ok(handle)
    }
}

fn root_volume(gigabytes: u64) -> serde_json::Value {
    json!({
        "0": {
            "size": gigabytes * 1_000_000_000,
            "volume_type": "sbs_volume"
        }
    })
}
