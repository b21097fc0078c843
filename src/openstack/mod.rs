//! OpenStack provider: Nova keypairs and servers, Neutron security groups
//! and Glance images, all through one Keystone session.

mod access;
mod error;
mod floating;
mod images;
mod servers;
mod session;
mod types;

use std::time::Duration;

use crate::provider::{
    AccessRuleRef, AccessRuleSpec, CredentialRef, CredentialRequest, ImageDetails, ImageRef,
    ImageStatus, ImageSummary, InstanceAddresses, InstanceRef, InstanceStatus, LaunchRequest,
    Provider, ProviderFuture, PublicAddressRef, SnapshotRequest,
};
use crate::spec::BuildSpec;

pub use error::OpenStackError;
pub use session::{Endpoints, OpenStackSession};

const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Provider that bakes images on an OpenStack cloud.
pub struct OpenStackProvider {
    session: OpenStackSession,
    poll_interval: Duration,
}

impl OpenStackProvider {
    /// Wraps an authenticated session.
    #[must_use]
    pub const fn new(session: OpenStackSession) -> Self {
        Self {
            session,
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// Validates the OpenStack specific parts of a spec.
pub(crate) fn check_openstack_spec(spec: &BuildSpec) -> Result<(), OpenStackError> {
    if images::base_image_reference(spec).is_none() {
        return Err(OpenStackError::Spec(String::from(
            "base_image needs a `name` or region entry",
        )));
    }
    if spec.volume_size == Some(0) {
        return Err(OpenStackError::Spec(String::from(
            "volume_size must be at least 1 GB",
        )));
    }
    Ok(())
}

impl Provider for OpenStackProvider {
    type Error = OpenStackError;

    fn name(&self) -> &'static str {
        "openstack"
    }

    fn requires_region(&self) -> bool {
        false
    }

    fn check_spec(&self, spec: &BuildSpec) -> Result<(), Self::Error> {
        check_openstack_spec(spec)
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn create_credential<'a>(
        &'a self,
        request: &'a CredentialRequest,
    ) -> ProviderFuture<'a, CredentialRef, Self::Error> {
        Box::pin(self.import_keypair(request))
    }

    fn delete_credential<'a>(
        &'a self,
        credential: &'a CredentialRef,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(self.delete_keypair(credential))
    }

    fn create_access_rule<'a>(
        &'a self,
        spec: &'a AccessRuleSpec,
    ) -> ProviderFuture<'a, AccessRuleRef, Self::Error> {
        Box::pin(self.create_security_group(spec))
    }

    fn delete_access_rule<'a>(
        &'a self,
        rule: &'a AccessRuleRef,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(self.delete_security_group(rule))
    }

    fn launch<'a>(
        &'a self,
        request: &'a LaunchRequest<'a>,
    ) -> ProviderFuture<'a, InstanceRef, Self::Error> {
        Box::pin(self.boot_server(request))
    }

    fn poll_status<'a>(
        &'a self,
        instance: &'a InstanceRef,
    ) -> ProviderFuture<'a, InstanceStatus, Self::Error> {
        Box::pin(async move {
            Ok(self
                .fetch_server(instance)
                .await?
                .map_or(InstanceStatus::Terminated, |server| {
                    servers::map_status(&server.status)
                }))
        })
    }

    fn resolve_address<'a>(
        &'a self,
        instance: &'a InstanceRef,
    ) -> ProviderFuture<'a, InstanceAddresses, Self::Error> {
        Box::pin(async move {
            Ok(self
                .fetch_server(instance)
                .await?
                .map(|server| servers::addresses_of(&server))
                .unwrap_or_default())
        })
    }

    fn attach_public_address<'a>(
        &'a self,
        instance: &'a InstanceRef,
        spec: &'a BuildSpec,
    ) -> ProviderFuture<'a, Option<PublicAddressRef>, Self::Error> {
        Box::pin(async move {
            if !spec.floating_ip {
                return Ok(None);
            }
            self.allocate_floating_ip(instance).await.map(Some)
        })
    }

    fn release_public_address<'a>(
        &'a self,
        address: &'a PublicAddressRef,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(self.release_floating_ip(address))
    }

    fn terminate<'a>(&'a self, instance: &'a InstanceRef) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(self.delete_server(instance))
    }

    fn find_instances_by_credential<'a>(
        &'a self,
        credential: &'a CredentialRef,
    ) -> ProviderFuture<'a, Vec<InstanceRef>, Self::Error> {
        Box::pin(self.servers_with_key(credential))
    }

    fn snapshot<'a>(
        &'a self,
        instance: &'a InstanceRef,
        request: &'a SnapshotRequest<'a>,
    ) -> ProviderFuture<'a, ImageRef, Self::Error> {
        Box::pin(self.create_image(instance, request))
    }

    fn image_status<'a>(
        &'a self,
        image: &'a ImageRef,
    ) -> ProviderFuture<'a, ImageStatus, Self::Error> {
        Box::pin(self.glance_status(image))
    }

    fn existing_image<'a>(
        &'a self,
        spec: &'a BuildSpec,
    ) -> ProviderFuture<'a, Option<ImageRef>, Self::Error> {
        Box::pin(async move {
            Ok(self.find_image(&spec.name).await?.map(|image| ImageRef {
                id: image
                    .get("id")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                name: spec.name.clone(),
                zone: Some(self.session.region_label().to_owned()),
            }))
        })
    }

    fn list_images(&self) -> ProviderFuture<'_, Vec<ImageSummary>, Self::Error> {
        Box::pin(self.owned_images())
    }

    fn image_info<'a>(&'a self, image: &'a str) -> ProviderFuture<'a, ImageDetails, Self::Error> {
        Box::pin(self.describe_image(image))
    }

    fn delete_image<'a>(&'a self, image: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(self.remove_image(image))
    }
}

#[cfg(test)]
mod tests;
