//! Scaleway provider: IAM keys, security groups, instances and images.
//!
//! Most calls go through small raw HTTP helpers because the SDK lacks IAM,
//! security groups, user data and image updates; image listing and
//! instance actions still use `scaleway_rs`.

mod access;
mod error;
mod http;
mod images;
mod lifecycle;
mod types;

use std::sync::Mutex;
use std::time::Duration;

use scaleway_rs::ScalewayApi;
use tracing::debug;

use crate::config::ScalewayConfig;
use crate::provider::{
    AccessRuleRef, AccessRuleSpec, CredentialRef, CredentialRequest, ImageDetails, ImageRef,
    ImageStatus, ImageSummary, InstanceAddresses, InstanceRef, InstanceStatus, LaunchRequest,
    Provider, ProviderFuture, SnapshotRequest,
};
use crate::spec::BuildSpec;
use http::ScalewayHttp;

pub use error::ScalewayProviderError;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Provider that bakes images with the Scaleway Instances API.
pub struct ScalewayProvider {
    api: ScalewayApi,
    http: ScalewayHttp,
    config: ScalewayConfig,
    poll_interval: Duration,
    launch_zone: Mutex<Option<String>>,
}

impl ScalewayProvider {
    /// Constructs a new provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayProviderError::Config`] when the provided
    /// configuration fails validation.
    pub fn new(config: ScalewayConfig) -> Result<Self, ScalewayProviderError> {
        config.validate()?;
        Ok(Self {
            api: ScalewayApi::new(&config.secret_key),
            http: ScalewayHttp::new(&config.api_url, &config.secret_key),
            config,
            poll_interval: POLL_INTERVAL,
            launch_zone: Mutex::new(None),
        })
    }

    /// The zone a build runs in: the spec's `region`.
    fn build_zone(&self, spec: &BuildSpec) -> Result<String, ScalewayProviderError> {
        let zone = spec
            .region
            .clone()
            .ok_or_else(|| ScalewayProviderError::Spec(String::from("region is required")))?;
        if let Ok(mut recorded) = self.launch_zone.lock() {
            *recorded = Some(zone.clone());
        }
        Ok(zone)
    }

    fn zone_for<'a>(&'a self, zone: Option<&'a str>) -> &'a str {
        zone.unwrap_or(self.config.default_zone.as_str())
    }

    fn recovery_zone(&self) -> String {
        self.launch_zone
            .lock()
            .ok()
            .and_then(|recorded| recorded.clone())
            .unwrap_or_else(|| self.config.default_zone.clone())
    }
}

/// Validates the Scaleway specific parts of a spec.
pub(crate) fn check_scaleway_spec(spec: &BuildSpec) -> Result<(), ScalewayProviderError> {
    let zone = spec
        .region
        .as_deref()
        .ok_or_else(|| ScalewayProviderError::Spec(String::from("region is required")))?;
    if spec.base_image_for(zone).is_none() {
        return Err(ScalewayProviderError::Spec(format!(
            "base_image has no entry for zone {zone}"
        )));
    }
    if spec.instance_type.trim().is_empty() {
        return Err(ScalewayProviderError::Spec(String::from(
            "instance_type must name a commercial type",
        )));
    }
    Ok(())
}

impl Provider for ScalewayProvider {
    type Error = ScalewayProviderError;

    fn name(&self) -> &'static str {
        "scaleway"
    }

    fn requires_region(&self) -> bool {
        true
    }

    fn check_spec(&self, spec: &BuildSpec) -> Result<(), Self::Error> {
        check_scaleway_spec(spec)
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn create_credential<'a>(
        &'a self,
        request: &'a CredentialRequest,
    ) -> ProviderFuture<'a, CredentialRef, Self::Error> {
        Box::pin(self.register_key(request))
    }

    fn delete_credential<'a>(
        &'a self,
        credential: &'a CredentialRef,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(self.remove_key(credential))
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
        Box::pin(self.launch_server(request))
    }

    fn poll_status<'a>(
        &'a self,
        instance: &'a InstanceRef,
    ) -> ProviderFuture<'a, InstanceStatus, Self::Error> {
        Box::pin(async move {
            let status = self
                .fetch_instance(instance)
                .await?
                .map_or(InstanceStatus::Terminated, |server| server.status());
            debug!(instance = %instance.id, %status, "polled server");
            Ok(status)
        })
    }

    fn resolve_address<'a>(
        &'a self,
        instance: &'a InstanceRef,
    ) -> ProviderFuture<'a, InstanceAddresses, Self::Error> {
        Box::pin(async move {
            Ok(self
                .fetch_instance(instance)
                .await?
                .map(|server| server.addresses())
                .unwrap_or_default())
        })
    }

    fn terminate<'a>(&'a self, instance: &'a InstanceRef) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(self.terminate_server(instance))
    }

    fn find_instances_by_credential<'a>(
        &'a self,
        credential: &'a CredentialRef,
    ) -> ProviderFuture<'a, Vec<InstanceRef>, Self::Error> {
        Box::pin(async move {
            let zone = self.recovery_zone();
            self.servers_tagged_with(credential, &zone).await
        })
    }

    fn snapshot<'a>(
        &'a self,
        instance: &'a InstanceRef,
        request: &'a SnapshotRequest<'a>,
    ) -> ProviderFuture<'a, ImageRef, Self::Error> {
        Box::pin(self.backup_server(instance, request))
    }

    fn image_status<'a>(
        &'a self,
        image: &'a ImageRef,
    ) -> ProviderFuture<'a, ImageStatus, Self::Error> {
        Box::pin(self.read_image_state(image))
    }

    fn existing_image<'a>(
        &'a self,
        spec: &'a BuildSpec,
    ) -> ProviderFuture<'a, Option<ImageRef>, Self::Error> {
        Box::pin(async move {
            let zone = self.zone_for(spec.region.as_deref());
            Ok(self.find_image(zone, &spec.name).await?.map(|image| ImageRef {
                id: image.id,
                name: image.name,
                zone: Some(zone.to_owned()),
            }))
        })
    }

    fn list_images(&self) -> ProviderFuture<'_, Vec<ImageSummary>, Self::Error> {
        Box::pin(self.project_images())
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
