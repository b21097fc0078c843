//! Provider abstraction for the resources a build borrows from a backend.
//!
//! The builder only talks to this trait. Each backend (Scaleway, OpenStack,
//! libvirt) implements it independently and is chosen once at startup.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use camino::Utf8PathBuf;

mod types;

pub use types::{
    AccessRuleRef, AccessRuleSpec, CredentialRef, CredentialRequest, ImageDetails, ImageLookup,
    ImageRef, ImageStatus, ImageSummary, InstanceAddresses, InstanceRef, InstanceStatus,
    LaunchRequest, PublicAddressRef, SnapshotRequest, default_work_root,
};

use crate::spec::BuildSpec;

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Coarse classification of provider failures the builder reacts to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProviderErrorKind {
    /// A resource with the requested name already exists.
    Collision,
    /// The account ran out of quota.
    Quota,
    /// The resource does not exist (treated as success during teardown).
    NotFound,
    /// Anything else.
    Other,
}

/// Errors returned by providers expose a [`ProviderErrorKind`].
pub trait ProviderError: std::error::Error + Send + Sync + 'static {
    /// Classifies the error.
    fn kind(&self) -> ProviderErrorKind;
}

/// Operations a backend offers to the builder and the CLI.
pub trait Provider: Send + Sync {
    /// Provider specific error type.
    type Error: ProviderError;

    /// Short name used in logs (`scaleway`, `openstack`, `libvirt`).
    fn name(&self) -> &'static str;

    /// Whether build specs must carry a `region` key.
    fn requires_region(&self) -> bool;

    /// Side-effect-free pre-flight check of provider specific spec fields.
    ///
    /// # Errors
    ///
    /// Returns the provider error describing the invalid field.
    fn check_spec(&self, spec: &BuildSpec) -> Result<(), Self::Error>;

    /// Interval between status polls.
    fn poll_interval(&self) -> Duration;

    /// Directory under which the build's work area is created.
    fn work_area_root(&self) -> Utf8PathBuf {
        default_work_root()
    }

    /// Commands the builder runs on the guest right before snapshotting.
    fn pre_image_commands(&self) -> Vec<String> {
        Vec::new()
    }

    /// Registers the ephemeral public key.
    fn create_credential<'a>(
        &'a self,
        request: &'a CredentialRequest,
    ) -> ProviderFuture<'a, CredentialRef, Self::Error>;

    /// Removes a credential created by [`Provider::create_credential`].
    fn delete_credential<'a>(
        &'a self,
        credential: &'a CredentialRef,
    ) -> ProviderFuture<'a, (), Self::Error>;

    /// Creates the ephemeral access rule set. Implementations remove any
    /// partially created group before returning an error.
    fn create_access_rule<'a>(
        &'a self,
        spec: &'a AccessRuleSpec,
    ) -> ProviderFuture<'a, AccessRuleRef, Self::Error>;

    /// Removes an access rule set created by [`Provider::create_access_rule`].
    fn delete_access_rule<'a>(
        &'a self,
        rule: &'a AccessRuleRef,
    ) -> ProviderFuture<'a, (), Self::Error>;

    /// Submits the instance creation request and returns as soon as the
    /// backend has assigned an identifier.
    fn launch<'a>(
        &'a self,
        request: &'a LaunchRequest<'a>,
    ) -> ProviderFuture<'a, InstanceRef, Self::Error>;

    /// Reads the authoritative instance status.
    fn poll_status<'a>(
        &'a self,
        instance: &'a InstanceRef,
    ) -> ProviderFuture<'a, InstanceStatus, Self::Error>;

    /// Reports the addresses currently known for the instance.
    fn resolve_address<'a>(
        &'a self,
        instance: &'a InstanceRef,
    ) -> ProviderFuture<'a, InstanceAddresses, Self::Error>;

    /// Allocates a public address for the running instance and attaches
    /// it, when the spec asks for one. Backends that always assign public
    /// addresses keep the default, which allocates nothing.
    fn attach_public_address<'a>(
        &'a self,
        _instance: &'a InstanceRef,
        _spec: &'a BuildSpec,
    ) -> ProviderFuture<'a, Option<PublicAddressRef>, Self::Error> {
        Box::pin(async { Ok(None) })
    }

    /// Releases an address returned by [`Provider::attach_public_address`].
    fn release_public_address<'a>(
        &'a self,
        _address: &'a PublicAddressRef,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async { Ok(()) })
    }

    /// Requests termination. An instance that is already gone is success.
    fn terminate<'a>(&'a self, instance: &'a InstanceRef) -> ProviderFuture<'a, (), Self::Error>;

    /// Finds instances launched with `credential`, for recovering an
    /// instance whose reference was never captured.
    fn find_instances_by_credential<'a>(
        &'a self,
        credential: &'a CredentialRef,
    ) -> ProviderFuture<'a, Vec<InstanceRef>, Self::Error>;

    /// Snapshots the instance into an image and applies tags.
    fn snapshot<'a>(
        &'a self,
        instance: &'a InstanceRef,
        request: &'a SnapshotRequest<'a>,
    ) -> ProviderFuture<'a, ImageRef, Self::Error>;

    /// Reads the image status.
    fn image_status<'a>(&'a self, image: &'a ImageRef)
    -> ProviderFuture<'a, ImageStatus, Self::Error>;

    /// Returns the image a bake of `spec` would collide with, if any.
    fn existing_image<'a>(
        &'a self,
        spec: &'a BuildSpec,
    ) -> ProviderFuture<'a, Option<ImageRef>, Self::Error>;

    /// Lists images owned by the configured account.
    fn list_images(&self) -> ProviderFuture<'_, Vec<ImageSummary>, Self::Error>;

    /// Describes one image, given its identifier or its name.
    fn image_info<'a>(&'a self, image: &'a str) -> ProviderFuture<'a, ImageDetails, Self::Error>;

    /// Deletes one image, given its identifier or its name.
    fn delete_image<'a>(&'a self, image: &'a str) -> ProviderFuture<'a, (), Self::Error>;
}
