//! In-memory provider that records calls and injects failures.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::provider::{
    AccessRuleRef, AccessRuleSpec, CredentialRef, CredentialRequest, ImageDetails, ImageRef,
    ImageStatus, ImageSummary, InstanceAddresses, InstanceRef, InstanceStatus, LaunchRequest,
    Provider, ProviderError, ProviderErrorKind, ProviderFuture, PublicAddressRef,
    SnapshotRequest, default_work_root,
};
use crate::spec::BuildSpec;

/// Provider operations, for failure injection and call assertions.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum FakeOp {
    /// [`Provider::check_spec`].
    CheckSpec,
    /// [`Provider::create_credential`].
    CreateCredential,
    /// [`Provider::delete_credential`].
    DeleteCredential,
    /// [`Provider::create_access_rule`].
    CreateAccessRule,
    /// [`Provider::delete_access_rule`].
    DeleteAccessRule,
    /// [`Provider::launch`].
    Launch,
    /// [`Provider::poll_status`].
    PollStatus,
    /// [`Provider::resolve_address`].
    ResolveAddress,
    /// [`Provider::terminate`].
    Terminate,
    /// [`Provider::find_instances_by_credential`].
    FindInstances,
    /// [`Provider::snapshot`].
    Snapshot,
    /// [`Provider::image_status`].
    ImageStatus,
    /// [`Provider::existing_image`].
    ExistingImage,
    /// [`Provider::list_images`].
    ListImages,
    /// [`Provider::image_info`].
    ImageInfo,
    /// [`Provider::delete_image`].
    DeleteImage,
    /// [`Provider::attach_public_address`].
    AttachPublicAddress,
    /// [`Provider::release_public_address`].
    ReleasePublicAddress,
}

/// Error produced by [`FakeProvider`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("fake {op:?} failed: {message}")]
pub struct FakeProviderError {
    /// Operation that failed.
    pub op: FakeOp,
    /// Classification reported to the builder.
    pub kind: ProviderErrorKind,
    /// Message text.
    pub message: String,
}

impl ProviderError for FakeProviderError {
    fn kind(&self) -> ProviderErrorKind {
        self.kind
    }
}

/// Counts of resources the fake still holds.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LiveResources {
    /// Registered credential names.
    pub credentials: BTreeSet<String>,
    /// Access rule names.
    pub access_rules: BTreeSet<String>,
    /// Instance identifiers not yet terminated.
    pub instances: BTreeSet<String>,
    /// Public address identifiers not yet released.
    pub public_addresses: BTreeSet<String>,
}

impl LiveResources {
    /// Whether nothing is left.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
            && self.access_rules.is_empty()
            && self.instances.is_empty()
            && self.public_addresses.is_empty()
    }
}

#[derive(Debug)]
struct FakeInstance {
    reference: InstanceRef,
    credential: String,
    terminated: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<FakeOp>,
    failures: BTreeMap<FakeOp, ProviderErrorKind>,
    hangs: BTreeSet<FakeOp>,
    instance_statuses: VecDeque<InstanceStatus>,
    image_statuses: VecDeque<ImageStatus>,
    addresses: VecDeque<InstanceAddresses>,
    lose_launch_result: bool,
    images_stay_pending: bool,
    credentials: BTreeSet<String>,
    access_rules: BTreeSet<String>,
    instances: BTreeMap<String, FakeInstance>,
    images: BTreeMap<String, ImageDetails>,
    public_addresses: BTreeSet<String>,
    next_id: u32,
}

impl FakeState {
    /// Key of the image whose id is `reference`, else of the image named
    /// `reference`.
    fn image_key(&self, reference: &str) -> Option<String> {
        self.images
            .iter()
            .find(|(_, image)| image.id == reference)
            .map(|(name, _)| name.clone())
            .or_else(|| self.images.contains_key(reference).then(|| reference.to_owned()))
    }
}

/// In-memory [`Provider`] for exercising the builder without a backend.
///
/// Unscripted polls report success: instances run, images become
/// available and the guest answers on `192.0.2.10`.
#[derive(Clone, Debug)]
pub struct FakeProvider {
    state: Arc<Mutex<FakeState>>,
    requires_region: bool,
    poll_interval: Duration,
    work_root: Option<Utf8PathBuf>,
    pre_image: Vec<String>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Address the fake reports for every instance unless scripted otherwise.
pub const FAKE_GUEST_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10));

/// Address the fake attaches when a spec asks for a floating IP.
pub const FAKE_FLOATING_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7));

impl FakeProvider {
    /// Creates a provider that succeeds at everything.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            requires_region: false,
            poll_interval: Duration::from_millis(1),
            work_root: None,
            pre_image: Vec::new(),
        }
    }

    /// Requires a `region` key in build specs.
    #[must_use]
    pub const fn requiring_region(mut self) -> Self {
        self.requires_region = true;
        self
    }

    /// Creates work areas under `root`.
    #[must_use]
    pub fn with_work_root(mut self, root: Utf8PathBuf) -> Self {
        self.work_root = Some(root);
        self
    }

    /// Commands to run right before snapshotting.
    #[must_use]
    pub fn with_pre_image_commands(mut self, commands: &[&str]) -> Self {
        self.pre_image = commands.iter().map(|command| (*command).to_owned()).collect();
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every call to `op` fail with `kind`.
    pub fn fail(&self, op: FakeOp, kind: ProviderErrorKind) {
        self.lock().failures.insert(op, kind);
    }

    /// Makes every call to `op` wait forever.
    pub fn hang(&self, op: FakeOp) {
        self.lock().hangs.insert(op);
    }

    /// Queues statuses returned by successive status polls.
    pub fn script_instance_statuses(&self, statuses: &[InstanceStatus]) {
        self.lock().instance_statuses.extend(statuses.iter().copied());
    }

    /// Queues statuses returned by successive image polls.
    pub fn script_image_statuses(&self, statuses: &[ImageStatus]) {
        self.lock().image_statuses.extend(statuses.iter().copied());
    }

    /// Queues address lookups returned by successive resolves.
    pub fn script_addresses(&self, addresses: &[InstanceAddresses]) {
        self.lock().addresses.extend(addresses.iter().copied());
    }

    /// Makes every image poll report `Pending`, ignoring queued statuses.
    pub fn keep_images_pending(&self) {
        self.lock().images_stay_pending = true;
    }

    /// Creates the instance on launch but reports a failure to the caller.
    pub fn lose_launch_result(&self) {
        self.lock().lose_launch_result = true;
    }

    /// Seeds an existing image.
    pub fn insert_image(&self, name: &str) {
        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("image-{}", state.next_id);
        state.images.insert(
            name.to_owned(),
            ImageDetails {
                id,
                name: name.to_owned(),
                properties: Vec::new(),
            },
        );
    }

    /// Operations called so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<FakeOp> {
        self.lock().calls.clone()
    }

    /// How many times `op` was called.
    #[must_use]
    pub fn call_count(&self, op: FakeOp) -> usize {
        self.lock().calls.iter().filter(|call| **call == op).count()
    }

    /// Resources created and not yet released.
    #[must_use]
    pub fn live_resources(&self) -> LiveResources {
        let state = self.lock();
        LiveResources {
            credentials: state.credentials.clone(),
            access_rules: state.access_rules.clone(),
            instances: state
                .instances
                .values()
                .filter(|instance| !instance.terminated)
                .map(|instance| instance.reference.id.clone())
                .collect(),
            public_addresses: state.public_addresses.clone(),
        }
    }

    /// Images currently held, by name.
    #[must_use]
    pub fn images(&self) -> Vec<ImageDetails> {
        self.lock().images.values().cloned().collect()
    }

    /// Records the call and returns whether it should hang, or the
    /// injected failure.
    fn enter(&self, op: FakeOp) -> Result<bool, FakeProviderError> {
        let mut state = self.lock();
        state.calls.push(op);
        if let Some(kind) = state.failures.get(&op).copied() {
            return Err(FakeProviderError {
                op,
                kind,
                message: String::from("injected failure"),
            });
        }
        Ok(state.hangs.contains(&op))
    }

    fn not_found(op: FakeOp, what: &str) -> FakeProviderError {
        FakeProviderError {
            op,
            kind: ProviderErrorKind::NotFound,
            message: format!("{what} not found"),
        }
    }

    fn call<'a, T, F>(&'a self, op: FakeOp, body: F) -> ProviderFuture<'a, T, FakeProviderError>
    where
        T: Send + 'a,
        F: FnOnce(&mut FakeState) -> Result<T, FakeProviderError> + Send + 'a,
    {
        Box::pin(async move {
            if self.enter(op)? {
                std::future::pending::<()>().await;
            }
            body(&mut self.lock())
        })
    }
}

impl Provider for FakeProvider {
    type Error = FakeProviderError;

    fn name(&self) -> &'static str {
        "fake"
    }

    fn requires_region(&self) -> bool {
        self.requires_region
    }

    fn check_spec(&self, _spec: &BuildSpec) -> Result<(), Self::Error> {
        self.enter(FakeOp::CheckSpec).map(|_| ())
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn work_area_root(&self) -> Utf8PathBuf {
        self.work_root.clone().unwrap_or_else(default_work_root)
    }

    fn pre_image_commands(&self) -> Vec<String> {
        self.pre_image.clone()
    }

    fn create_credential<'a>(
        &'a self,
        request: &'a CredentialRequest,
    ) -> ProviderFuture<'a, CredentialRef, Self::Error> {
        self.call(FakeOp::CreateCredential, move |state| {
            if !state.credentials.insert(request.name.clone()) {
                return Err(FakeProviderError {
                    op: FakeOp::CreateCredential,
                    kind: ProviderErrorKind::Collision,
                    message: format!("{} already exists", request.name),
                });
            }
            Ok(CredentialRef {
                id: request.name.clone(),
                name: request.name.clone(),
            })
        })
    }

    fn delete_credential<'a>(
        &'a self,
        credential: &'a CredentialRef,
    ) -> ProviderFuture<'a, (), Self::Error> {
        self.call(FakeOp::DeleteCredential, move |state| {
            if state.credentials.remove(&credential.name) {
                Ok(())
            } else {
                Err(Self::not_found(FakeOp::DeleteCredential, &credential.name))
            }
        })
    }

    fn create_access_rule<'a>(
        &'a self,
        spec: &'a AccessRuleSpec,
    ) -> ProviderFuture<'a, AccessRuleRef, Self::Error> {
        self.call(FakeOp::CreateAccessRule, move |state| {
            state.access_rules.insert(spec.name.clone());
            Ok(AccessRuleRef {
                id: spec.name.clone(),
                name: spec.name.clone(),
                zone: spec.zone.clone(),
            })
        })
    }

    fn delete_access_rule<'a>(
        &'a self,
        rule: &'a AccessRuleRef,
    ) -> ProviderFuture<'a, (), Self::Error> {
        self.call(FakeOp::DeleteAccessRule, move |state| {
            if state.access_rules.remove(&rule.name) {
                Ok(())
            } else {
                Err(Self::not_found(FakeOp::DeleteAccessRule, &rule.name))
            }
        })
    }

    fn launch<'a>(
        &'a self,
        request: &'a LaunchRequest<'a>,
    ) -> ProviderFuture<'a, InstanceRef, Self::Error> {
        let name = request.name.to_owned();
        let credential = request.credential.name.clone();
        let zone = request
            .spec
            .region
            .clone()
            .unwrap_or_else(|| String::from("local"));
        self.call(FakeOp::Launch, move |state| {
            state.next_id += 1;
            let reference = InstanceRef {
                id: format!("instance-{}", state.next_id),
                name,
                zone,
            };
            state.instances.insert(
                reference.id.clone(),
                FakeInstance {
                    reference: reference.clone(),
                    credential,
                    terminated: false,
                },
            );
            if state.lose_launch_result {
                return Err(FakeProviderError {
                    op: FakeOp::Launch,
                    kind: ProviderErrorKind::Other,
                    message: String::from("connection reset while reading launch response"),
                });
            }
            Ok(reference)
        })
    }

    fn poll_status<'a>(
        &'a self,
        instance: &'a InstanceRef,
    ) -> ProviderFuture<'a, InstanceStatus, Self::Error> {
        self.call(FakeOp::PollStatus, move |state| {
            let terminated = state
                .instances
                .get(&instance.id)
                .is_none_or(|known| known.terminated);
            if terminated {
                return Ok(InstanceStatus::Terminated);
            }
            Ok(state
                .instance_statuses
                .pop_front()
                .unwrap_or(InstanceStatus::Running))
        })
    }

    fn resolve_address<'a>(
        &'a self,
        _instance: &'a InstanceRef,
    ) -> ProviderFuture<'a, InstanceAddresses, Self::Error> {
        self.call(FakeOp::ResolveAddress, |state| {
            Ok(state.addresses.pop_front().unwrap_or(InstanceAddresses {
                public: Some(FAKE_GUEST_ADDRESS),
                private: None,
                lease: None,
            }))
        })
    }

    fn attach_public_address<'a>(
        &'a self,
        _instance: &'a InstanceRef,
        spec: &'a BuildSpec,
    ) -> ProviderFuture<'a, Option<PublicAddressRef>, Self::Error> {
        let wanted = spec.floating_ip;
        self.call(FakeOp::AttachPublicAddress, move |state| {
            if !wanted {
                return Ok(None);
            }
            state.next_id += 1;
            let id = format!("address-{}", state.next_id);
            state.public_addresses.insert(id.clone());
            Ok(Some(PublicAddressRef {
                id,
                address: FAKE_FLOATING_ADDRESS,
            }))
        })
    }

    fn release_public_address<'a>(
        &'a self,
        address: &'a PublicAddressRef,
    ) -> ProviderFuture<'a, (), Self::Error> {
        self.call(FakeOp::ReleasePublicAddress, move |state| {
            if state.public_addresses.remove(&address.id) {
                Ok(())
            } else {
                Err(Self::not_found(FakeOp::ReleasePublicAddress, &address.id))
            }
        })
    }

    fn terminate<'a>(&'a self, instance: &'a InstanceRef) -> ProviderFuture<'a, (), Self::Error> {
        self.call(FakeOp::Terminate, move |state| {
            match state.instances.get_mut(&instance.id) {
                Some(known) => {
                    known.terminated = true;
                    Ok(())
                }
                None => Err(Self::not_found(FakeOp::Terminate, &instance.id)),
            }
        })
    }

    fn find_instances_by_credential<'a>(
        &'a self,
        credential: &'a CredentialRef,
    ) -> ProviderFuture<'a, Vec<InstanceRef>, Self::Error> {
        self.call(FakeOp::FindInstances, move |state| {
            Ok(state
                .instances
                .values()
                .filter(|known| !known.terminated && known.credential == credential.name)
                .map(|known| known.reference.clone())
                .collect())
        })
    }

    fn snapshot<'a>(
        &'a self,
        _instance: &'a InstanceRef,
        request: &'a SnapshotRequest<'a>,
    ) -> ProviderFuture<'a, ImageRef, Self::Error> {
        let name = request.spec.name.clone();
        let properties: Vec<(String, String)> = request
            .tags
            .iter()
            .map(|tag| (tag.key.clone(), tag.value.clone()))
            .collect();
        self.call(FakeOp::Snapshot, move |state| {
            state.next_id += 1;
            let id = format!("image-{}", state.next_id);
            state.images.insert(
                name.clone(),
                ImageDetails {
                    id: id.clone(),
                    name: name.clone(),
                    properties,
                },
            );
            Ok(ImageRef {
                id,
                name,
                zone: None,
            })
        })
    }

    fn image_status<'a>(
        &'a self,
        _image: &'a ImageRef,
    ) -> ProviderFuture<'a, ImageStatus, Self::Error> {
        self.call(FakeOp::ImageStatus, |state| {
            if state.images_stay_pending {
                return Ok(ImageStatus::Pending);
            }
            Ok(state
                .image_statuses
                .pop_front()
                .unwrap_or(ImageStatus::Available))
        })
    }

    fn existing_image<'a>(
        &'a self,
        spec: &'a BuildSpec,
    ) -> ProviderFuture<'a, Option<ImageRef>, Self::Error> {
        self.call(FakeOp::ExistingImage, move |state| {
            Ok(state.images.get(&spec.name).map(|image| ImageRef {
                id: image.id.clone(),
                name: image.name.clone(),
                zone: None,
            }))
        })
    }

    fn list_images(&self) -> ProviderFuture<'_, Vec<ImageSummary>, Self::Error> {
        self.call(FakeOp::ListImages, |state| {
            Ok(state
                .images
                .values()
                .map(|image| ImageSummary {
                    id: image.id.clone(),
                    name: image.name.clone(),
                    status: String::from("available"),
                    detail: String::new(),
                })
                .collect())
        })
    }

    fn image_info<'a>(&'a self, image: &'a str) -> ProviderFuture<'a, ImageDetails, Self::Error> {
        self.call(FakeOp::ImageInfo, move |state| {
            state
                .image_key(image)
                .and_then(|key| state.images.get(&key).cloned())
                .ok_or_else(|| Self::not_found(FakeOp::ImageInfo, image))
        })
    }

    fn delete_image<'a>(&'a self, image: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        self.call(FakeOp::DeleteImage, move |state| {
            state
                .image_key(image)
                .and_then(|key| state.images.remove(&key))
                .map(|_| ())
                .ok_or_else(|| Self::not_found(FakeOp::DeleteImage, image))
        })
    }
}
