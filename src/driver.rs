//! Lifecycle driver: loads a build spec, picks a provider and runs one
//! operation against it.
//!
//! The driver owns no backend clients. The binary constructs the provider
//! and SSH client explicitly and passes them in, which keeps every
//! operation here testable against [`crate::test_support::FakeProvider`].

use std::fmt;
use std::future::Future;
use std::io::{self, Write};
use std::str::FromStr;

use thiserror::Error;
use tracing::{info, warn};

use crate::builder::{BuildError, BuildPolicy, Builder};
use crate::provider::{ImageDetails, ImageRef, ImageSummary, Provider};
use crate::remote::{CommandRunner, SshClient};
use crate::spec::{SpecDocument, SpecError};

/// Backend families the binary knows how to construct.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProviderKind {
    /// Scaleway instances and images.
    Scaleway,
    /// Nova, Neutron and Glance behind Keystone.
    OpenStack,
    /// Local KVM guests managed through `virsh`.
    Libvirt,
}

/// Provider used when neither the flag nor the spec names one.
pub const DEFAULT_PROVIDER: ProviderKind = ProviderKind::Scaleway;

impl ProviderKind {
    /// Name accepted on the command line and in the spec.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scaleway => "scaleway",
            Self::OpenStack => "openstack",
            Self::Libvirt => "libvirt",
        }
    }

    /// Picks the provider: `--provider`, then the spec's `provider` key,
    /// then [`DEFAULT_PROVIDER`].
    ///
    /// # Errors
    ///
    /// Returns [`UnknownProvider`] when the chosen name is not recognised.
    pub fn select(
        flag: Option<&str>,
        document: Option<&SpecDocument>,
    ) -> Result<Self, UnknownProvider> {
        flag.or_else(|| document.and_then(SpecDocument::provider))
            .map_or(Ok(DEFAULT_PROVIDER), str::parse::<Self>)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "scaleway" => Ok(Self::Scaleway),
            "openstack" => Ok(Self::OpenStack),
            "libvirt" => Ok(Self::Libvirt),
            _ => Err(UnknownProvider(value.to_owned())),
        }
    }
}

/// A provider name that is not one of the supported backends.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown provider `{0}`; expected scaleway, openstack or libvirt")]
pub struct UnknownProvider(pub String);

/// How a `bake` invocation ended without error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BakeOutcome {
    /// A new image was created.
    Baked(ImageRef),
    /// An image with the spec's name already exists; nothing was built.
    ImageExists(ImageRef),
}

impl BakeOutcome {
    /// Process exit status for this outcome.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Baked(_) => 0,
            Self::ImageExists(_) => 2,
        }
    }

    /// The image built or found.
    #[must_use]
    pub const fn image(&self) -> &ImageRef {
        match self {
            Self::Baked(image) | Self::ImageExists(image) => image,
        }
    }
}

/// Errors surfaced by driver operations.
#[derive(Debug, Error)]
pub enum DriverError<E>
where
    E: std::error::Error + 'static,
{
    /// The build spec could not be loaded or validated.
    #[error(transparent)]
    Spec(#[from] SpecError),
    /// An image operation outside the build failed.
    #[error("{operation} failed: {source}")]
    Provider {
        /// Operation that was running.
        operation: &'static str,
        /// Provider error.
        #[source]
        source: E,
    },
    /// The build failed; teardown has already run.
    #[error(transparent)]
    Build(#[from] BuildError<E>),
    /// Results could not be written.
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

fn provider_error<E>(operation: &'static str) -> impl FnOnce(E) -> DriverError<E>
where
    E: std::error::Error + 'static,
{
    move |source| DriverError::Provider { operation, source }
}

/// Validates the spec, skips the build when the image already exists and
/// otherwise runs the builder until it finishes or `interrupt` fires.
///
/// # Errors
///
/// Returns [`DriverError::Spec`] before any provider call when the spec is
/// incomplete, [`DriverError::Provider`] when the existence check fails and
/// [`DriverError::Build`] for build failures.
pub async fn bake<P, R, F>(
    provider: &P,
    ssh: SshClient<R>,
    policy: BuildPolicy,
    document: SpecDocument,
    interrupt: F,
) -> Result<BakeOutcome, DriverError<P::Error>>
where
    P: Provider,
    R: CommandRunner + Clone + Send + Sync + 'static,
    F: Future<Output = ()>,
{
    let spec = document.into_spec(provider.requires_region())?;

    if let Some(image) = provider
        .existing_image(&spec)
        .await
        .map_err(provider_error("image lookup"))?
    {
        warn!(image = %image.name, id = %image.id, "image already exists; not baking");
        return Ok(BakeOutcome::ImageExists(image));
    }

    let mut builder = Builder::new(provider, ssh, policy);
    let image = builder.bake_until(&spec, interrupt).await?;
    Ok(BakeOutcome::Baked(image))
}

/// Images owned by the caller.
///
/// # Errors
///
/// Returns [`DriverError::Provider`] when the backend listing fails.
pub async fn list<P: Provider>(provider: &P) -> Result<Vec<ImageSummary>, DriverError<P::Error>> {
    provider
        .list_images()
        .await
        .map_err(provider_error("image listing"))
}

/// Details of one image.
///
/// # Errors
///
/// Returns [`DriverError::Provider`] when the image is missing or the
/// backend fails.
pub async fn info<P: Provider>(
    provider: &P,
    name: &str,
) -> Result<ImageDetails, DriverError<P::Error>> {
    provider
        .image_info(name)
        .await
        .map_err(provider_error("image lookup"))
}

/// Deletes one image.
///
/// # Errors
///
/// Returns [`DriverError::Provider`] when the image is missing or the
/// backend fails.
pub async fn delete<P: Provider>(provider: &P, name: &str) -> Result<(), DriverError<P::Error>> {
    provider
        .delete_image(name)
        .await
        .map_err(provider_error("image deletion"))?;
    info!(provider = provider.name(), image = name, "image deleted");
    Ok(())
}

/// Writes one tab separated line per image: name, id, status, detail.
///
/// # Errors
///
/// Propagates write failures.
pub fn write_listing<W: Write>(out: &mut W, images: &[ImageSummary]) -> io::Result<()> {
    for image in images {
        writeln!(
            out,
            "{}\t{}\t{}\t{}",
            image.name, image.id, image.status, image.detail
        )?;
    }
    Ok(())
}

/// Writes `key: value` lines, identity first.
///
/// # Errors
///
/// Propagates write failures.
pub fn write_details<W: Write>(out: &mut W, details: &ImageDetails) -> io::Result<()> {
    writeln!(out, "name: {}", details.name)?;
    writeln!(out, "id: {}", details.id)?;
    for (key, value) in &details.properties {
        writeln!(out, "{key}: {value}")?;
    }
    Ok(())
}

/// Writes the final line of a bake.
///
/// # Errors
///
/// Propagates write failures.
pub fn write_bake_outcome<W: Write>(out: &mut W, outcome: &BakeOutcome) -> io::Result<()> {
    let image = outcome.image();
    match outcome {
        BakeOutcome::Baked(_) => writeln!(out, "baked {} ({})", image.name, image.id),
        BakeOutcome::ImageExists(_) => {
            writeln!(out, "image {} already exists ({})", image.name, image.id)
        }
    }
}

#[cfg(test)]
mod tests {
    //! Driver behaviour against the in-memory provider.

    use std::time::Duration;

    use camino::Utf8PathBuf;
    use rstest::{fixture, rstest};
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::provider::{ProviderError, ProviderErrorKind};
    use crate::remote::SshConfig;
    use crate::test_support::{FakeOp, FakeProvider, ScriptedRunner};

    struct Harness {
        _root: TempDir,
        provider: FakeProvider,
        runner: ScriptedRunner,
    }

    impl Harness {
        fn ssh(&self) -> SshClient<ScriptedRunner> {
            SshClient::new(
                SshConfig {
                    ssh_bin: String::from("ssh"),
                    scp_bin: String::from("scp"),
                    keygen_bin: String::from("ssh-keygen"),
                    port: 22,
                    connect_timeout_secs: 5,
                    strict_host_key_checking: false,
                    known_hosts_file: String::from("/dev/null"),
                },
                self.runner.clone(),
            )
            .expect("ssh client")
        }
    }

    #[fixture]
    fn harness() -> Harness {
        let tmp = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 tempdir");
        Harness {
            _root: tmp,
            provider: FakeProvider::new().with_work_root(root),
            runner: ScriptedRunner::new().with_keygen().succeed_when_empty(),
        }
    }

    fn policy() -> BuildPolicy {
        BuildPolicy {
            launch_timeout: Duration::from_secs(5),
            ssh_attempts: 2,
            ssh_retry_delay: Duration::from_millis(1),
            upload_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            image_timeout: Duration::from_secs(5),
            teardown_timeout: Duration::from_secs(5),
        }
    }

    fn document(provider: Option<&str>) -> SpecDocument {
        let mut value = json!({
            "name": "web-base",
            "description": "Web server base image",
            "user": "ubuntu",
            "instance_type": "DEV1-S",
            "base_image": {"name": "ubuntu-24.04"},
            "uploads": {},
            "commands": ["true"]
        });
        if let (Some(name), Some(object)) = (provider, value.as_object_mut()) {
            object.insert(String::from("provider"), json!(name));
        }
        SpecDocument::parse(&value.to_string()).expect("spec parses")
    }

    #[rstest]
    #[case(None, None, ProviderKind::Scaleway)]
    #[case(None, Some("libvirt"), ProviderKind::Libvirt)]
    #[case(Some("OpenStack"), Some("libvirt"), ProviderKind::OpenStack)]
    fn provider_selection_prefers_flag_then_spec(
        #[case] flag: Option<&str>,
        #[case] in_spec: Option<&str>,
        #[case] expected: ProviderKind,
    ) {
        let doc = document(in_spec);
        assert_eq!(ProviderKind::select(flag, Some(&doc)), Ok(expected));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        assert_eq!(
            ProviderKind::select(Some("vmware"), None),
            Err(UnknownProvider(String::from("vmware")))
        );
    }

    #[rstest]
    #[tokio::test]
    async fn bake_creates_image_and_exits_zero(harness: Harness) {
        let outcome = bake(
            &harness.provider,
            harness.ssh(),
            policy(),
            document(None),
            std::future::pending(),
        )
        .await
        .expect("bake succeeds");

        assert!(matches!(outcome, BakeOutcome::Baked(_)));
        assert_eq!(outcome.exit_code(), 0);
        assert!(harness.provider.live_resources().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn existing_image_short_circuits_with_exit_two(harness: Harness) {
        harness.provider.insert_image("web-base");

        let outcome = bake(
            &harness.provider,
            harness.ssh(),
            policy(),
            document(None),
            std::future::pending(),
        )
        .await
        .expect("lookup succeeds");

        assert!(matches!(outcome, BakeOutcome::ImageExists(_)));
        assert_eq!(outcome.exit_code(), 2);
        assert_eq!(harness.provider.call_count(FakeOp::CreateCredential), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn incomplete_spec_fails_before_any_provider_call(harness: Harness) {
        let doc = SpecDocument::parse(r#"{"name":"web-base"}"#).expect("json object");

        let err = bake(
            &harness.provider,
            harness.ssh(),
            policy(),
            doc,
            std::future::pending(),
        )
        .await
        .expect_err("spec is incomplete");

        assert!(matches!(err, DriverError::Spec(SpecError::MissingKeys(_))));
        assert!(harness.provider.calls().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn baked_image_disappears_from_listing_after_delete(harness: Harness) {
        let outcome = bake(
            &harness.provider,
            harness.ssh(),
            policy(),
            document(None),
            std::future::pending(),
        )
        .await
        .expect("bake succeeds");
        let baked = outcome.image().clone();
        let before = list(&harness.provider).await.expect("list");
        assert!(before.iter().any(|image| image.name == "web-base"));

        let details = info(&harness.provider, &baked.id).await.expect("info by id");
        assert_eq!(details.name, "web-base");
        delete(&harness.provider, &baked.id).await.expect("delete by id");

        let after = list(&harness.provider).await.expect("list");
        assert!(after.iter().all(|image| image.name != "web-base"));
    }

    #[rstest]
    #[tokio::test]
    async fn info_of_missing_image_is_not_found(harness: Harness) {
        let err = info(&harness.provider, "ghost").await.expect_err("missing");
        assert!(matches!(
            err,
            DriverError::Provider { ref source, .. } if source.kind() == ProviderErrorKind::NotFound
        ));
    }

    #[test]
    fn listing_is_tab_separated() {
        let mut out = Vec::new();
        write_listing(
            &mut out,
            &[ImageSummary {
                id: String::from("img-1"),
                name: String::from("web-base"),
                status: String::from("available"),
                detail: String::from("2024-05-01"),
            }],
        )
        .expect("write");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "web-base\timg-1\tavailable\t2024-05-01\n"
        );
    }

    #[test]
    fn details_list_identity_then_properties() {
        let mut out = Vec::new();
        write_details(
            &mut out,
            &ImageDetails {
                id: String::from("img-1"),
                name: String::from("web-base"),
                properties: vec![(String::from("team"), String::from("infra"))],
            },
        )
        .expect("write");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "name: web-base\nid: img-1\nteam: infra\n"
        );
    }
}
