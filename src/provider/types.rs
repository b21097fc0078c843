//! Value types exchanged between the builder and a provider.

use std::fmt;
use std::net::IpAddr;

use camino::{Utf8Path, Utf8PathBuf};
use uuid::Uuid;

use crate::spec::{BuildSpec, Tag};

/// Request to register an ephemeral public key with the backend.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CredentialRequest {
    /// Backend-visible key name (`ofen-key-<suffix>`).
    pub name: String,
    /// Public key in OpenSSH format.
    pub public_key: String,
}

/// Handle to a registered credential.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CredentialRef {
    /// Provider identifier (equal to `name` where the backend keys by name).
    pub id: String,
    /// Key name used to tag instances launched with it.
    pub name: String,
}

/// Request for an ephemeral network-access rule set.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccessRuleSpec {
    /// Backend-visible group name (`ofen-grp-<suffix>`).
    pub name: String,
    /// Zone or region the rule set lives in, when the backend is zonal.
    pub zone: Option<String>,
    /// Inbound TCP ports to open.
    pub inbound_tcp_ports: Vec<u16>,
}

impl AccessRuleSpec {
    /// The default rule set: inbound SSH, outbound everything.
    #[must_use]
    pub fn ssh_only(name: impl Into<String>, zone: Option<String>) -> Self {
        Self {
            name: name.into(),
            zone,
            inbound_tcp_ports: vec![22],
        }
    }
}

/// Handle to a created access rule set.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccessRuleRef {
    /// Provider identifier.
    pub id: String,
    /// Backend-visible name.
    pub name: String,
    /// Zone or region the rule set lives in.
    pub zone: Option<String>,
}

/// Everything a provider needs to launch the build instance.
#[derive(Clone, Copy, Debug)]
pub struct LaunchRequest<'a> {
    /// Instance name (`ofen-build-<suffix>`).
    pub name: &'a str,
    /// Validated build spec.
    pub spec: &'a BuildSpec,
    /// Credential installed for the target user.
    pub credential: &'a CredentialRef,
    /// Access rule applied to the instance.
    pub access_rule: &'a AccessRuleRef,
    /// Public key text, for backends that inject it through user data.
    pub public_key: &'a str,
    /// Scoped work area for local artefacts.
    pub work_area: &'a Utf8Path,
}

/// Handle to a launched instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceRef {
    /// Provider identifier.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Zone, region or hypervisor URI hosting the instance.
    pub zone: String,
}

/// Provider-neutral view of an instance's lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstanceStatus {
    /// Accepted but not yet running.
    Pending,
    /// Running and able to boot its guest.
    Running,
    /// Powered off but still present.
    Stopped,
    /// Shutting down or being deleted.
    Terminating,
    /// Gone.
    Terminated,
    /// The backend reported an error state.
    Failed,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Addresses a provider knows for an instance.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct InstanceAddresses {
    /// Publicly routable address.
    pub public: Option<IpAddr>,
    /// Address on the private or tenant network.
    pub private: Option<IpAddr>,
    /// Address reported by a DHCP lease table.
    pub lease: Option<IpAddr>,
}

impl InstanceAddresses {
    /// Picks the address to connect to: public, then private, then lease.
    #[must_use]
    pub fn preferred(&self) -> Option<IpAddr> {
        self.public.or(self.private).or(self.lease)
    }
}

/// A public address allocated for one build and attached to its instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PublicAddressRef {
    /// Provider identifier of the allocation.
    pub id: String,
    /// The address itself.
    pub address: IpAddr,
}

/// Parameters for turning the instance into an image.
#[derive(Clone, Copy, Debug)]
pub struct SnapshotRequest<'a> {
    /// Validated build spec; provides name, description and output path.
    pub spec: &'a BuildSpec,
    /// Merged tags, `Name` and `Description` first.
    pub tags: &'a [Tag],
}

/// Handle to an image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageRef {
    /// Provider identifier (a file path for local hypervisors).
    pub id: String,
    /// Image name.
    pub name: String,
    /// Zone or region holding the image, for zonal backends.
    pub zone: Option<String>,
}

/// How an image argument to `info` or `delete` is looked up.
///
/// Cloud backends hand out UUIDs as image identifiers. Anything that parses
/// as one is tried as an identifier first and then as a name, since an
/// image may itself be named after a UUID.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImageLookup<'a> {
    /// An identifier, with a name lookup as fallback.
    Id(&'a str),
    /// A name only.
    Name(&'a str),
}

impl<'a> ImageLookup<'a> {
    /// Classifies a user-supplied image reference.
    #[must_use]
    pub fn parse(reference: &'a str) -> Self {
        if Uuid::parse_str(reference).is_ok() {
            Self::Id(reference)
        } else {
            Self::Name(reference)
        }
    }
}

/// Provider-neutral image state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImageStatus {
    /// Still being written.
    Pending,
    /// Usable.
    Available,
    /// The backend gave up.
    Failed,
}

impl ImageStatus {
    /// Whether polling can stop with success.
    #[must_use]
    pub const fn is_complete(self) -> bool {
        matches!(self, Self::Available)
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Available => "available",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// One row of `ofen list`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageSummary {
    /// Provider identifier.
    pub id: String,
    /// Image name.
    pub name: String,
    /// Provider status text.
    pub status: String,
    /// Creation timestamp or size, whichever the backend reports.
    pub detail: String,
}

/// Output of `ofen info`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageDetails {
    /// Provider identifier.
    pub id: String,
    /// Image name.
    pub name: String,
    /// Key/value properties, tags included.
    pub properties: Vec<(String, String)>,
}

/// Default work area root for providers that keep nothing on disk beyond
/// the private key.
#[must_use]
pub fn default_work_root() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(std::env::temp_dir())
        .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::ImageLookup;

    #[rstest]
    #[case("8d2f6a8e-2c0b-4c5e-9b1a-3f0e6b7c9d10", true)]
    #[case("web-base", false)]
    #[case("8d2f6a8e", false)]
    fn image_references_are_classified(#[case] reference: &str, #[case] is_id: bool) {
        let lookup = ImageLookup::parse(reference);
        assert_eq!(matches!(lookup, ImageLookup::Id(_)), is_id);
    }
}
