//! Core library for the `ofen` image baker.
//!
//! A build provisions a disposable instance through a [`provider::Provider`],
//! configures it over SSH, snapshots it into an image and then releases
//! everything it created (create → reachable → configure → image → teardown).
//! Scaleway, OpenStack and libvirt backends ship with the crate.

pub mod builder;
pub mod cloud_init;
pub mod config;
pub mod driver;
pub mod libvirt;
pub mod openstack;
pub mod provider;
pub mod remote;
pub mod scaleway;
pub mod spec;
pub mod test_support;

pub use builder::{BuildError, BuildPolicy, Builder, TeardownReport};
pub use config::{ConfigError, LibvirtConfig, OpenStackConfig, ScalewayConfig};
pub use driver::{BakeOutcome, DriverError, ProviderKind};
pub use libvirt::{LibvirtError, LibvirtProvider};
pub use openstack::{OpenStackError, OpenStackProvider};
pub use provider::{ImageRef, Provider, ProviderError, ProviderErrorKind};
pub use remote::{ProcessCommandRunner, RemoteError, SshClient, SshConfig, StreamingCommandRunner};
pub use scaleway::{ScalewayProvider, ScalewayProviderError};
pub use spec::{BuildSpec, SpecDocument, SpecError};
