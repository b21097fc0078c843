//! Backend configuration loading via `ortho-config`.
//!
//! Each backend reads its credentials and defaults from layered sources:
//! built-in defaults, `ofen.toml`, then environment variables. Validation
//! errors name both the environment variable and the TOML key so the
//! operator can fix them without reading code.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Scaleway specific configuration derived from environment variables and
/// configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SCW")]
pub struct ScalewayConfig {
    /// Access key assigned to the Scaleway application. Not needed for API
    /// calls; captured so it can be logged alongside created resources.
    pub access_key: Option<String>,
    /// Secret key used for authentication. This value is required.
    pub secret_key: String,
    /// Organisation identifier used by some Scaleway endpoints.
    pub default_organization_id: Option<String>,
    /// Project identifier used for billing and resource scoping.
    pub default_project_id: String,
    /// Zone searched first by `list`, `info` and `delete`, which have no
    /// build spec.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub default_zone: String,
    /// Comma-separated zones `list`, `info` and `delete` also search.
    #[ortho_config(
        default = "fr-par-1,fr-par-2,fr-par-3,nl-ams-1,nl-ams-2,nl-ams-3,pl-waw-1,pl-waw-2,pl-waw-3".to_owned()
    )]
    pub image_zones: String,
    /// CPU architecture used to select the correct image variant.
    #[ortho_config(default = "x86_64".to_owned())]
    pub default_architecture: String,
    /// API base URL.
    #[ortho_config(default = "https://api.scaleway.com".to_owned())]
    pub api_url: String,
}

/// OpenStack credentials, read from the conventional `OS_*` variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "OS")]
pub struct OpenStackConfig {
    /// Keystone v3 endpoint, for example `https://keystone.example:5000/v3`.
    pub auth_url: String,
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
    /// Project (tenant) name to scope the token to.
    pub project_name: String,
    /// Domain of the user.
    #[ortho_config(default = "Default".to_owned())]
    pub user_domain_name: String,
    /// Domain of the project.
    #[ortho_config(default = "Default".to_owned())]
    pub project_domain_name: String,
    /// Region used to pick catalogue endpoints; the first match wins when
    /// unset.
    pub region_name: Option<String>,
    /// Endpoint interface to use from the catalogue.
    #[ortho_config(default = "public".to_owned())]
    pub interface: String,
}

/// Local hypervisor settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "OFEN_LIBVIRT")]
pub struct LibvirtConfig {
    /// Connection URI, used when neither `--uri` nor the spec's `region`
    /// names one.
    #[ortho_config(default = "qemu:///system".to_owned())]
    pub uri: String,
    /// Directory scanned by `list` and used for default output paths.
    #[ortho_config(default = "/var/lib/libvirt/images".to_owned())]
    pub image_dir: String,
    /// Parent of the per-build work area; must be readable by the qemu user.
    #[ortho_config(default = "/var/tmp".to_owned())]
    pub work_root: String,
    /// Network used when the spec does not name one.
    #[ortho_config(default = "default".to_owned())]
    pub network: String,
    /// Path to the `virsh` executable.
    #[ortho_config(default = "virsh".to_owned())]
    pub virsh_bin: String,
    /// Path to the `qemu-img` executable.
    #[ortho_config(default = "qemu-img".to_owned())]
    pub qemu_img_bin: String,
    /// Path to the ISO 9660 builder used for the cloud-init seed.
    #[ortho_config(default = "genisoimage".to_owned())]
    pub iso_bin: String,
    /// Seconds to wait for a graceful guest shutdown before forcing it off.
    #[ortho_config(default = 120)]
    pub shutdown_timeout_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error
/// messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{}] in ofen.toml",
            metadata.description, metadata.env_var, metadata.toml_key, metadata.section
        )));
    }
    Ok(())
}

impl ScalewayConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("ofen")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Zones searched for images: the default zone, then `image_zones` in
    /// order, each once.
    #[must_use]
    pub fn search_zones(&self) -> Vec<String> {
        let mut zones: Vec<String> = Vec::new();
        for entry in std::iter::once(self.default_zone.as_str()).chain(self.image_zones.split(',')) {
            let zone = entry.trim();
            if !zone.is_empty() && !zones.iter().any(|known| known == zone) {
                zones.push(zone.to_owned());
            }
        }
        zones
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            self.secret_key.as_str(),
            &FieldMetadata::new(
                "Scaleway API secret key",
                "SCW_SECRET_KEY",
                "secret_key",
                "scaleway",
            ),
        )?;
        require_field(
            self.default_project_id.as_str(),
            &FieldMetadata::new(
                "Scaleway project ID",
                "SCW_DEFAULT_PROJECT_ID",
                "default_project_id",
                "scaleway",
            ),
        )?;
        require_field(
            self.default_zone.as_str(),
            &FieldMetadata::new(
                "availability zone",
                "SCW_DEFAULT_ZONE",
                "default_zone",
                "scaleway",
            ),
        )?;
        require_field(
            self.default_architecture.as_str(),
            &FieldMetadata::new(
                "CPU architecture",
                "SCW_DEFAULT_ARCHITECTURE",
                "default_architecture",
                "scaleway",
            ),
        )
    }
}

impl OpenStackConfig {
    /// Loads configuration from defaults, configuration files and `OS_*`
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("ofen")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks that every credential needed for Keystone is present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the first empty field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields: [(&str, FieldMetadata); 5] = [
            (
                self.auth_url.as_str(),
                FieldMetadata::new("Keystone URL", "OS_AUTH_URL", "auth_url", "openstack"),
            ),
            (
                self.username.as_str(),
                FieldMetadata::new("OpenStack user", "OS_USERNAME", "username", "openstack"),
            ),
            (
                self.password.as_str(),
                FieldMetadata::new("OpenStack password", "OS_PASSWORD", "password", "openstack"),
            ),
            (
                self.project_name.as_str(),
                FieldMetadata::new(
                    "OpenStack project",
                    "OS_PROJECT_NAME",
                    "project_name",
                    "openstack",
                ),
            ),
            (
                self.interface.as_str(),
                FieldMetadata::new(
                    "endpoint interface",
                    "OS_INTERFACE",
                    "interface",
                    "openstack",
                ),
            ),
        ];
        for (value, metadata) in &fields {
            require_field(value, metadata)?;
        }
        Ok(())
    }
}

impl LibvirtConfig {
    /// Loads configuration from defaults, configuration files and
    /// `OFEN_LIBVIRT_*` variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("ofen")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks that the tool paths and directories are set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the first empty field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields: [(&str, FieldMetadata); 6] = [
            (
                self.uri.as_str(),
                FieldMetadata::new("libvirt URI", "OFEN_LIBVIRT_URI", "uri", "libvirt"),
            ),
            (
                self.image_dir.as_str(),
                FieldMetadata::new(
                    "image directory",
                    "OFEN_LIBVIRT_IMAGE_DIR",
                    "image_dir",
                    "libvirt",
                ),
            ),
            (
                self.work_root.as_str(),
                FieldMetadata::new(
                    "work area root",
                    "OFEN_LIBVIRT_WORK_ROOT",
                    "work_root",
                    "libvirt",
                ),
            ),
            (
                self.virsh_bin.as_str(),
                FieldMetadata::new("virsh binary", "OFEN_LIBVIRT_VIRSH_BIN", "virsh_bin", "libvirt"),
            ),
            (
                self.qemu_img_bin.as_str(),
                FieldMetadata::new(
                    "qemu-img binary",
                    "OFEN_LIBVIRT_QEMU_IMG_BIN",
                    "qemu_img_bin",
                    "libvirt",
                ),
            ),
            (
                self.iso_bin.as_str(),
                FieldMetadata::new("ISO builder", "OFEN_LIBVIRT_ISO_BIN", "iso_bin", "libvirt"),
            ),
        ];
        for (value, metadata) in &fields {
            require_field(value, metadata)?;
        }
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// A value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
