//! Build spec loading and validation.
//!
//! A build spec is a JSON document describing the image to bake. Loading is
//! split in two: [`SpecDocument`] parses the text and exposes the optional
//! `provider` selector, then [`SpecDocument::into_spec`] validates it against
//! the chosen provider's requirements. Nothing touches a backend until a
//! [`BuildSpec`] exists.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

mod tags;

pub use tags::{DESCRIPTION_TAG, NAME_TAG, Tag, merge_tags};

/// Key ignored inside `base_image` and `uploads`; it documents the entry.
pub const DOC_STRING_KEY: &str = "doc-string";

const REQUIRED_KEYS: &[&str] = &[
    "name",
    "description",
    "user",
    "instance_type",
    "base_image",
    "uploads",
    "commands",
];

const REGION_KEY: &str = "region";

/// Errors raised while loading a build spec.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SpecError {
    /// The file could not be read.
    #[error("failed to read build spec `{path}`: {message}")]
    Read {
        /// Path passed by the caller.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// The text is not JSON or not a JSON object.
    #[error("build spec is not a valid JSON object: {0}")]
    Syntax(String),
    /// One or more required keys are absent or null.
    #[error("build spec is missing required keys: {}", .0.join(", "))]
    MissingKeys(Vec<String>),
    /// A key is present but has the wrong shape.
    #[error("invalid build spec: {0}")]
    Invalid(String),
}

/// A parsed but not yet validated build spec.
#[derive(Clone, Debug, PartialEq)]
pub struct SpecDocument {
    value: Value,
}

impl SpecDocument {
    /// Reads and parses the spec file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Read`] when the file cannot be read and
    /// [`SpecError::Syntax`] when it is not a JSON object.
    pub fn load(path: &Utf8Path) -> Result<Self, SpecError> {
        let text = read_to_string_ambient(path).map_err(|message| SpecError::Read {
            path: path.to_string(),
            message,
        })?;
        Self::parse(&text)
    }

    /// Parses spec text.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Syntax`] when `text` is not a JSON object.
    pub fn parse(text: &str) -> Result<Self, SpecError> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| SpecError::Syntax(err.to_string()))?;
        if !value.is_object() {
            return Err(SpecError::Syntax(String::from("top level must be an object")));
        }
        Ok(Self { value })
    }

    /// The optional `provider` selector.
    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        self.value.get("provider").and_then(Value::as_str)
    }

    /// The optional `region` value.
    #[must_use]
    pub fn region(&self) -> Option<&str> {
        self.value.get(REGION_KEY).and_then(Value::as_str)
    }

    /// Lists every required key that is absent or null.
    #[must_use]
    pub fn missing_keys(&self, region_required: bool) -> Vec<String> {
        let region = region_required.then_some(REGION_KEY);
        REQUIRED_KEYS
            .iter()
            .copied()
            .chain(region)
            .filter(|key| self.value.get(key).is_none_or(Value::is_null))
            .map(str::to_owned)
            .collect()
    }

    /// Validates the document and produces a [`BuildSpec`].
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::MissingKeys`] listing every absent required key,
    /// or [`SpecError::Invalid`] when a key has the wrong shape.
    pub fn into_spec(self, region_required: bool) -> Result<BuildSpec, SpecError> {
        let missing = self.missing_keys(region_required);
        if !missing.is_empty() {
            return Err(SpecError::MissingKeys(missing));
        }

        let parsed_tags = tags::parse_tags(self.value.get("tags"))?;
        let raw: RawSpec =
            serde_json::from_value(self.value).map_err(|err| SpecError::Invalid(err.to_string()))?;
        raw.into_spec(parsed_tags)
    }
}

/// One local → remote file copy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Upload {
    /// Path on the machine running the build.
    pub local: Utf8PathBuf,
    /// Destination path on the guest.
    pub remote: String,
}

/// A validated, immutable description of one bake.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildSpec {
    /// Image name.
    pub name: String,
    /// Image description.
    pub description: String,
    /// Login user on the guest.
    pub user: String,
    /// Size class: a flavour, commercial type or local size name.
    pub instance_type: String,
    /// Zone, region or hypervisor URI; absent for region-less providers.
    pub region: Option<String>,
    /// Base image references keyed by region, `name` or `path`.
    pub base_image: BTreeMap<String, String>,
    /// Files copied before commands run, in document order.
    pub uploads: Vec<Upload>,
    /// Shell commands run in order.
    pub commands: Vec<String>,
    /// User tags in document order.
    pub tags: Vec<Tag>,
    /// Network to attach to, by name.
    pub network: Option<String>,
    /// Whether to reach the guest through a floating IP allocated for the
    /// build (`network.floating-ip`).
    pub floating_ip: bool,
    /// Boot volume size in GB for volume-backed providers.
    pub volume_size: Option<u32>,
    /// Guest memory in MiB, overriding the size class.
    pub memory: Option<u32>,
    /// Guest vCPU count, overriding the size class.
    pub vcpus: Option<u32>,
    /// Guest disk size (`20G`), overriding the size class.
    pub disk_size: Option<String>,
    /// Where a local hypervisor writes the image.
    pub output_path: Option<Utf8PathBuf>,
    /// Provider selector.
    pub provider: Option<String>,
}

impl BuildSpec {
    /// Looks up a base image reference, ignoring the documentation entry.
    #[must_use]
    pub fn base_image_for(&self, key: &str) -> Option<&str> {
        if key == DOC_STRING_KEY {
            return None;
        }
        self.base_image.get(key).map(String::as_str)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NetworkField {
    Name(String),
    Object {
        name: String,
        #[serde(rename = "floating-ip", default)]
        floating_ip: bool,
    },
}

#[derive(Deserialize)]
struct RawSpec {
    name: String,
    description: String,
    user: String,
    instance_type: String,
    #[serde(default)]
    region: Option<String>,
    base_image: BTreeMap<String, Value>,
    uploads: Map<String, Value>,
    commands: Vec<String>,
    #[serde(default)]
    network: Option<NetworkField>,
    #[serde(default)]
    volume_size: Option<u32>,
    #[serde(default)]
    memory: Option<u32>,
    #[serde(default)]
    vcpus: Option<u32>,
    #[serde(default)]
    disk_size: Option<String>,
    #[serde(default)]
    output_path: Option<String>,
    #[serde(default)]
    provider: Option<String>,
}

impl RawSpec {
    fn into_spec(self, parsed_tags: Vec<Tag>) -> Result<BuildSpec, SpecError> {
        for (field, value) in [
            ("name", &self.name),
            ("description", &self.description),
            ("user", &self.user),
            ("instance_type", &self.instance_type),
        ] {
            if value.trim().is_empty() {
                return Err(SpecError::Invalid(format!("{field} must not be empty")));
            }
        }

        let base_image = string_entries("base_image", self.base_image)?
            .into_iter()
            .collect();
        let uploads = string_entries("uploads", self.uploads)?
            .into_iter()
            .map(|(local, remote)| Upload {
                local: Utf8PathBuf::from(local),
                remote,
            })
            .collect();

        let (network, floating_ip) = match self.network {
            None => (None, false),
            Some(NetworkField::Name(name)) => (Some(name), false),
            Some(NetworkField::Object { name, floating_ip }) => (Some(name), floating_ip),
        };

        Ok(BuildSpec {
            name: self.name,
            description: self.description,
            user: self.user,
            instance_type: self.instance_type,
            region: self.region.filter(|region| !region.trim().is_empty()),
            base_image,
            uploads,
            commands: self.commands,
            tags: parsed_tags,
            network,
            floating_ip,
            volume_size: self.volume_size,
            memory: self.memory,
            vcpus: self.vcpus,
            disk_size: self.disk_size,
            output_path: self.output_path.map(Utf8PathBuf::from),
            provider: self.provider,
        })
    }
}

/// String-valued entries of a JSON object, in document order.
fn string_entries(
    field: &str,
    entries: impl IntoIterator<Item = (String, Value)>,
) -> Result<Vec<(String, String)>, SpecError> {
    entries
        .into_iter()
        .filter(|(key, _)| key != DOC_STRING_KEY)
        .map(|(key, value)| match value {
            Value::String(text) => Ok((key, text)),
            other => Err(SpecError::Invalid(format!(
                "{field}.{key} must be a string, got {other}"
            ))),
        })
        .collect()
}

fn read_to_string_ambient(path: &Utf8Path) -> Result<String, String> {
    let file_name = path
        .file_name()
        .ok_or_else(|| format!("path has no file name: {path}"))?;
    let dir_path = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));

    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_name).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests;
