//! Capturing the guest disk as a compressed qcow2 image and managing the
//! image directory.
//!
//! qcow2 has no place for free-form metadata, so tags are written to a
//! `<image>.tags.json` file next to the image.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Map, Value};
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::provider::{ImageDetails, ImageRef, ImageSummary, InstanceRef, SnapshotRequest};
use crate::remote::CommandRunner;
use crate::spec::Tag;

use super::domain::parse_disk_source;
use super::{LibvirtError, LibvirtProvider, files};

/// Sidecar file holding an image's tags.
#[must_use]
pub fn tags_path(image: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{image}.tags.json"))
}

/// Renders tags as a JSON object.
#[must_use]
pub fn render_tags(tags: &[Tag]) -> String {
    let object: Map<String, Value> = tags
        .iter()
        .map(|tag| (tag.key.clone(), Value::String(tag.value.clone())))
        .collect();
    Value::Object(object).to_string()
}

/// Flattens `qemu-img info --output=json` into key/value pairs.
#[must_use]
pub fn info_properties(info: &Value) -> Vec<(String, String)> {
    info.as_object()
        .map(|object| {
            object
                .iter()
                .filter(|(key, _)| key.as_str() != "filename")
                .map(|(key, value)| {
                    let text = value
                        .as_str()
                        .map_or_else(|| value.to_string(), str::to_owned);
                    (key.clone(), text)
                })
                .collect()
        })
        .unwrap_or_default()
}

impl<R> LibvirtProvider<R>
where
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    /// Shuts the guest down (forcing it off after the configured grace
    /// period) and converts its disk into the output image.
    pub(super) async fn capture_disk(
        &self,
        instance: &InstanceRef,
        request: &SnapshotRequest<'_>,
    ) -> Result<ImageRef, LibvirtError> {
        let listing = self
            .virsh(
                &instance.zone,
                "domblklist",
                &["domblklist", &instance.id, "--details"],
            )
            .await?;
        let disk = parse_disk_source(&listing)
            .map(str::to_owned)
            .ok_or_else(|| LibvirtError::NotFound {
                kind: "disk of domain",
                name: instance.id.clone(),
            })?;

        self.shut_down(instance).await?;

        let output = self.output_path(request.spec);
        self.qemu_img(
            "convert",
            &["convert", "-O", "qcow2", "-c", &disk, output.as_str()],
        )
        .await?;
        files::write(&tags_path(&output), &render_tags(request.tags))?;
        info!(image = %output, "disk captured");

        Ok(ImageRef {
            id: output.to_string(),
            name: request.spec.name.clone(),
            zone: None,
        })
    }

    async fn shut_down(&self, instance: &InstanceRef) -> Result<(), LibvirtError> {
        if self.domain_state(instance).await?.as_deref() == Some("shut off") {
            return Ok(());
        }
        self.virsh(&instance.zone, "shutdown", &["shutdown", &instance.id])
            .await?;

        let grace = Duration::from_secs(self.config.shutdown_timeout_secs);
        let wait = async {
            loop {
                match self.domain_state(instance).await? {
                    Some(state) if state == "shut off" => return Ok(()),
                    None => {
                        return Err(LibvirtError::NotFound {
                            kind: "domain",
                            name: instance.id.clone(),
                        });
                    }
                    Some(_) => sleep(self.poll_interval).await,
                }
            }
        };
        match timeout(grace, wait).await {
            Ok(result) => result,
            Err(_) => {
                warn!(domain = %instance.id, secs = grace.as_secs(), "graceful shutdown timed out; forcing off");
                self.force_off(instance).await
            }
        }
    }

    pub(super) fn local_images(&self) -> Result<Vec<ImageSummary>, LibvirtError> {
        Ok(files::files_with_extension(&self.image_dir, "qcow2")?
            .into_iter()
            .map(|(file_name, size)| {
                let path = self.image_dir.join(&file_name);
                ImageSummary {
                    id: path.to_string(),
                    name: file_name
                        .strip_suffix(".qcow2")
                        .unwrap_or(&file_name)
                        .to_owned(),
                    status: String::from("available"),
                    detail: format!("{size} bytes"),
                }
            })
            .collect())
    }

    pub(super) async fn describe_image(&self, name: &str) -> Result<ImageDetails, LibvirtError> {
        let path = self.image_path(name);
        if !files::exists(&path) {
            return Err(LibvirtError::NotFound {
                kind: "image",
                name: name.to_owned(),
            });
        }
        let raw = self
            .qemu_img("info", &["info", "--output=json", path.as_str()])
            .await?;
        let info: Value = serde_json::from_str(&raw).map_err(|err| LibvirtError::io(&path, err))?;
        let mut properties = info_properties(&info);

        if let Some(text) = files::read_optional(&tags_path(&path))? {
            let tags: Map<String, Value> =
                serde_json::from_str(&text).map_err(|err| LibvirtError::io(&path, err))?;
            properties.extend(tags.into_iter().map(|(key, value)| {
                let rendered = value
                    .as_str()
                    .map_or_else(|| value.to_string(), str::to_owned);
                (key, rendered)
            }));
        }

        Ok(ImageDetails {
            id: path.to_string(),
            name: name.to_owned(),
            properties,
        })
    }

    pub(super) fn remove_image(&self, name: &str) -> Result<(), LibvirtError> {
        let path = self.image_path(name);
        files::remove(&path, false)?;
        files::remove(&tags_path(&path), true)?;
        info!(image = %path, "image deleted");
        Ok(())
    }
}
