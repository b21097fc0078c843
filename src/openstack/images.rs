//! Image resolution and management through Glance, and snapshots through
//! Nova's `createImage` action.

use std::collections::BTreeMap;

use reqwest::Method;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::provider::{
    ImageDetails, ImageLookup, ImageRef, ImageStatus, ImageSummary, InstanceRef, SnapshotRequest,
};
use crate::spec::BuildSpec;

use super::session::query_url;
use super::types::{CreateImage, CreateImageAction, CreateImageResponse, GlanceImageList};
use super::{OpenStackError, OpenStackProvider};

/// Maps a Glance image status onto the provider-neutral status.
pub(crate) fn map_image_status(status: &str) -> ImageStatus {
    match status {
        "active" => ImageStatus::Available,
        "killed" | "deleted" | "pending_delete" | "deactivated" => ImageStatus::Failed,
        _ => ImageStatus::Pending,
    }
}

/// The base image reference for the spec: the entry for its region when
/// one is set, otherwise the `name` entry.
pub(crate) fn base_image_reference(spec: &BuildSpec) -> Option<&str> {
    spec.region
        .as_deref()
        .and_then(|region| spec.base_image_for(region))
        .or_else(|| spec.base_image_for("name"))
}

fn field<'a>(image: &'a Value, key: &str) -> &'a str {
    image.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Flattens a Glance image document into sorted key/value pairs.
pub(crate) fn image_properties(image: &Value) -> Vec<(String, String)> {
    image
        .as_object()
        .map(|object| {
            object
                .iter()
                .filter(|(key, _)| key.as_str() != "id" && key.as_str() != "name")
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

impl OpenStackProvider {
    pub(super) async fn resolve_base_image(&self, spec: &BuildSpec) -> Result<String, OpenStackError> {
        let reference = base_image_reference(spec).ok_or_else(|| {
            OpenStackError::Spec(String::from("base_image needs a `name` or region entry"))
        })?;
        if Uuid::parse_str(reference).is_ok() {
            return Ok(reference.to_owned());
        }
        let mut candidates = self.images_named(reference).await?;
        candidates.retain(|image| field(image, "status") == "active");
        candidates.sort_by(|lhs, rhs| field(rhs, "created_at").cmp(field(lhs, "created_at")));
        candidates
            .first()
            .map(|image| field(image, "id").to_owned())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| OpenStackError::NotFound {
                kind: "image",
                name: reference.to_owned(),
            })
    }

    async fn images_named(&self, name: &str) -> Result<Vec<Value>, OpenStackError> {
        let url = query_url(&self.session.image_url("images"), &[("name", name)])?;
        let list: GlanceImageList = self.session.get(&url).await?;
        Ok(list.images)
    }

    pub(super) async fn find_image(&self, name: &str) -> Result<Option<Value>, OpenStackError> {
        Ok(self.images_named(name).await?.into_iter().next())
    }

    /// Reads the image with id `id`, mapping a 404 to `None`.
    async fn image_by_id(&self, id: &str) -> Result<Option<Value>, OpenStackError> {
        let url = self.session.image_url(&format!("images/{id}"));
        match self.session.get::<Value>(&url).await {
            Ok(image) => Ok(Some(image)),
            Err(OpenStackError::Api { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Finds an image by identifier when `image` is one, then by name.
    async fn lookup_image(&self, image: &str) -> Result<Value, OpenStackError> {
        let by_id = match ImageLookup::parse(image) {
            ImageLookup::Id(id) => self.image_by_id(id).await?,
            ImageLookup::Name(_) => None,
        };
        match by_id {
            Some(found) => Ok(found),
            None => self.require_image(image).await,
        }
    }

    async fn require_image(&self, name: &str) -> Result<Value, OpenStackError> {
        self.find_image(name)
            .await?
            .ok_or_else(|| OpenStackError::NotFound {
                kind: "image",
                name: name.to_owned(),
            })
    }

    /// Stops the server, then snapshots it with the tags as image
    /// properties.
    pub(super) async fn create_image(
        &self,
        instance: &InstanceRef,
        request: &SnapshotRequest<'_>,
    ) -> Result<ImageRef, OpenStackError> {
        self.stop_server(instance).await?;

        let name = request.spec.name.as_str();
        let metadata: BTreeMap<&str, &str> = request
            .tags
            .iter()
            .map(|tag| (tag.key.as_str(), tag.value.as_str()))
            .collect();
        let action = CreateImageAction {
            create_image: CreateImage { name, metadata },
        };
        let url = self
            .session
            .compute_url(&format!("servers/{}/action", instance.id));
        let body = self.session.send_raw(Method::POST, &url, &action).await?;

        let image_id = match serde_json::from_slice::<CreateImageResponse>(&body) {
            Ok(response) => response.image_id,
            Err(_) => {
                let image = self.require_image(name).await?;
                field(&image, "id").to_owned()
            }
        };
        info!(image = %image_id, "snapshot requested");
        Ok(ImageRef {
            id: image_id,
            name: name.to_owned(),
            zone: Some(self.session.region_label().to_owned()),
        })
    }

    pub(super) async fn glance_status(&self, image: &ImageRef) -> Result<ImageStatus, OpenStackError> {
        let document: Value = self
            .session
            .get(&self.session.image_url(&format!("images/{}", image.id)))
            .await?;
        Ok(map_image_status(field(&document, "status")))
    }

    pub(super) async fn owned_images(&self) -> Result<Vec<ImageSummary>, OpenStackError> {
        let url = query_url(
            &self.session.image_url("images"),
            &[("owner", self.session.project_id())],
        )?;
        let list: GlanceImageList = self.session.get(&url).await?;
        Ok(list
            .images
            .iter()
            .map(|image| ImageSummary {
                id: field(image, "id").to_owned(),
                name: field(image, "name").to_owned(),
                status: field(image, "status").to_owned(),
                detail: field(image, "created_at").to_owned(),
            })
            .collect())
    }

    pub(super) async fn describe_image(&self, image: &str) -> Result<ImageDetails, OpenStackError> {
        let image = self.lookup_image(image).await?;
        Ok(ImageDetails {
            id: field(&image, "id").to_owned(),
            name: field(&image, "name").to_owned(),
            properties: image_properties(&image),
        })
    }

    pub(super) async fn remove_image(&self, image: &str) -> Result<(), OpenStackError> {
        let image = self.lookup_image(image).await?;
        let id = field(&image, "id");
        self.session
            .delete(&self.session.image_url(&format!("images/{id}")))
            .await?;
        info!(image = %id, "image deleted");
        Ok(())
    }
}
