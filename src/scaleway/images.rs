//! Image creation and management for the Scaleway provider.
//!
//! A bake ends with the `backup` action, which snapshots every volume of the
//! server and registers an image named after the spec. Tags are written
//! afterwards as `Key=Value` strings since Scaleway image tags are flat.

use reqwest::Method;
use scaleway_rs::{ScalewayImage, ScalewayListInstanceImagesBuilder};
use tracing::{debug, info, warn};

use crate::provider::{
    ImageDetails, ImageLookup, ImageRef, ImageStatus, ImageSummary, InstanceRef, SnapshotRequest,
};
use crate::spec::Tag;

use super::types::{
    FullImageEnvelope, ImageEnvelope, ServerActionRequest, TaskEnvelope, UpdateImageRequest,
};
use super::{ScalewayProvider, ScalewayProviderError};

/// Maps a Scaleway image state onto the provider-neutral status.
pub(crate) fn map_image_state(state: &str) -> ImageStatus {
    match state {
        "available" => ImageStatus::Available,
        "error" => ImageStatus::Failed,
        _ => ImageStatus::Pending,
    }
}

/// Renders tags the way Scaleway stores them.
pub(crate) fn render_tags(tags: &[Tag]) -> Vec<String> {
    tags.iter()
        .map(|tag| format!("{}={}", tag.key, tag.value))
        .collect()
}

/// Runs `lookup` zone by zone and returns the first hit with its zone.
pub(crate) async fn first_in_zones<T, E, F, Fut>(
    zones: &[String],
    mut lookup: F,
) -> Result<Option<(String, T)>, E>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    for zone in zones {
        if let Some(found) = lookup(zone.clone()).await? {
            return Ok(Some((zone.clone(), found)));
        }
    }
    Ok(None)
}

/// Extracts the image identifier from a task's `href_result`
/// (`/images/<id>`).
pub(crate) fn image_id_from_href(href: &str) -> Option<&str> {
    href.rsplit_once("/images/")
        .map(|(_, id)| id.trim_end_matches('/'))
        .filter(|id| !id.is_empty())
}

impl ScalewayProvider {
    pub(super) async fn backup_server(
        &self,
        instance: &InstanceRef,
        request: &SnapshotRequest<'_>,
    ) -> Result<ImageRef, ScalewayProviderError> {
        let name = request.spec.name.as_str();
        let action = ServerActionRequest {
            action: "backup",
            name: Some(name),
        };
        let url = self
            .http
            .instance_url(&instance.zone, &format!("servers/{}/action", instance.id));
        let task: TaskEnvelope = self.http.send_json(Method::POST, &url, &action).await?;

        let image_id = match task.task.href_result.as_deref().and_then(image_id_from_href) {
            Some(id) => id.to_owned(),
            None => {
                debug!(image = name, "backup task carried no image reference; looking up by name");
                self.find_image(&instance.zone, name)
                    .await?
                    .map(|image| image.id)
                    .ok_or_else(|| ScalewayProviderError::Api {
                        status: None,
                        etype: String::from("not_found"),
                        message: format!("backup of {} produced no image", instance.id),
                    })?
            }
        };

        let tags = render_tags(request.tags);
        let tag_url = self
            .http
            .instance_url(&instance.zone, &format!("images/{image_id}"));
        self.http
            .send_empty(Method::PATCH, &tag_url, Some(&UpdateImageRequest { tags: &tags }))
            .await?;
        info!(image = %image_id, zone = %instance.zone, "backup requested");

        Ok(ImageRef {
            id: image_id,
            name: name.to_owned(),
            zone: Some(instance.zone.clone()),
        })
    }

    pub(super) async fn read_image_state(
        &self,
        image: &ImageRef,
    ) -> Result<ImageStatus, ScalewayProviderError> {
        let zone = self.zone_for(image.zone.as_deref());
        let url = self.http.instance_url(zone, &format!("images/{}", image.id));
        let envelope: ImageEnvelope = self.http.get(&url).await?;
        Ok(map_image_state(&envelope.image.state))
    }

    /// Looks up a project image by exact name.
    pub(super) async fn find_image(
        &self,
        zone: &str,
        name: &str,
    ) -> Result<Option<ScalewayImage>, ScalewayProviderError> {
        let images = ScalewayListInstanceImagesBuilder::new(self.api.clone(), zone)
            .project(&self.config.default_project_id)
            .name(name)
            .run_async()
            .await?;
        Ok(images.into_iter().find(|image| image.name == name))
    }

    /// Private images of the project across the search zones, oldest
    /// first.
    pub(super) async fn project_images(&self) -> Result<Vec<ImageSummary>, ScalewayProviderError> {
        let mut images = Vec::new();
        for zone in self.config.search_zones() {
            let found = ScalewayListInstanceImagesBuilder::new(self.api.clone(), &zone)
                .project(&self.config.default_project_id)
                .public(false)
                .run_async()
                .await?;
            debug!(zone = %zone, count = found.len(), "listed images");
            images.extend(found);
        }
        images.sort_by(|lhs, rhs| lhs.creation_date.cmp(&rhs.creation_date));
        Ok(images
            .into_iter()
            .map(|image| ImageSummary {
                id: image.id,
                name: image.name,
                status: image.state,
                detail: format!("{} {}", image.zone, image.creation_date),
            })
            .collect())
    }

    pub(super) async fn describe_image(
        &self,
        image: &str,
    ) -> Result<ImageDetails, ScalewayProviderError> {
        let (_, found) = self.locate_image(image).await?;
        let mut properties = vec![
            (String::from("zone"), found.zone.clone()),
            (String::from("state"), found.state.clone()),
            (String::from("arch"), found.arch.clone()),
            (String::from("creation_date"), found.creation_date.clone()),
            (String::from("modification_date"), found.modification_date.clone()),
            (String::from("root_volume"), found.root_volume.id.clone()),
        ];
        properties.extend(found.tags.iter().map(|tag| match tag.split_once('=') {
            Some((key, value)) => (key.to_owned(), value.to_owned()),
            None => (String::from("tag"), tag.clone()),
        }));
        Ok(ImageDetails {
            id: found.id,
            name: found.name,
            properties,
        })
    }

    /// Deletes the image and then its root snapshot.
    pub(super) async fn remove_image(&self, image: &str) -> Result<(), ScalewayProviderError> {
        let (zone, found) = self.locate_image(image).await?;
        self.http
            .delete(&self.http.instance_url(&zone, &format!("images/{}", found.id)))
            .await?;
        info!(image = %found.id, zone = %zone, "image deleted");

        let snapshot = found.root_volume.id;
        if snapshot.is_empty() {
            return Ok(());
        }
        let url = self.http.instance_url(&zone, &format!("snapshots/{snapshot}"));
        match self.http.delete(&url).await {
            Err(ScalewayProviderError::Api {
                status: Some(404), ..
            }) => {
                warn!(snapshot = %snapshot, "root snapshot already gone");
                Ok(())
            }
            other => other,
        }
    }

    /// Reads the image with id `id` in `zone`, mapping a 404 to `None`.
    async fn image_by_id(
        &self,
        zone: &str,
        id: &str,
    ) -> Result<Option<ScalewayImage>, ScalewayProviderError> {
        let url = self.http.instance_url(zone, &format!("images/{id}"));
        match self.http.get::<FullImageEnvelope>(&url).await {
            Ok(envelope) => Ok(Some(envelope.image)),
            Err(ScalewayProviderError::Api {
                status: Some(404), ..
            }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Finds an image in the search zones, by identifier when `image` is
    /// one, then by name.
    async fn locate_image(
        &self,
        image: &str,
    ) -> Result<(String, ScalewayImage), ScalewayProviderError> {
        let zones = self.config.search_zones();
        if let ImageLookup::Id(id) = ImageLookup::parse(image) {
            let by_id = first_in_zones(&zones, |zone| async move {
                self.image_by_id(&zone, id).await
            })
            .await?;
            if let Some(found) = by_id {
                return Ok(found);
            }
        }
        first_in_zones(&zones, |zone| async move { self.find_image(&zone, image).await })
            .await?
            .ok_or_else(|| ScalewayProviderError::ImageNotFound {
                label: image.to_owned(),
                arch: self.config.default_architecture.clone(),
                zone: zones.join(","),
            })
    }
}
