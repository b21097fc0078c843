//! Base image resolution for the Scaleway provider.
//!
//! The spec's `base_image` entry for the zone is either an image UUID, used
//! as is, or a label resolved against project images first and public
//! images second, newest available match winning.

use std::future::Future;

use scaleway_rs::{ScalewayImage, ScalewayListInstanceImagesBuilder};
use uuid::Uuid;

use crate::scaleway::types::Zone;
use crate::spec::BuildSpec;

use super::super::{ScalewayProvider, ScalewayProviderError};

/// What to look for: label, architecture and zone.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(in crate::scaleway) struct ImageQuery {
    pub(in crate::scaleway) label: String,
    pub(in crate::scaleway) arch: String,
    pub(in crate::scaleway) zone: String,
}

impl ScalewayProvider {
    pub(in crate::scaleway) async fn resolve_base_image(
        &self,
        spec: &BuildSpec,
        zone: &Zone,
    ) -> Result<String, ScalewayProviderError> {
        let label = spec.base_image_for(zone.as_str()).ok_or_else(|| {
            ScalewayProviderError::Spec(format!("base_image has no entry for zone {}", zone.as_str()))
        })?;
        if Uuid::parse_str(label).is_ok() {
            return Ok(label.to_owned());
        }

        let query = ImageQuery {
            label: label.to_owned(),
            arch: self.config.default_architecture.clone(),
            zone: zone.as_str().to_owned(),
        };
        self.resolve_image_id(&query).await
    }

    async fn resolve_image_id(&self, query: &ImageQuery) -> Result<String, ScalewayProviderError> {
        let project_id = self.config.default_project_id.as_str();
        let organisation = self.config.default_organization_id.as_deref();
        Self::resolve_image_id_with(
            query,
            || async move {
                let mut scoped =
                    ScalewayListInstanceImagesBuilder::new(self.api.clone(), &query.zone)
                        .project(project_id)
                        .name(&query.label)
                        .arch(&query.arch);
                if let Some(org) = organisation {
                    scoped = scoped.organization(org);
                }
                scoped.run_async().await.map_err(ScalewayProviderError::from)
            },
            || async move {
                ScalewayListInstanceImagesBuilder::new(self.api.clone(), &query.zone)
                    .public(true)
                    .name(&query.label)
                    .arch(&query.arch)
                    .run_async()
                    .await
                    .map_err(ScalewayProviderError::from)
            },
        )
        .await
    }

    pub(in crate::scaleway) async fn resolve_image_id_with<FutA, FutB, FetchA, FetchB>(
        query: &ImageQuery,
        project_fetch: FetchA,
        public_fetch: FetchB,
    ) -> Result<String, ScalewayProviderError>
    where
        FetchA: FnOnce() -> FutA,
        FetchB: FnOnce() -> FutB,
        FutA: Future<Output = Result<Vec<ScalewayImage>, ScalewayProviderError>>,
        FutB: Future<Output = Result<Vec<ScalewayImage>, ScalewayProviderError>>,
    {
        let project_images = Self::filter_images(project_fetch().await?, query);
        let candidates = if project_images.is_empty() {
            Self::filter_images(public_fetch().await?, query)
        } else {
            project_images
        };

        Self::select_image_id(candidates, query)
    }

    pub(in crate::scaleway) fn select_image_id(
        mut candidates: Vec<ScalewayImage>,
        query: &ImageQuery,
    ) -> Result<String, ScalewayProviderError> {
        candidates.sort_by(|lhs, rhs| rhs.creation_date.cmp(&lhs.creation_date));
        candidates
            .into_iter()
            .next()
            .map(|image| image.id)
            .ok_or_else(|| ScalewayProviderError::ImageNotFound {
                label: query.label.clone(),
                arch: query.arch.clone(),
                zone: query.zone.clone(),
            })
    }

    pub(in crate::scaleway) fn filter_images(
        images: Vec<ScalewayImage>,
        query: &ImageQuery,
    ) -> Vec<ScalewayImage> {
        images
            .into_iter()
            .filter(|image| image.arch == query.arch)
            .filter(|image| image.state == "available")
            .collect()
    }
}
