//! Image phase: prepare the guest, snapshot, poll until available.

use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::provider::{ImageRef, ImageStatus, InstanceRef, Provider, SnapshotRequest};
use crate::remote::{CommandRunner, SshSession};
use crate::spec::{BuildSpec, merge_tags};

use super::{BuildError, Builder, Phase};

impl<P, R> Builder<'_, P, R>
where
    P: Provider,
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    pub(super) async fn create_image(
        &mut self,
        spec: &BuildSpec,
    ) -> Result<ImageRef, BuildError<P::Error>> {
        let instance = self
            .ledger
            .instance
            .clone()
            .ok_or_else(|| Self::missing("instance"))?;
        let session = self
            .session
            .clone()
            .ok_or_else(|| Self::missing("session"))?;

        let deadline = self.policy.image_timeout;
        match timeout(deadline, self.snapshot_and_wait(spec, &instance, &session)).await {
            Ok(result) => result,
            Err(_) => Err(BuildError::ImageTimeout { timeout: deadline }),
        }
    }

    async fn snapshot_and_wait(
        &self,
        spec: &BuildSpec,
        instance: &InstanceRef,
        session: &SshSession<R>,
    ) -> Result<ImageRef, BuildError<P::Error>> {
        for command in self.provider.pre_image_commands() {
            let output = session
                .execute(&command)
                .await
                .map_err(BuildError::Remote)?;
            if output.exit_code != Some(0) {
                warn!(%command, status = ?output.exit_code, "image preparation step failed");
            }
        }

        let tags = merge_tags(spec);
        let request = SnapshotRequest { spec, tags: &tags };
        let image = self
            .provider
            .snapshot(instance, &request)
            .await
            .map_err(|source| BuildError::Provider {
                phase: Phase::Image,
                source,
            })?;
        info!(image = %image.id, name = %image.name, "snapshot requested");

        loop {
            let status = self
                .provider
                .image_status(&image)
                .await
                .map_err(|source| BuildError::Provider {
                    phase: Phase::Image,
                    source,
                })?;
            if status.is_complete() {
                return Ok(image);
            }
            if status == ImageStatus::Failed {
                return Err(BuildError::ImageFailed { image: image.id });
            }
            debug!(image = %image.id, %status, "waiting for image");
            sleep(self.provider.poll_interval()).await;
        }
    }
}
