//! Launch phase: submit the instance and wait until it runs.

use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use crate::provider::{InstanceRef, InstanceStatus, LaunchRequest, Provider};
use crate::remote::CommandRunner;
use crate::spec::BuildSpec;

use super::{BuildError, Builder, Phase};

impl<P, R> Builder<'_, P, R>
where
    P: Provider,
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    pub(super) async fn launch(&mut self, spec: &BuildSpec) -> Result<(), BuildError<P::Error>> {
        let deadline = self.policy.launch_timeout;
        match timeout(deadline, self.launch_and_wait(spec)).await {
            Ok(result) => result,
            Err(_) => Err(BuildError::LaunchTimeout { timeout: deadline }),
        }
    }

    async fn launch_and_wait(&mut self, spec: &BuildSpec) -> Result<(), BuildError<P::Error>> {
        let credential = self
            .ledger
            .credential
            .clone()
            .ok_or_else(|| Self::missing("credential"))?;
        let access_rule = self
            .ledger
            .access_rule
            .clone()
            .ok_or_else(|| Self::missing("access rule"))?;
        let public_key = self
            .ledger
            .keypair
            .as_ref()
            .map(|pair| pair.public_key.clone())
            .ok_or_else(|| Self::missing("keypair"))?;
        let work_area = self
            .ledger
            .work_area
            .as_ref()
            .map(|area| area.path().to_path_buf())
            .ok_or_else(|| Self::missing("work area"))?;

        let request = LaunchRequest {
            name: &self.names.instance,
            spec,
            credential: &credential,
            access_rule: &access_rule,
            public_key: &public_key,
            work_area: &work_area,
        };

        self.ledger.launch_submitted = true;
        let instance = self
            .provider
            .launch(&request)
            .await
            .map_err(|source| BuildError::Provider {
                phase: Phase::Launch,
                source,
            })?;
        info!(instance = %instance.id, name = %instance.name, zone = %instance.zone, "instance launched");
        self.ledger.instance = Some(instance.clone());
        self.ledger.instance_captured = true;

        self.wait_for_running(&instance).await?;
        self.attach_public_address(&instance, spec).await
    }

    async fn attach_public_address(
        &mut self,
        instance: &InstanceRef,
        spec: &BuildSpec,
    ) -> Result<(), BuildError<P::Error>> {
        let attached = self
            .provider
            .attach_public_address(instance, spec)
            .await
            .map_err(|source| BuildError::Provider {
                phase: Phase::Launch,
                source,
            })?;
        if let Some(address) = attached {
            info!(instance = %instance.id, address = %address.address, "public address attached");
            self.ledger.public_address = Some(address);
        }
        Ok(())
    }

    async fn wait_for_running(&self, instance: &InstanceRef) -> Result<(), BuildError<P::Error>> {
        loop {
            let status = self
                .provider
                .poll_status(instance)
                .await
                .map_err(|source| BuildError::Provider {
                    phase: Phase::Launch,
                    source,
                })?;

            match status {
                InstanceStatus::Running => return Ok(()),
                InstanceStatus::Failed
                | InstanceStatus::Terminating
                | InstanceStatus::Terminated => {
                    return Err(BuildError::LaunchFailed {
                        instance: instance.id.clone(),
                        status,
                    });
                }
                InstanceStatus::Pending | InstanceStatus::Stopped => {
                    debug!(instance = %instance.id, %status, "waiting for instance to run");
                    sleep(self.provider.poll_interval()).await;
                }
            }
        }
    }
}
