//! Acquire phase: work area, keypair, credential and access rule.

use tracing::info;

use crate::provider::{
    AccessRuleSpec, CredentialRequest, Provider, ProviderError, ProviderErrorKind,
};
use crate::remote::CommandRunner;
use crate::spec::BuildSpec;

use super::resources::WorkArea;
use super::{BuildError, Builder, Phase};

impl<P, R> Builder<'_, P, R>
where
    P: Provider,
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    pub(super) async fn acquire(&mut self, spec: &BuildSpec) -> Result<(), BuildError<P::Error>> {
        let root = self.provider.work_area_root();
        let work_area = WorkArea::create(&root)
            .map_err(|err| BuildError::Local(format!("creating work area in {root}: {err}")))?;
        let area_path = work_area.path().to_path_buf();
        info!(path = %area_path, "created work area");
        self.ledger.work_area = Some(work_area);

        let keypair = self
            .ssh
            .generate_keypair(&area_path, &self.names.credential)
            .await
            .map_err(|err| BuildError::Local(err.to_string()))?;
        let public_key = keypair.public_key.clone();
        self.ledger.keypair = Some(keypair);

        let credential = self
            .provider
            .create_credential(&CredentialRequest {
                name: self.names.credential.clone(),
                public_key,
            })
            .await
            .map_err(acquire_error)?;
        info!(credential = %credential.name, id = %credential.id, "registered credential");
        self.ledger.credential = Some(credential);

        let rule = self
            .provider
            .create_access_rule(&AccessRuleSpec::ssh_only(
                self.names.access_rule.clone(),
                spec.region.clone(),
            ))
            .await
            .map_err(acquire_error)?;
        info!(access_rule = %rule.name, id = %rule.id, "created access rule");
        self.ledger.access_rule = Some(rule);
        Ok(())
    }
}

fn acquire_error<E: ProviderError>(err: E) -> BuildError<E> {
    match err.kind() {
        ProviderErrorKind::Collision | ProviderErrorKind::Quota => BuildError::QuotaOrCollision(err),
        ProviderErrorKind::NotFound | ProviderErrorKind::Other => BuildError::Provider {
            phase: Phase::Acquire,
            source: err,
        },
    }
}
