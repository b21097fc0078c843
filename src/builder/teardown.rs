//! Best-effort release of everything a build created.
//!
//! Steps run in reverse order of creation. A failing step is logged and
//! recorded, and the next step still runs.

use std::fmt;

use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::provider::{
    CredentialRef, InstanceRef, InstanceStatus, Provider, ProviderError, ProviderErrorKind,
};
use crate::remote::CommandRunner;

use super::Builder;
use super::resources::remove_file_ambient;

/// One teardown action.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TeardownStep {
    /// Drop the SSH session.
    CloseSession,
    /// Terminate the build instance and wait until it is gone.
    TerminateInstance,
    /// Look up instances launched with the build credential whose handle
    /// was never returned, and terminate them.
    RecoverLostInstance,
    /// Release the public address allocated for the build.
    ReleasePublicAddress,
    /// Delete the access rule set.
    DeleteAccessRule,
    /// Delete the registered credential.
    DeleteCredential,
    /// Delete the local key files.
    RemoveKeyFiles,
    /// Delete the work area.
    RemoveWorkArea,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::CloseSession => "close session",
            Self::TerminateInstance => "terminate instance",
            Self::RecoverLostInstance => "recover lost instance",
            Self::ReleasePublicAddress => "release public address",
            Self::DeleteAccessRule => "delete access rule",
            Self::DeleteCredential => "delete credential",
            Self::RemoveKeyFiles => "remove key files",
            Self::RemoveWorkArea => "remove work area",
        };
        f.write_str(label)
    }
}

/// Outcome of one teardown step.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TeardownEntry {
    /// Step that ran.
    pub step: TeardownStep,
    /// `Err` carries the failure message.
    pub outcome: Result<(), String>,
}

/// Outcomes of every teardown step that had something to do.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TeardownReport {
    /// Entries in execution order.
    pub entries: Vec<TeardownEntry>,
}

impl TeardownReport {
    /// Whether every step succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.entries.iter().all(|entry| entry.outcome.is_ok())
    }

    /// Steps that failed, with their messages.
    #[must_use]
    pub fn failures(&self) -> Vec<(TeardownStep, &str)> {
        self.entries
            .iter()
            .filter_map(|entry| match &entry.outcome {
                Err(message) => Some((entry.step, message.as_str())),
                Ok(()) => None,
            })
            .collect()
    }

    /// Steps that ran, in order.
    #[must_use]
    pub fn steps(&self) -> Vec<TeardownStep> {
        self.entries.iter().map(|entry| entry.step).collect()
    }

    fn record(&mut self, step: TeardownStep, outcome: Result<(), String>) {
        match &outcome {
            Ok(()) => info!(%step, "teardown step done"),
            Err(message) => warn!(%step, error = %message, "teardown step failed"),
        }
        self.entries.push(TeardownEntry { step, outcome });
    }
}

impl<P, R> Builder<'_, P, R>
where
    P: Provider,
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    /// Releases whatever the ledger holds. Runs at most once.
    pub(super) async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        let mut report = TeardownReport::default();

        if self.session.take().is_some() {
            report.record(TeardownStep::CloseSession, Ok(()));
        }

        if let Some(instance) = self.ledger.instance.take() {
            let outcome = self.terminate_and_wait(&instance).await;
            report.record(TeardownStep::TerminateInstance, outcome);
        } else if self.ledger.launch_submitted && !self.ledger.instance_captured {
            if let Some(credential) = self.ledger.credential.clone() {
                let outcome = self.recover_lost_instances(&credential).await;
                report.record(TeardownStep::RecoverLostInstance, outcome);
            }
        }

        if let Some(address) = self.ledger.public_address.take() {
            let outcome = self
                .provider
                .release_public_address(&address)
                .await
                .or_else(ignore_not_found);
            report.record(TeardownStep::ReleasePublicAddress, outcome);
        }

        if let Some(rule) = self.ledger.access_rule.take() {
            let outcome = self
                .provider
                .delete_access_rule(&rule)
                .await
                .or_else(ignore_not_found);
            report.record(TeardownStep::DeleteAccessRule, outcome);
        }

        if let Some(credential) = self.ledger.credential.take() {
            let outcome = self
                .provider
                .delete_credential(&credential)
                .await
                .or_else(ignore_not_found);
            report.record(TeardownStep::DeleteCredential, outcome);
        }

        if let Some(keypair) = self.ledger.keypair.take() {
            let outcome = keypair
                .files()
                .into_iter()
                .try_for_each(remove_file_ambient)
                .map_err(|err| err.to_string());
            report.record(TeardownStep::RemoveKeyFiles, outcome);
        }

        if let Some(area) = self.ledger.work_area.take() {
            let path = area.path().to_string();
            let outcome = area
                .remove()
                .map_err(|err| format!("removing {path}: {err}"));
            report.record(TeardownStep::RemoveWorkArea, outcome);
        }

        if !report.is_clean() {
            warn!(
                failures = report.failures().len(),
                "teardown left resources behind; remove them manually"
            );
        }
        self.teardown = report;
    }

    async fn terminate_and_wait(&self, instance: &InstanceRef) -> Result<(), String> {
        let deadline = self.policy.teardown_timeout;
        timeout(deadline, async {
            if let Err(err) = self.provider.terminate(instance).await {
                if err.kind() == ProviderErrorKind::NotFound {
                    return Ok(());
                }
                return Err(err.to_string());
            }
            loop {
                match self.provider.poll_status(instance).await {
                    Ok(InstanceStatus::Terminated) => return Ok(()),
                    Ok(status) => {
                        info!(instance = %instance.id, %status, "waiting for termination");
                        sleep(self.provider.poll_interval()).await;
                    }
                    Err(err) if err.kind() == ProviderErrorKind::NotFound => return Ok(()),
                    Err(err) => return Err(err.to_string()),
                }
            }
        })
        .await
        .map_err(|_| {
            format!(
                "instance {} still present after {}s",
                instance.id,
                deadline.as_secs()
            )
        })?
    }

    async fn recover_lost_instances(
        &self,
        credential: &CredentialRef,
    ) -> Result<(), String> {
        let found = self
            .provider
            .find_instances_by_credential(credential)
            .await
            .map_err(|err| err.to_string())?;
        if found.is_empty() {
            return Ok(());
        }
        let mut failures = Vec::new();
        for instance in &found {
            warn!(instance = %instance.id, "terminating instance whose launch result was lost");
            if let Err(message) = self.terminate_and_wait(instance).await {
                failures.push(message);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join("; "))
        }
    }
}

fn ignore_not_found<E: ProviderError>(err: E) -> Result<(), String> {
    if err.kind() == ProviderErrorKind::NotFound {
        Ok(())
    } else {
        Err(err.to_string())
    }
}
