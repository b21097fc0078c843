//! Wait-for-reachable phase.
//!
//! Each attempt re-resolves the address, because some backends only report
//! one once the guest has taken a DHCP lease, then tries SSH. A public
//! address the build attached itself is used as is. Attempts are
//! separated by a fixed delay and capped by the policy's attempt budget.

use camino::Utf8Path;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::provider::{InstanceRef, Provider};
use crate::remote::{CommandRunner, RemoteError, SshSession, SshTarget};
use crate::spec::BuildSpec;

use super::{BuildError, Builder};

enum Attempt<E: std::error::Error + 'static> {
    Retry(String),
    Fatal(BuildError<E>),
}

impl<P, R> Builder<'_, P, R>
where
    P: Provider,
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    pub(super) async fn wait_for_reachable(
        &mut self,
        spec: &BuildSpec,
    ) -> Result<(), BuildError<P::Error>> {
        let instance = self
            .ledger
            .instance
            .clone()
            .ok_or_else(|| Self::missing("instance"))?;
        let identity = self
            .ledger
            .keypair
            .as_ref()
            .map(|pair| pair.private_key.clone())
            .ok_or_else(|| Self::missing("keypair"))?;

        let attempts = self.policy.ssh_attempts.max(1);
        let mut last_reason = String::from("no attempt made");
        for attempt in 1..=attempts {
            self.connect_attempts = attempt;
            match self.try_connect(&instance, &spec.user, &identity).await {
                Ok(session) => {
                    info!(attempt, host = %session.target().host, "guest reachable");
                    self.session = Some(session);
                    return Ok(());
                }
                Err(Attempt::Retry(reason)) => {
                    warn!(attempt, attempts, %reason, "guest not reachable yet");
                    last_reason = reason;
                    if attempt < attempts {
                        sleep(self.policy.ssh_retry_delay).await;
                    }
                }
                Err(Attempt::Fatal(err)) => return Err(err),
            }
        }

        Err(BuildError::UnreachableTimeout {
            attempts,
            last_reason,
        })
    }

    async fn try_connect(
        &self,
        instance: &InstanceRef,
        user: &str,
        identity: &Utf8Path,
    ) -> Result<SshSession<R>, Attempt<P::Error>> {
        let host = match &self.ledger.public_address {
            Some(attached) => attached.address,
            None => self
                .provider
                .resolve_address(instance)
                .await
                .map_err(|err| Attempt::Retry(format!("address lookup failed: {err}")))?
                .preferred()
                .ok_or_else(|| Attempt::Retry(String::from("no address assigned yet")))?,
        };

        let target = SshTarget {
            user: user.to_owned(),
            host,
            identity: identity.to_path_buf(),
        };
        self.ssh.connect(&target).await.map_err(|err| match err {
            RemoteError::Unreachable { reason, .. } => Attempt::Retry(reason),
            auth @ RemoteError::Auth { .. } => Attempt::Fatal(BuildError::Auth(auth)),
            other => Attempt::Fatal(BuildError::Connect(other)),
        })
    }
}
