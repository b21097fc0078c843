//! Configure phase: uploads, then commands, over the one session.

use tokio::time::timeout;
use tracing::{info, warn};

use crate::provider::Provider;
use crate::remote::{CommandRunner, SshSession};
use crate::spec::{BuildSpec, Upload};

use super::{BuildError, Builder, CommandRecord};

impl<P, R> Builder<'_, P, R>
where
    P: Provider,
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    pub(super) async fn configure(&mut self, spec: &BuildSpec) -> Result<(), BuildError<P::Error>> {
        let session = self
            .session
            .clone()
            .ok_or_else(|| Self::missing("session"))?;

        let upload_deadline = self.policy.upload_timeout;
        timeout(upload_deadline, copy_uploads(&session, &spec.uploads))
            .await
            .map_err(|_| BuildError::ConfigureTimeout {
                stage: "uploads",
                timeout: upload_deadline,
            })??;

        let command_deadline = self.policy.command_timeout;
        timeout(command_deadline, self.run_commands(&session, &spec.commands))
            .await
            .map_err(|_| BuildError::ConfigureTimeout {
                stage: "commands",
                timeout: command_deadline,
            })?
    }

    async fn run_commands(
        &mut self,
        session: &SshSession<R>,
        commands: &[String],
    ) -> Result<(), BuildError<P::Error>> {
        let total = commands.len();
        for (index, command) in commands.iter().enumerate() {
            info!(step = index + 1, total, %command, "running command");
            let output = session
                .execute(command)
                .await
                .map_err(BuildError::Remote)?;
            let record = CommandRecord {
                command: command.clone(),
                exit_code: output.exit_code,
            };
            if !record.succeeded() {
                warn!(
                    %command,
                    status = ?output.exit_code,
                    stderr = %output.stderr.trim(),
                    "command failed; continuing"
                );
            }
            self.commands.push(record);
        }
        Ok(())
    }
}

async fn copy_uploads<R, E>(
    session: &SshSession<R>,
    uploads: &[Upload],
) -> Result<(), BuildError<E>>
where
    R: CommandRunner + Clone + Send + Sync + 'static,
    E: std::error::Error + 'static,
{
    for upload in uploads {
        info!(local = %upload.local, remote = %upload.remote, "uploading");
        session
            .copy(&upload.local, &upload.remote)
            .await
            .map_err(BuildError::Upload)?;
    }
    Ok(())
}
