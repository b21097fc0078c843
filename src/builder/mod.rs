//! The build state machine.
//!
//! A [`Builder`] runs one bake: acquire ephemeral resources, launch an
//! instance, wait until it is reachable, configure it, snapshot it, then
//! release everything it created. Teardown runs on every exit path,
//! including errors and interruption, and never aborts halfway.
//!
//! ```text
//! Created -> Acquired -> Launched -> Reachable -> Configured -> Imaged -> Closed
//!     \__________\___________\___________\_____________\-> Failed --^
//! ```

use std::future::Future;

use tracing::{debug, info, warn};

use crate::provider::{ImageRef, Provider};
use crate::remote::{CommandRunner, SshClient, SshSession};
use crate::spec::BuildSpec;

mod acquire;
mod configure;
mod error;
mod image;
mod launch;
mod policy;
mod reach;
mod resources;
mod state;
mod teardown;

pub use error::BuildError;
pub use policy::{BuildPolicy, PolicyConfig};
pub use resources::{ResourceNames, WorkArea};
pub use state::{BuildState, Phase};
pub use teardown::{TeardownEntry, TeardownReport, TeardownStep};

use resources::ResourceLedger;

/// Exit status of one configuration command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandRecord {
    /// Command text as given in the spec.
    pub command: String,
    /// Remote exit code; `None` when the shell died without one.
    pub exit_code: Option<i32>,
}

impl CommandRecord {
    /// Whether the command exited with status zero.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Runs one build against a borrowed provider.
#[derive(Debug)]
pub struct Builder<'p, P, R>
where
    P: Provider,
    R: CommandRunner,
{
    provider: &'p P,
    ssh: SshClient<R>,
    policy: BuildPolicy,
    names: ResourceNames,
    state: BuildState,
    history: Vec<BuildState>,
    ledger: ResourceLedger,
    session: Option<SshSession<R>>,
    commands: Vec<CommandRecord>,
    teardown: TeardownReport,
    connect_attempts: u32,
    used: bool,
    torn_down: bool,
}

impl<'p, P, R> Builder<'p, P, R>
where
    P: Provider,
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    /// Creates a builder with freshly generated resource names.
    #[must_use]
    pub fn new(provider: &'p P, ssh: SshClient<R>, policy: BuildPolicy) -> Self {
        Self::with_names(provider, ssh, policy, ResourceNames::generate())
    }

    /// Creates a builder using explicit resource names.
    #[must_use]
    pub fn with_names(
        provider: &'p P,
        ssh: SshClient<R>,
        policy: BuildPolicy,
        names: ResourceNames,
    ) -> Self {
        Self {
            provider,
            ssh,
            policy,
            names,
            state: BuildState::Created,
            history: vec![BuildState::Created],
            ledger: ResourceLedger::default(),
            session: None,
            commands: Vec::new(),
            teardown: TeardownReport::default(),
            connect_attempts: 0,
            used: false,
            torn_down: false,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> BuildState {
        self.state
    }

    /// Every state entered, in order.
    #[must_use]
    pub fn history(&self) -> &[BuildState] {
        &self.history
    }

    /// Names used for this build's resources.
    #[must_use]
    pub const fn names(&self) -> &ResourceNames {
        &self.names
    }

    /// Exit status of each configuration command that ran.
    #[must_use]
    pub fn command_results(&self) -> &[CommandRecord] {
        &self.commands
    }

    /// Outcome of each teardown step.
    #[must_use]
    pub const fn teardown_report(&self) -> &TeardownReport {
        &self.teardown
    }

    /// Connection attempts made while waiting for the guest.
    #[must_use]
    pub const fn connect_attempts(&self) -> u32 {
        self.connect_attempts
    }

    /// Runs the build to completion.
    ///
    /// # Errors
    ///
    /// Returns the first fatal [`BuildError`]; teardown has run by then.
    pub async fn bake(&mut self, spec: &BuildSpec) -> Result<ImageRef, BuildError<P::Error>> {
        self.bake_until(spec, std::future::pending()).await
    }

    /// Runs the build, abandoning the current phase when `interrupt`
    /// resolves. Teardown still runs before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Interrupted`] when cancelled, otherwise the
    /// first fatal [`BuildError`].
    pub async fn bake_until<F>(
        &mut self,
        spec: &BuildSpec,
        interrupt: F,
    ) -> Result<ImageRef, BuildError<P::Error>>
    where
        F: Future<Output = ()>,
    {
        if self.used {
            return Err(BuildError::AlreadyUsed);
        }
        self.used = true;
        info!(
            provider = self.provider.name(),
            image = %spec.name,
            suffix = %self.names.instance,
            "starting build"
        );

        let outcome = tokio::select! {
            result = self.run_phases(spec) => result,
            () = interrupt => {
                warn!("interrupt received; tearing down");
                Err(BuildError::Interrupted)
            }
        };

        if let Err(err) = &outcome {
            warn!(state = %self.state, error = %err, "build failed");
            self.transition(BuildState::Failed);
        }
        self.teardown().await;
        self.transition(BuildState::Closed);

        if let Ok(image) = &outcome {
            info!(image = %image.name, id = %image.id, "build finished");
        }
        outcome
    }

    async fn run_phases(&mut self, spec: &BuildSpec) -> Result<ImageRef, BuildError<P::Error>> {
        self.provider.check_spec(spec).map_err(BuildError::Config)?;

        self.acquire(spec).await?;
        self.transition(BuildState::Acquired);

        self.launch(spec).await?;
        self.transition(BuildState::Launched);

        self.wait_for_reachable(spec).await?;
        self.transition(BuildState::Reachable);

        self.configure(spec).await?;
        self.transition(BuildState::Configured);

        let image = self.create_image(spec).await?;
        self.transition(BuildState::Imaged);
        Ok(image)
    }

    fn transition(&mut self, next: BuildState) {
        if !self.state.can_advance_to(next) {
            debug!(from = %self.state, to = %next, "ignoring transition");
            return;
        }
        info!(from = %self.state, to = %next, "build state changed");
        self.state = next;
        self.history.push(next);
    }

    fn missing(what: &str) -> BuildError<P::Error> {
        BuildError::Local(format!("{what} missing; earlier phase did not complete"))
    }
}

#[cfg(test)]
mod tests;
