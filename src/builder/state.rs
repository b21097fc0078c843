//! Build lifecycle states.

use std::fmt;

/// Where a build currently stands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildState {
    /// Nothing allocated yet.
    Created,
    /// Work area, key, credential and access rule exist.
    Acquired,
    /// The instance reports running.
    Launched,
    /// A session to the guest is open.
    Reachable,
    /// Uploads copied and commands run.
    Configured,
    /// The image is available.
    Imaged,
    /// A phase failed; teardown follows.
    Failed,
    /// Teardown finished.
    Closed,
}

impl BuildState {
    /// Whether `next` is a legal successor.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Acquired)
                | (Self::Acquired, Self::Launched)
                | (Self::Launched, Self::Reachable)
                | (Self::Reachable, Self::Configured)
                | (Self::Configured, Self::Imaged)
                | (Self::Imaged | Self::Failed, Self::Closed)
                | (
                    Self::Created
                        | Self::Acquired
                        | Self::Launched
                        | Self::Reachable
                        | Self::Configured,
                    Self::Failed | Self::Closed
                )
        )
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Created => "created",
            Self::Acquired => "acquired",
            Self::Launched => "launched",
            Self::Reachable => "reachable",
            Self::Configured => "configured",
            Self::Imaged => "imaged",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Build phases, used to label provider errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Credential and access rule creation.
    Acquire,
    /// Instance launch and boot.
    Launch,
    /// Waiting for SSH.
    Reach,
    /// Uploads and commands.
    Configure,
    /// Snapshot and image polling.
    Image,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Acquire => "acquire",
            Self::Launch => "launch",
            Self::Reach => "wait-for-reachable",
            Self::Configure => "configure",
            Self::Image => "image",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(BuildState::Created, BuildState::Acquired)]
    #[case(BuildState::Configured, BuildState::Imaged)]
    #[case(BuildState::Imaged, BuildState::Closed)]
    #[case(BuildState::Launched, BuildState::Failed)]
    #[case(BuildState::Failed, BuildState::Closed)]
    #[case(BuildState::Created, BuildState::Closed)]
    fn legal_transitions(#[case] from: BuildState, #[case] to: BuildState) {
        assert!(from.can_advance_to(to), "{from} -> {to} should be legal");
    }

    #[rstest]
    #[case(BuildState::Created, BuildState::Launched)]
    #[case(BuildState::Imaged, BuildState::Failed)]
    #[case(BuildState::Closed, BuildState::Created)]
    #[case(BuildState::Failed, BuildState::Acquired)]
    #[case(BuildState::Closed, BuildState::Failed)]
    fn illegal_transitions(#[case] from: BuildState, #[case] to: BuildState) {
        assert!(!from.can_advance_to(to), "{from} -> {to} should be illegal");
    }
}
