//! Account-creation state machine.
//!
//! A single forward pass with no branches and no retries:
//!
//! ```text
//! Start -> KeysGenerated -> IdentityPersisted -> SeedEnsured
//!       -> IdentityPublished -> BiometricOffered -> Complete
//! ```
//!
//! The step leaving `Start` or `KeysGenerated` is fatal on failure; every
//! later step is best-effort and advances regardless of its outcome.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisioningState {
    Start,
    KeysGenerated,
    IdentityPersisted,
    SeedEnsured,
    IdentityPublished,
    BiometricOffered,
    Complete,
}

impl ProvisioningState {
    /// The state reached once the step leaving `self` has run.
    /// `Complete` is absorbing.
    pub fn next(self) -> Self {
        match self {
            Self::Start => Self::KeysGenerated,
            Self::KeysGenerated => Self::IdentityPersisted,
            Self::IdentityPersisted => Self::SeedEnsured,
            Self::SeedEnsured => Self::IdentityPublished,
            Self::IdentityPublished => Self::BiometricOffered,
            Self::BiometricOffered | Self::Complete => Self::Complete,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Complete
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::KeysGenerated => "keys_generated",
            Self::IdentityPersisted => "identity_persisted",
            Self::SeedEnsured => "seed_ensured",
            Self::IdentityPublished => "identity_published",
            Self::BiometricOffered => "biometric_offered",
            Self::Complete => "complete",
        }
    }
}

impl std::fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_pass_visits_every_state_once() {
        let mut state = ProvisioningState::Start;
        let mut visited = vec![state];
        while !state.is_terminal() {
            state = state.next();
            visited.push(state);
        }

        assert_eq!(
            visited,
            vec![
                ProvisioningState::Start,
                ProvisioningState::KeysGenerated,
                ProvisioningState::IdentityPersisted,
                ProvisioningState::SeedEnsured,
                ProvisioningState::IdentityPublished,
                ProvisioningState::BiometricOffered,
                ProvisioningState::Complete,
            ]
        );
    }

    #[test]
    fn complete_is_absorbing() {
        assert_eq!(ProvisioningState::Complete.next(), ProvisioningState::Complete);
    }
}
