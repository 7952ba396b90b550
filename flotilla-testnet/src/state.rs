use std::fmt;

/// Lifecycle of a [`crate::Testnet`].
///
/// States only move forward. `Destroyed` is reachable from every state and
/// is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TestnetState {
    Declared,
    Constructed,
    GenesisExported,
    Initialized,
    Starting,
    Converged,
    Running,
    Destroyed,
}

impl TestnetState {
    pub fn can_transition_to(self, next: TestnetState) -> bool {
        use TestnetState::*;
        match (self, next) {
            (Destroyed, _) => false,
            (_, Destroyed) => true,
            (Declared, Constructed) | (Constructed, Constructed) => true,
            (Declared, GenesisExported) | (Constructed, GenesisExported) => true,
            (GenesisExported, Initialized) => true,
            (Initialized, Starting) => true,
            (Starting, Converged) => true,
            (Converged, Running) => true,
            _ => false,
        }
    }

    pub fn is_destroyed(self) -> bool {
        self == TestnetState::Destroyed
    }
}

impl fmt::Display for TestnetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestnetState::Declared => "declared",
            TestnetState::Constructed => "constructed",
            TestnetState::GenesisExported => "genesis-exported",
            TestnetState::Initialized => "initialized",
            TestnetState::Starting => "starting",
            TestnetState::Converged => "converged",
            TestnetState::Running => "running",
            TestnetState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}
