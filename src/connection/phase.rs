use std::fmt;

/// Lifecycle phase of a [`Connection`](super::Connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Not connected. Either never activated or waiting out a backoff delay.
    Idle,
    /// Running the hook, resolving the route and opening hops.
    Connecting,
    /// Every hop is up and its tunnels are accepting.
    Active,
    /// Hops are being closed, innermost first.
    Destroying,
    /// Terminal. Never reconnects.
    Destroyed,
}

impl Phase {
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Idle, Destroying)
                | (Connecting, Active)
                | (Connecting, Destroying)
                | (Active, Destroying)
                | (Destroying, Idle)
                | (Destroying, Destroyed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == Phase::Destroyed
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Connecting => "connecting",
            Phase::Active => "active",
            Phase::Destroying => "destroying",
            Phase::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}
