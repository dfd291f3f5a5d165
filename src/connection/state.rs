//! Session lifecycle.

/// Lifecycle state of a [`Session`](super::Session).
///
/// `Negotiating → Active → Closing → Closed`. A failed upgrade goes
/// straight from `Negotiating` to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Upgrade request is being read and validated.
    #[default]
    Negotiating,
    /// Upgrade done, frames are exchanged.
    Active,
    /// Shutting the stream down.
    Closing,
    /// Stream closed; nothing more is read or written.
    Closed,
}

impl SessionState {
    /// Whether the stream may still be used.
    #[must_use]
    #[inline]
    pub const fn is_open(&self) -> bool {
        !matches!(self, SessionState::Closing | SessionState::Closed)
    }

    /// Whether frames can be read and written.
    #[must_use]
    #[inline]
    pub const fn is_active(&self) -> bool {
        matches!(self, SessionState::Active)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Negotiating => write!(f, "Negotiating"),
            SessionState::Active => write!(f, "Active"),
            SessionState::Closing => write!(f, "Closing"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}
