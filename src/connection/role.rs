//! Which end of a connection this side plays.

/// Endpoint role.
///
/// Decides the masking direction (RFC 6455 Section 5.1) and which half of
/// the negotiated permessage-deflate parameters governs what this side
/// sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Masks every frame it sends; compresses under the `client_*` parameters.
    Client,
    /// Never masks; compresses under the `server_*` parameters.
    Server,
}

impl Role {
    #[inline]
    #[must_use]
    pub const fn must_mask(&self) -> bool {
        matches!(self, Role::Client)
    }

    /// Whether frames arriving at this role must carry a mask key.
    #[inline]
    #[must_use]
    pub const fn expects_masked(&self) -> bool {
        self.peer().must_mask()
    }

    /// The role at the other end of the connection.
    #[inline]
    #[must_use]
    pub const fn peer(&self) -> Role {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Role::Client => "client",
            Role::Server => "server",
        })
    }
}
