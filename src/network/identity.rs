use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Expected user@host, got \"{0}\"")]
    MissingHost(String),

    #[error("User name must not be empty")]
    EmptyUser,

    #[error("User name \"{0}\" contains a reserved character")]
    ReservedCharacter(String),
}

/// A chat participant, keyed by user name and host name
///
/// Two processes run by the same user on the same host share an identity.
/// That is enough for presence and session negotiation on a LAN segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerIdentity {
    pub user: String,
    pub host: String,
}

impl PeerIdentity {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
        }
    }

    /// Check that the user name can be carried inside a chat invitation
    pub fn validate(&self) -> Result<(), IdentityError> {
        if self.user.is_empty() {
            return Err(IdentityError::EmptyUser);
        }
        if self.user.contains(super::INVITE_SEPARATOR) || self.user.contains('@') {
            return Err(IdentityError::ReservedCharacter(self.user.clone()));
        }
        Ok(())
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.host)
    }
}

impl FromStr for PeerIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Host names never contain '@', so split at the last one
        let (user, host) = s
            .rsplit_once('@')
            .filter(|(_, host)| !host.is_empty())
            .ok_or_else(|| IdentityError::MissingHost(s.to_string()))?;

        let identity = PeerIdentity::new(user, host);
        identity.validate()?;
        Ok(identity)
    }
}
