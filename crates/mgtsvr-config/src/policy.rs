use std::fmt;

use thiserror::Error;

/// How connecting clients are admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuthPolicy {
    /// Anyone may issue commands without logging in.
    Open,
    /// No login; the banner is shown on connect.
    BannerOnly,
    /// Username then plaintext password.
    Plaintext,
    /// Username then a session challenge answered with a response hash.
    ChallengeResponse,
}

impl AuthPolicy {
    /// Numeric level used in configuration files.
    #[must_use]
    pub const fn level(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::BannerOnly => 1,
            Self::Plaintext => 2,
            Self::ChallengeResponse => 3,
        }
    }

    /// Whether clients must log in before issuing commands.
    #[must_use]
    pub const fn requires_login(self) -> bool {
        matches!(self, Self::Plaintext | Self::ChallengeResponse)
    }
}

impl TryFrom<u8> for AuthPolicy {
    type Error = AuthPolicyError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::Open),
            1 => Ok(Self::BannerOnly),
            2 => Ok(Self::Plaintext),
            3 => Ok(Self::ChallengeResponse),
            other => Err(AuthPolicyError { level: other }),
        }
    }
}

impl fmt::Display for AuthPolicy {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::BannerOnly => "banner",
            Self::Plaintext => "plaintext",
            Self::ChallengeResponse => "challenge",
        };
        write!(formatter, "{name} ({})", self.level())
    }
}

/// Raised for policy levels outside `0..=3`.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("auth_policy must be between 0 and 3, got {level}")]
pub struct AuthPolicyError {
    /// The rejected level.
    pub level: u8,
}
