//! Invitation tokens for account activation.
//!
//! The plaintext token only ever leaves the process inside the activation
//! link. Storage sees the SHA-256 hex digest.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use villabook_core::UserId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvitationError {
    #[error("invitation ttl must be positive")]
    NonPositiveTtl,

    #[error("invitation token is empty")]
    EmptyToken,
}

/// Plaintext activation token (random UUID v4, hyphenated).
#[derive(Clone, PartialEq, Eq)]
pub struct InvitationToken(String);

impl InvitationToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap a token presented by a client.
    pub fn parse(plain: impl Into<String>) -> Result<Self, InvitationError> {
        let plain = plain.into();
        if plain.trim().is_empty() {
            return Err(InvitationError::EmptyToken);
        }
        Ok(Self(plain))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn hash(&self) -> TokenHash {
        let digest = Sha256::digest(self.0.as_bytes());
        TokenHash(hex::encode(digest))
    }
}

// Keep plaintext out of logs.
impl core::fmt::Debug for InvitationToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("InvitationToken(<redacted>)")
    }
}

/// Lower-case hex SHA-256 of a plaintext token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenHash(String);

impl TokenHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Pending activation for an inactive principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    pub user_id: UserId,
    pub token_hash: TokenHash,
    pub expires_at: DateTime<Utc>,
}

impl Invitation {
    /// Issue a fresh token for `user_id`. Returns the plaintext alongside the
    /// row to persist.
    pub fn issue(
        user_id: UserId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(InvitationToken, Invitation), InvitationError> {
        if ttl <= Duration::zero() {
            return Err(InvitationError::NonPositiveTtl);
        }
        let token = InvitationToken::generate();
        let invitation = Invitation {
            user_id,
            token_hash: token.hash(),
            expires_at: now + ttl,
        };
        Ok((token, invitation))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_sha256_hex_of_plaintext() {
        let token = InvitationToken::parse("abc").unwrap();
        assert_eq!(
            token.hash().as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn issued_row_stores_only_the_digest() {
        let now = Utc::now();
        let (token, invitation) = Invitation::issue(UserId::new(), Duration::hours(72), now).unwrap();

        assert_eq!(invitation.token_hash, token.hash());
        assert_ne!(invitation.token_hash.as_str(), token.as_str());
        assert_eq!(invitation.expires_at, now + Duration::hours(72));
        assert!(!invitation.is_expired(now));
        assert!(invitation.is_expired(now + Duration::hours(72)));
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(InvitationToken::generate(), InvitationToken::generate());
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let err = Invitation::issue(UserId::new(), Duration::zero(), Utc::now()).unwrap_err();
        assert_eq!(err, InvitationError::NonPositiveTtl);
    }

    #[test]
    fn debug_does_not_leak_plaintext() {
        let token = InvitationToken::parse("secret-token").unwrap();
        assert!(!format!("{token:?}").contains("secret-token"));
    }
}
