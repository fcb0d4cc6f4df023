//! Signed session credentials binding a connection to one player of one game.
//!
//! The same [`CredentialService::authenticate`] call backs the REST bearer
//! middleware and every realtime event, so a credential is either valid
//! everywhere or rejected everywhere.

use std::{
    env,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::error::ServiceError;

const JWT_SECRET_ENV: &str = "JWT_SECRET";
const JWT_EXPIRES_ENV: &str = "JWT_EXPIRES_MIN";
const DEV_SECRET: &str = "dev";
const DEFAULT_EXPIRES_MIN: u64 = 120;

/// Authenticated identity extracted from a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Game the holder belongs to.
    pub game_id: Uuid,
    /// Player holding the credential.
    pub player_id: Uuid,
    /// Freeform role tag of the player.
    pub role: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    gid: Uuid,
    pid: Uuid,
    role: String,
    exp: u64,
}

/// Failure to issue or verify a credential.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// No credential was presented.
    #[error("missing credential")]
    Missing,
    /// The token is malformed, expired or signed with another key.
    #[error("invalid credential")]
    Invalid(#[source] jsonwebtoken::errors::Error),
    /// The token could not be signed.
    #[error("failed to sign credential")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

impl From<CredentialError> for ServiceError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Signing(_) => ServiceError::Internal(err.to_string()),
            CredentialError::Missing | CredentialError::Invalid(_) => {
                ServiceError::Unauthorized(err.to_string())
            }
        }
    }
}

/// HS256 issuer and verifier for session credentials.
pub struct CredentialService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl CredentialService {
    /// Build a service signing with `secret`; issued tokens live for `ttl`.
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
            ttl,
        }
    }

    /// Read `JWT_SECRET` and `JWT_EXPIRES_MIN` from the environment.
    pub fn from_env() -> Self {
        let secret = env::var(JWT_SECRET_ENV).ok().filter(|value| !value.is_empty());
        let secret = secret.unwrap_or_else(|| {
            warn!("{JWT_SECRET_ENV} not set; signing credentials with the development secret");
            DEV_SECRET.to_owned()
        });
        let minutes = env::var(JWT_EXPIRES_ENV)
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_EXPIRES_MIN);

        Self::new(secret.as_bytes(), Duration::from_secs(minutes.saturating_mul(60)))
    }

    /// Sign a credential for `player_id` in `game_id`.
    pub fn issue(
        &self,
        game_id: Uuid,
        player_id: Uuid,
        role: &str,
    ) -> Result<String, CredentialError> {
        let issued_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        let claims = Claims {
            gid: game_id,
            pid: player_id,
            role: role.to_owned(),
            exp: issued_at.saturating_add(self.ttl.as_secs()),
        };

        encode(&Header::default(), &claims, &self.encoding).map_err(CredentialError::Signing)
    }

    /// Verify `token` and return the identity it carries.
    pub fn authenticate(&self, token: Option<&str>) -> Result<Credential, CredentialError> {
        let token = token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(CredentialError::Missing)?;

        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(CredentialError::Invalid)?;

        Ok(Credential {
            game_id: data.claims.gid,
            player_id: data.claims.pid,
            role: data.claims.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> CredentialService {
        CredentialService::new(b"test-secret", Duration::from_secs(600))
    }

    #[test]
    fn issued_credentials_authenticate() {
        let service = service();
        let (game_id, player_id) = (Uuid::new_v4(), Uuid::new_v4());
        let token = service.issue(game_id, player_id, "curator").unwrap();

        let credential = service.authenticate(Some(&token)).unwrap();
        assert_eq!(
            credential,
            Credential {
                game_id,
                player_id,
                role: "curator".into(),
            }
        );
    }

    #[test]
    fn missing_and_blank_tokens_are_rejected() {
        let service = service();
        assert!(matches!(
            service.authenticate(None),
            Err(CredentialError::Missing)
        ));
        assert!(matches!(
            service.authenticate(Some("  ")),
            Err(CredentialError::Missing)
        ));
    }

    #[test]
    fn tampered_or_foreign_tokens_are_rejected() {
        let service = service();
        let token = service
            .issue(Uuid::new_v4(), Uuid::new_v4(), "analyst")
            .unwrap();

        let mut tampered = token.clone();
        tampered.push('x');
        assert!(matches!(
            service.authenticate(Some(&tampered)),
            Err(CredentialError::Invalid(_))
        ));

        let other = CredentialService::new(b"other-secret", Duration::from_secs(600));
        assert!(other.authenticate(Some(&token)).is_err());
        assert!(service.authenticate(Some("not-a-jwt")).is_err());
    }

    #[test]
    fn unbounded_lifetimes_saturate_instead_of_overflowing() {
        let service = CredentialService::new(b"test-secret", Duration::MAX);
        let token = service
            .issue(Uuid::new_v4(), Uuid::new_v4(), "curator")
            .unwrap();
        assert!(service.authenticate(Some(&token)).is_ok());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let service = service();
        let expired = Claims {
            gid: Uuid::new_v4(),
            pid: Uuid::new_v4(),
            role: "analyst".into(),
            exp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs()
                - 3600,
        };
        let token = encode(&Header::default(), &expired, &service.encoding).unwrap();

        let err = service.authenticate(Some(&token)).unwrap_err();
        assert!(matches!(err, CredentialError::Invalid(_)));
        assert!(matches!(
            ServiceError::from(err),
            ServiceError::Unauthorized(_)
        ));
    }
}
