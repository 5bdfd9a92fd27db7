use anyhow::{anyhow, Context, Result};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Shared-secret settings for dashboard bearer tokens. Tokens are minted by
/// the identity provider; this service only verifies them.
#[derive(Clone)]
pub struct JwtConfig {
    pub issuer: String,
    pub audience: String,
    pub secret: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
    pub aud: String,
    pub iss: String,
}

pub fn verify_token(token: &str, config: &JwtConfig) -> Result<Uuid> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[config.audience.as_str()]);
    validation.set_issuer(&[config.issuer.as_str()]);

    let data = decode::<AccessTokenClaims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &validation,
    )?;
    Uuid::parse_str(&data.claims.sub).context("token subject is not a user id")
}

/// Mints a token the way the identity provider would. Used by `uc token
/// issue` and tests.
pub fn issue_token(user_id: Uuid, ttl_seconds: u64, config: &JwtConfig) -> Result<String> {
    let now = unix_seconds()?;
    let exp = now
        .checked_add(ttl_seconds)
        .ok_or_else(|| anyhow!("token expiry overflow"))?;

    let claims = AccessTokenClaims {
        sub: user_id.to_string(),
        exp: exp as usize,
        iat: now as usize,
        aud: config.audience.clone(),
        iss: config.issuer.clone(),
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )?;
    Ok(token)
}

pub fn unix_seconds() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .map_err(|_| anyhow!("invalid system clock"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(secret: &str) -> JwtConfig {
        JwtConfig {
            issuer: "unusual".to_string(),
            audience: "unusual-dashboard".to_string(),
            secret: secret.to_string(),
        }
    }

    #[test]
    fn issued_token_verifies_to_same_user() {
        let user = Uuid::new_v4();
        let token = issue_token(user, 600, &config("secret")).unwrap();
        assert_eq!(verify_token(&token, &config("secret")).unwrap(), user);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token(Uuid::new_v4(), 600, &config("secret")).unwrap();
        assert!(verify_token(&token, &config("other")).is_err());
    }

    #[test]
    fn wrong_audience_is_rejected() {
        let token = issue_token(Uuid::new_v4(), 600, &config("secret")).unwrap();
        let mut other = config("secret");
        other.audience = "someone-else".to_string();
        assert!(verify_token(&token, &other).is_err());
    }

    #[test]
    fn non_uuid_subject_is_rejected() {
        let now = unix_seconds().unwrap() as usize;
        let claims = AccessTokenClaims {
            sub: "not-a-uuid".to_string(),
            exp: now + 600,
            iat: now,
            aud: "unusual-dashboard".to_string(),
            iss: "unusual".to_string(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(verify_token(&token, &config("secret")).is_err());
    }
}
