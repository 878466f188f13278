use std::fmt;
use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Opaque identifier of an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(Arc<str>);

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(Arc::from(id))
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Claims carried by bearer tokens. Tokens are issued elsewhere; this
/// server only verifies them.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    pub iat: i64,
    pub exp: i64,
}

/// Verifies HS256-signed bearer tokens.
#[derive(Clone)]
pub struct TokenVerifier {
    key: Arc<DecodingKey>,
    validation: Arc<Validation>,
}

impl TokenVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: Arc::new(DecodingKey::from_secret(secret)),
            validation: Arc::new(Validation::new(Algorithm::HS256)),
        }
    }

    /// Check signature and expiry, returning the user the token was issued to.
    pub fn verify(&self, token: &str) -> Result<UserId, jsonwebtoken::errors::Error> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)?;
        Ok(UserId::from(data.claims.id))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::{Duration, Utc};
    use jsonwebtoken::{EncodingKey, Header};

    use super::*;

    pub const SECRET: &[u8] = b"test-secret";

    /// Mint a token for `id` signed with `secret`, valid for `ttl`.
    pub fn token_for(id: &str, secret: &[u8], ttl: Duration) -> String {
        let now = Utc::now();
        let claims = Claims {
            id: id.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret),
        )
        .unwrap()
    }

    #[test]
    fn verifies_valid_token() {
        let verifier = TokenVerifier::new(SECRET);
        let token = token_for("64b7f0c2e1", SECRET, Duration::hours(1));
        assert_eq!(verifier.verify(&token).unwrap(), UserId::from("64b7f0c2e1"));
    }

    #[test]
    fn rejects_wrong_secret() {
        let verifier = TokenVerifier::new(SECRET);
        let token = token_for("u1", b"another-secret", Duration::hours(1));
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn rejects_expired_token() {
        let verifier = TokenVerifier::new(SECRET);
        let token = token_for("u1", SECRET, Duration::hours(-2));
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn rejects_garbage() {
        let verifier = TokenVerifier::new(SECRET);
        assert!(verifier.verify("not.a.jwt").is_err());
    }
}
