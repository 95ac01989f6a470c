use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;

/// Reason a credential was rejected.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,

    #[error("token signature is invalid")]
    BadSignature,

    #[error("token is expired")]
    Expired,

    #[error("token carries no user identifier claim")]
    MissingUserId,
}

/// Raw claim set as presented by clients. The user identifier may arrive
/// under any of `userId`, `sub` or `id`; the first non-empty one wins.
#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(rename = "userId")]
    user_id: Option<String>,
    sub: Option<String>,
    id: Option<String>,
}

/// Verified principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub user_id: String,
}

/// Validates HS256-signed bearer tokens against the shared secret.
///
/// Stateless; a single instance is shared across all requests.
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // `exp` is optional but still enforced when present.
        validation.required_spec_claims.clear();
        validation.validate_exp = true;

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify a credential and extract the principal.
    pub fn verify(&self, credential: &str) -> Result<Claims, TokenError> {
        let data = jsonwebtoken::decode::<RawClaims>(credential, &self.key, &self.validation)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidSignature => TokenError::BadSignature,
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            })?;

        let raw = data.claims;
        let user_id = [raw.user_id, raw.sub, raw.id]
            .into_iter()
            .flatten()
            .find(|candidate| !candidate.is_empty())
            .ok_or(TokenError::MissingUserId)?;

        Ok(Claims { user_id })
    }
}
