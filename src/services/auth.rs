use crate::domain::tier::Tier;
use crate::error::AuthFailure;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Buyer,
    Seller,
    Admin,
}

/// Identity attached to a connection or request after credential verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub tier: Tier,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: Uuid,
    email: String,
    role: Role,
    tier: Tier,
    exp: i64,
}

/// Verifies a bearer token and yields the embedded identity.
///
/// # Errors
/// Returns a typed `AuthFailure` distinguishing expiry, bad signatures and
/// everything else; the caller must not leak more detail than that.
pub fn verify_bearer(token: &str, secret: &str) -> Result<Identity, AuthFailure> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation).map_err(|e| {
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthFailure::Expired,
            jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthFailure::InvalidSignature,
            _ => AuthFailure::Invalid,
        }
    })?;

    Ok(Identity { id: data.claims.sub, email: data.claims.email, role: data.claims.role, tier: data.claims.tier })
}

/// Issues a signed bearer token for the identity.
///
/// # Errors
/// Returns `AuthFailure::Invalid` if signing fails.
pub fn issue_bearer(identity: &Identity, secret: &str, ttl_secs: i64) -> Result<String, AuthFailure> {
    let claims = Claims {
        sub: identity.id,
        email: identity.email.clone(),
        role: identity.role,
        tier: identity.tier,
        exp: time::OffsetDateTime::now_utc().unix_timestamp() + ttl_secs,
    };
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|_| AuthFailure::Invalid)
}

/// Picks the bearer credential out of the three places a socket client may
/// put it: an explicit auth payload, the `token` query parameter, or the
/// `Authorization` header.
///
/// # Errors
/// Returns `AuthFailure::MissingCredential` when none is present.
pub fn bearer_from_sources(
    auth_payload: Option<&str>,
    query_token: Option<&str>,
    authorization_header: Option<&str>,
) -> Result<String, AuthFailure> {
    if let Some(token) = auth_payload {
        return Ok(token.to_string());
    }
    if let Some(token) = query_token {
        return Ok(token.to_string());
    }
    if let Some(header) = authorization_header {
        let token = header.strip_prefix("Bearer ").unwrap_or(header);
        if !token.is_empty() {
            return Ok(token.to_string());
        }
    }
    Err(AuthFailure::MissingCredential)
}

/// Role gate for connections and events.
///
/// # Errors
/// Returns `AuthFailure::Invalid` when the identity's role is not allowed.
pub fn require_role(identity: &Identity, allowed: &[Role]) -> Result<(), AuthFailure> {
    if allowed.contains(&identity.role) { Ok(()) } else { Err(AuthFailure::Invalid) }
}
