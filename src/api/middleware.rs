use crate::api::AppState;
use crate::error::{AppError, AuthFailure};
use crate::services::auth::{Identity, verify_bearer};
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

/// Authenticated identity extractor for the HTTP surface.
#[derive(Debug)]
pub struct AuthUser(pub Identity);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth_header =
            parts.headers.get(header::AUTHORIZATION).ok_or(AppError::Authentication(AuthFailure::MissingCredential))?;

        let auth_str = auth_header.to_str().map_err(|_| AppError::Authentication(AuthFailure::Invalid))?;
        let token = auth_str
            .strip_prefix("Bearer ")
            .ok_or(AppError::Authentication(AuthFailure::MissingCredential))?;

        let identity = verify_bearer(token, &state.config.auth.jwt_secret)?;

        Ok(Self(identity))
    }
}
