use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
};
use tracing::warn;

use crate::{auth::jwt::JwtKeys, state::AppState, users::repo::User};

/// Token gate: verifies the bearer token, loads the record it points at and
/// hands the full record to the handler. A token that no longer matches the
/// one stored on the record is rejected, which is how logout and re-login
/// invalidate older sessions.
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(unauthorized)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(unauthorized)?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify(token).map_err(|e| {
            warn!(error = %e, "invalid or expired token");
            unauthorized()
        })?;

        let user = match User::find_by_id(&state.db, claims.id).await {
            Ok(Some(u)) => u,
            Ok(None) => {
                warn!(user_id = %claims.id, "token points at a missing user");
                return Err(unauthorized());
            }
            Err(e) => {
                warn!(error = %e, user_id = %claims.id, "user lookup failed");
                return Err(unauthorized());
            }
        };

        if user.token.as_deref() != Some(token) {
            warn!(user_id = %user.id, "presented token does not match the stored one");
            return Err(unauthorized());
        }

        Ok(AuthUser(user))
    }
}

fn unauthorized() -> (StatusCode, String) {
    (StatusCode::UNAUTHORIZED, "Not authorized".to_string())
}
