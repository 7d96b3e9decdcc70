//! Session middleware for member and staff routes

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use tracing::{debug, error};

use crate::{error::ApiError, models::UserId, session::Claims, state::AppState};

/// Response header carrying the refreshed member token
pub const SESSION_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-session-token");

/// The member behind an authenticated self-service request
#[derive(Debug, Clone, Copy)]
pub struct MemberSession {
    pub user_id: UserId,
}

fn verify_bearer(
    state: &AppState,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<Claims, ApiError> {
    let TypedHeader(Authorization(bearer)) = auth.ok_or(ApiError::Unauthorized)?;
    state.sessions.verify(bearer.token()).map_err(|e| {
        debug!("Rejected session token: {}", e);
        ApiError::Unauthorized
    })
}

/// Require a live member session and slide its expiry
pub async fn member_auth(
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = verify_bearer(&state, auth)?;
    let user_id = claims.member_id().ok_or(ApiError::Forbidden)?;

    let refreshed = state.sessions.refresh(&claims).map_err(|e| {
        error!("Failed to refresh session for user {}: {}", user_id, e);
        ApiError::InternalServerError
    })?;

    req.extensions_mut().insert(MemberSession { user_id });
    let mut response = next.run(req).await;

    if let Some(token) = refreshed {
        match HeaderValue::from_str(&token) {
            Ok(value) => {
                response.headers_mut().insert(SESSION_TOKEN_HEADER, value);
            }
            Err(e) => error!("Refreshed token is not a valid header value: {}", e),
        }
    }

    Ok(response)
}

/// Require a staff session of any role (admins may run the kiosk)
pub async fn staff_auth(
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = verify_bearer(&state, auth)?;
    if !claims.is_staff() {
        return Err(ApiError::Forbidden);
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Require an admin session
pub async fn admin_auth(
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = verify_bearer(&state, auth)?;
    if !claims.is_admin() {
        return Err(ApiError::Forbidden);
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
