use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tower_cookies::Cookies;

use crate::{
    error::AppError,
    models::session::Session,
    services::gate,
    state::AppState,
};

/// The cookie carrying the session id.
pub const SESSION_COOKIE: &str = "session";

/// Resolves the inbound request's session from its signed cookie.
///
/// A missing cookie, a bad signature, or an expired/unknown session all
/// come out as `None` — an unauthenticated request, not an error.
pub fn resolve_session(state: &AppState, cookies: &Cookies) -> Option<Session> {
    let jar = cookies.signed(&state.cookie_key);
    let session_id = jar.get(SESSION_COOKIE)?.value().to_string();
    state.sessions.get(&session_id)
}

/// A middleware that requires a valid session on API routes.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `cookies` - The request cookies.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response`, or 401 when no session resolves.
pub async fn require_auth(
    State(state): State<AppState>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    match resolve_session(&state, &cookies) {
        Some(session) => {
            tracing::debug!("✅ Authenticated request for subject: {}", session.subject);
            request.extensions_mut().insert(session);
            Ok(next.run(request).await)
        }
        None => Err(AppError::Authentication("Not authenticated".to_string())),
    }
}

/// A middleware that requires a valid session on browser page routes.
///
/// Pages redirect to `/login` instead of answering 401.
pub async fn require_page_auth(
    State(state): State<AppState>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    match resolve_session(&state, &cookies) {
        Some(session) => {
            request.extensions_mut().insert(session);
            next.run(request).await
        }
        None => Redirect::to("/login").into_response(),
    }
}

/// A middleware that evaluates the device-health gate per request.
///
/// Runs after authentication on protected pages; a block renders 403
/// with the unhealthy device list attached.
pub async fn enforce_device_gate(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let decision = gate::evaluate(state.device_client()).await;
    if decision.allow {
        next.run(request).await
    } else {
        AppError::GateBlocked(decision).into_response()
    }
}
