use axum::{
    Extension, Json,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use tower_cookies::cookie::SameSite;
use tower_cookies::cookie::time::Duration;
use tower_cookies::{Cookie, Cookies};

use crate::{
    crypto::flow::{self, FlowState, LogoutFlowState},
    error::{AppError, Result},
    middleware_layer::auth::{SESSION_COOKIE, resolve_session},
    models::session::Session,
    repositories::session::NewSession,
    state::AppState,
};

/// The cookie carrying the login flow state.
const FLOW_COOKIE: &str = "oidc_flow";
/// The cookie carrying the logout flow state.
const LOGOUT_FLOW_COOKIE: &str = "logout_flow";
/// Flow cookies live for five minutes.
const FLOW_COOKIE_MAX_AGE: Duration = Duration::minutes(5);

/// The landing page after a successful login.
const PROTECTED_LANDING: &str = "/protected.html";

/// The query parameters the provider sends to the callback.
#[derive(Deserialize, Debug)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// The query parameters the provider sends to the logout callback.
#[derive(Deserialize, Debug)]
pub struct LogoutCallbackQuery {
    pub state: Option<String>,
}

/// The response payload for `/health`.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// The response payload for `/auth-check`.
#[derive(Serialize)]
pub struct AuthCheckResponse {
    pub sub: String,
}

/// The response payload for `/me`.
#[derive(Serialize)]
pub struct ProfileResponse {
    pub sub: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// Builds a hardened cookie with the given name, value, and max age.
///
/// All cookies are httpOnly and SameSite=Lax; `Secure` follows the
/// deployment base URL scheme.
fn build_cookie(name: &str, value: String, max_age: Duration, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::new(name.to_owned(), value);
    cookie.set_http_only(true);
    if secure {
        cookie.set_secure(true);
    }
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(max_age);
    cookie.set_path("/");
    cookie
}

/// Builds the removal counterpart for a cookie.
fn removal_cookie(name: &str) -> Cookie<'static> {
    let mut cookie = Cookie::new(name.to_owned(), "");
    cookie.set_path("/");
    cookie
}

/// Liveness probe.
#[axum::debug_handler]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Starts a login: mints the flow state and redirects to the provider.
#[axum::debug_handler]
pub async fn login(State(state): State<AppState>, cookies: Cookies) -> Result<Response> {
    let flow = FlowState::mint();
    let authorize_url = state.oidc.build_authorize_url(&flow.state, &flow.nonce)?;

    let jar = cookies.signed(&state.cookie_key);
    jar.add(build_cookie(
        FLOW_COOKIE,
        flow::encode(&flow)?,
        FLOW_COOKIE_MAX_AGE,
        state.config.is_https(),
    ));

    tracing::info!("🔐 Login started, redirecting to provider");
    Ok(Redirect::to(&authorize_url).into_response())
}

/// Completes a login after the provider redirects back.
///
/// The flow cookie is single-use: it is cleared right after being read,
/// before any validation outcome, so a second callback with the same
/// state can never succeed.
#[axum::debug_handler]
pub async fn callback(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<CallbackQuery>,
) -> Result<Response> {
    let jar = cookies.signed(&state.cookie_key);
    let flow_value = jar.get(FLOW_COOKIE).map(|c| c.value().to_string());
    cookies.remove(removal_cookie(FLOW_COOKIE));

    if let Some(error) = query.error {
        let description = query.error_description.unwrap_or_default();
        return Err(AppError::Validation(format!(
            "Provider returned an error: {} - {}",
            error, description
        )));
    }

    let code = query
        .code
        .ok_or_else(|| AppError::Validation("Missing authorization code".to_string()))?;
    let received_state = query
        .state
        .ok_or_else(|| AppError::Validation("Missing state".to_string()))?;
    let flow_value =
        flow_value.ok_or_else(|| AppError::Validation("Login flow not found".to_string()))?;
    let flow: FlowState = flow::decode(&flow_value)?;

    if !flow::state_matches(&flow.state, &received_state) {
        tracing::warn!("❌ Callback state mismatch, rejecting");
        return Err(AppError::Validation("State mismatch".to_string()));
    }

    let token_set = state.oidc.exchange_code(&code).await?;
    let claims = state.oidc.verify_id_token(&token_set.id_token).await?;

    let session_id = state.sessions.create(NewSession {
        subject: claims.sub.clone(),
        email: claims.email.clone(),
        display_name: claims.display_name(),
        id_token: token_set.id_token,
        access_token: token_set.access_token,
    });

    jar.add(build_cookie(
        SESSION_COOKIE,
        session_id,
        Duration::milliseconds(state.config.session_ttl_ms),
        state.config.is_https(),
    ));

    tracing::info!("✅ Session created for subject: {}", claims.sub);
    Ok(Redirect::to(PROTECTED_LANDING).into_response())
}

/// Reports whether the request carries a live session.
#[axum::debug_handler]
pub async fn auth_check(State(state): State<AppState>, cookies: Cookies) -> Result<Response> {
    match resolve_session(&state, &cookies) {
        Some(session) => Ok(Json(AuthCheckResponse {
            sub: session.subject,
        })
        .into_response()),
        None => Err(AppError::Authentication("Invalid session".to_string())),
    }
}

/// Returns the authenticated subject's profile.
#[axum::debug_handler]
pub async fn me(Extension(session): Extension<Session>) -> Json<ProfileResponse> {
    Json(ProfileResponse {
        sub: session.subject,
        email: session.email,
        name: session.display_name,
    })
}

/// Destroys the session and redirects to the provider's logout.
#[axum::debug_handler]
pub async fn logout(State(state): State<AppState>, cookies: Cookies) -> Result<Response> {
    let jar = cookies.signed(&state.cookie_key);
    let session_id = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());

    let Some(session_id) = session_id else {
        return Ok(Redirect::to("/").into_response());
    };
    let Some(session) = state.sessions.get(&session_id) else {
        cookies.remove(removal_cookie(SESSION_COOKIE));
        return Ok(Redirect::to("/").into_response());
    };

    state.sessions.destroy(&session_id);
    cookies.remove(removal_cookie(SESSION_COOKIE));

    let logout_flow = LogoutFlowState::mint();
    let logout_url = state
        .oidc
        .build_logout_url(&session.id_token, &logout_flow.state)?;

    jar.add(build_cookie(
        LOGOUT_FLOW_COOKIE,
        flow::encode(&logout_flow)?,
        FLOW_COOKIE_MAX_AGE,
        state.config.is_https(),
    ));

    tracing::info!("👋 Logout for subject: {}", session.subject);
    Ok(Redirect::to(&logout_url).into_response())
}

/// Finishes the logout round trip from the provider.
///
/// Always lands back home: a missing or mismatched logout state is
/// logged, never surfaced to the browser.
#[axum::debug_handler]
pub async fn logout_callback(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<LogoutCallbackQuery>,
) -> Response {
    let jar = cookies.signed(&state.cookie_key);
    let flow_value = jar.get(LOGOUT_FLOW_COOKIE).map(|c| c.value().to_string());
    cookies.remove(removal_cookie(LOGOUT_FLOW_COOKIE));

    match (query.state, flow_value) {
        (Some(received), Some(value)) => match flow::decode::<LogoutFlowState>(&value) {
            Ok(logout_flow) if flow::state_matches(&logout_flow.state, &received) => {
                tracing::info!("✅ Logout round trip completed");
            }
            _ => {
                tracing::warn!("Logout callback state did not validate");
            }
        },
        _ => {
            tracing::debug!("Logout callback without state or flow cookie");
        }
    }

    Redirect::to("/").into_response()
}
