use axum::{Router, middleware::from_fn_with_state, routing::get};

use std::net::SocketAddr;
use tower_cookies::CookieManagerLayer;
use tower_http::{
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod state;
mod crypto {
    pub mod flow;
}

mod models {
    pub mod device;
    pub mod session;
}

mod repositories {
    pub mod session;
}

mod services {
    pub mod devices;
    pub mod gate;
    pub mod oidc;
}

mod handlers {
    pub mod auth;
    pub mod devices;
}

mod middleware_layer {
    pub mod auth;
}

use config::Config;
use state::AppState;

/// Assembles the application router for the given state.
fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::auth::health))
        .route("/login", get(handlers::auth::login))
        .route("/callback", get(handlers::auth::callback))
        .route("/auth-check", get(handlers::auth::auth_check))
        .route("/logout", get(handlers::auth::logout))
        .route("/logout/callback", get(handlers::auth::logout_callback))
        .with_state(state.clone());

    let api_routes = Router::new()
        .route("/me", get(handlers::auth::me))
        .route("/api/devices", get(handlers::devices::list_device_status))
        .route(
            "/api/devices/{device_id}",
            get(handlers::devices::device_status),
        )
        .route("/api/gate", get(handlers::devices::gate_status))
        .route(
            "/api/service/health",
            get(handlers::devices::service_health),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_auth,
        ))
        .with_state(state.clone());

    // The protected landing page: session first, then the device gate,
    // evaluated fresh on every request.
    let page_routes = Router::new()
        .route_service("/protected.html", ServeFile::new("public/protected.html"))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::enforce_device_gate,
        ))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_page_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .merge(page_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default())
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(CookieManagerLayer::new())
        .fallback_service(ServeDir::new("public"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let state = AppState::new(&config)?;
    tracing::info!("✅ AppState initialized");

    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🚀 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let state = AppState::new(&Config::for_tests()).unwrap();
        router(state)
    }

    async fn send_get(app: Router, uri: &str) -> http::Response<axum::body::Body> {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    fn location_of(response: &http::Response<axum::body::Body>) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .expect("redirect must carry a Location header")
            .to_str()
            .unwrap()
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let response = send_get(test_app(), "/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn login_sets_a_flow_cookie_and_redirects_to_the_provider() {
        let response = send_get(test_app(), "/login").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let location = location_of(&response);
        assert!(location.starts_with("https://idp.example.com/oauth2/authorize?"));
        assert!(location.contains("state="));
        assert!(location.contains("nonce="));
        assert!(location.contains("prompt=consent"));
        assert!(location.contains("scope=openid+profile+email"));

        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .expect("login must set the flow cookie")
            .to_str()
            .unwrap();
        assert!(set_cookie.starts_with("oidc_flow="));
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("SameSite=Lax"));
    }

    #[tokio::test]
    async fn a_forged_callback_state_is_rejected_without_a_session() {
        let app = test_app();

        let login = app
            .clone()
            .oneshot(Request::builder().uri("/login").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let flow_cookie = login
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/callback?code=some-code&state=forged-state")
                    .header(header::COOKIE, flow_cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        for value in response.headers().get_all(header::SET_COOKIE) {
            assert!(
                !value.to_str().unwrap().starts_with("session="),
                "a rejected callback must never set a session cookie"
            );
        }
    }

    #[tokio::test]
    async fn a_callback_without_a_flow_cookie_is_rejected() {
        let response = send_get(test_app(), "/callback?code=some-code&state=some-state").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn a_provider_error_short_circuits_the_callback() {
        let response = send_get(
            test_app(),
            "/callback?error=access_denied&error_description=user+said+no",
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unauthenticated_requests_get_401() {
        for uri in ["/auth-check", "/me", "/api/devices", "/api/gate"] {
            let response = send_get(test_app(), uri).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "uri: {}", uri);
        }
    }

    #[tokio::test]
    async fn the_protected_page_redirects_anonymous_visitors_to_login() {
        let response = send_get(test_app(), "/protected.html").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location_of(&response), "/login");
    }

    #[tokio::test]
    async fn logout_without_a_session_lands_home() {
        let response = send_get(test_app(), "/logout").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location_of(&response), "/");
    }

    #[tokio::test]
    async fn the_logout_callback_always_lands_home() {
        let response = send_get(test_app(), "/logout/callback?state=whatever").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location_of(&response), "/");
    }
}
