//! HTTP Router
//!
//! Sets up the axum router: an open status endpoint and the `/v1` desk API.

use axum::extract::State;
use axum::routing::get;
use axum::{middleware, Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use desk_runtime::DeskState;

use super::auth::require_token;
use super::handler::{get_height, height_events, move_desk};
use super::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/desk/:address", get(get_height).patch(move_desk))
        .route("/desk/:address/events", get(height_events))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        // Status for monitoring, never authenticated
        .route("/status", get(status))
        .nest("/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct DeskStatus {
    address: String,
    state: DeskState,
}

/// Status response
#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    version: &'static str,
    desks: Vec<DeskStatus>,
}

/// Status endpoint
async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let desks = state
        .registry()
        .list()
        .into_iter()
        .map(|(address, state)| DeskStatus { address, state })
        .collect();

    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        desks,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use futures::StreamExt;
    use serde_json::Value;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;
    use tower::ServiceExt;

    use desk_runtime::{DeskRegistry, MoveScope};

    use super::*;
    use crate::config::SimulatorConfig;
    use crate::simulator::SimulatedConnector;

    const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

    fn test_state(tokens: &[&str]) -> AppState {
        let connector = Arc::new(SimulatedConnector::new(SimulatorConfig::default()));
        let registry = Arc::new(DeskRegistry::new(connector));
        AppState::new(registry, tokens.iter().map(|t| t.to_string()))
    }

    fn request(method: Method, uri: &str) -> axum::http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_status_lists_known_desks() {
        let state = test_state(&["secret"]);
        state.registry().read_height(ADDRESS).await.unwrap();

        let response = create_router(state)
            .oneshot(request(Method::GET, "/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["desks"][0]["address"], ADDRESS);
        assert_eq!(body["desks"][0]["state"], "running");
    }

    #[tokio::test]
    async fn test_get_height_creates_desk_lazily() {
        let state = test_state(&[]);

        let response = create_router(state.clone())
            .oneshot(
                request(Method::GET, "/v1/desk/aa:bb:cc:dd:ee:ff")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["height"], 7000);
        assert_eq!(state.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_address_is_bad_request() {
        let response = create_router(test_state(&[]))
            .oneshot(request(Method::GET, "/v1/desk/kitchen").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "invalid_address");
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let response = create_router(test_state(&["secret"]))
            .oneshot(
                request(Method::GET, &format!("/v1/desk/{ADDRESS}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "unauthorized");
    }

    #[tokio::test]
    async fn test_wrong_token_is_unauthorized() {
        let response = create_router(test_state(&["secret"]))
            .oneshot(
                request(Method::GET, &format!("/v1/desk/{ADDRESS}"))
                    .header(header::AUTHORIZATION, "Bearer guess")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_bearer_and_bare_tokens_are_accepted() {
        let router = create_router(test_state(&["secret"]));

        for value in ["Bearer secret", "secret"] {
            let response = router
                .clone()
                .oneshot(
                    request(Method::GET, &format!("/v1/desk/{ADDRESS}"))
                        .header(header::AUTHORIZATION, value)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK, "{value}");
        }
    }

    #[tokio::test]
    async fn test_move_out_of_range_is_bad_request() {
        let state = test_state(&[]);

        let response = create_router(state)
            .oneshot(
                request(Method::PATCH, &format!("/v1/desk/{ADDRESS}"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"height": 20000}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "invalid_height");
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_returns_arrived_height() {
        let state = test_state(&[]);

        let response = create_router(state)
            .oneshot(
                request(Method::PATCH, &format!("/v1/desk/{ADDRESS}"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"height": 7300}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let height = json_body(response).await["height"].as_i64().unwrap();
        assert!((7286..=7314).contains(&height), "height {height}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_past_timeout_is_gateway_timeout() {
        let state = test_state(&[]);

        let response = create_router(state)
            .oneshot(
                request(Method::PATCH, &format!("/v1/desk/{ADDRESS}"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"height": 12000, "timeout_ms": 1000}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(json_body(response).await["error"], "timed_out");
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_stream_emits_height_events() {
        let state = test_state(&[]);

        let response = create_router(state.clone())
            .oneshot(
                request(Method::GET, &format!("/v1/desk/{ADDRESS}/events"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

        let registry = Arc::clone(state.registry());
        tokio::spawn(async move { registry.move_to(ADDRESS, 7200, MoveScope::new()).await });

        let mut body = response.into_body().into_data_stream();
        let mut frame = String::new();
        while !frame.contains("event: height") {
            let chunk = body.next().await.unwrap().unwrap();
            frame = String::from_utf8_lossy(&chunk).into_owned();
        }

        assert!(frame.contains(r#""height":7004"#), "{frame}");
        assert!(frame.contains("timestamp"));
    }

    #[tokio::test]
    async fn test_shutdown_ends_open_event_streams() {
        let state = test_state(&[]);
        let stop_streams = state.shutdown_token().clone();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (signal_tx, signal_rx) = oneshot::channel::<()>();

        let server = tokio::spawn(async move {
            axum::serve(listener, create_router(state))
                .with_graceful_shutdown(async move {
                    let _ = signal_rx.await;
                    stop_streams.cancel();
                })
                .await
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET /v1/desk/{ADDRESS}/events HTTP/1.1\r\nHost: localhost\r\n\r\n");
        client.write_all(request.as_bytes()).await.unwrap();

        let mut buf = [0u8; 512];
        let n = client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 200 OK"));

        signal_tx.send(()).unwrap();

        let finished = tokio::time::timeout(Duration::from_secs(3), server).await;
        assert!(matches!(finished, Ok(Ok(Ok(())))));
    }
}
