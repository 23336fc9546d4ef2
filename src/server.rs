//! HTTP signaling: browsers POST an SDP offer to `/offer` and get the answer
//! back in one round trip. HLS segments are served under `/hls`.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::peer::{PeerRegistry, SessionDescription, SignalingError};

#[derive(Clone)]
pub struct AppState {
    pub peers: Arc<PeerRegistry>,
}

impl IntoResponse for SignalingError {
    fn into_response(self) -> Response {
        let status = match self {
            SignalingError::Malformed(_)
            | SignalingError::NotAnOffer(_)
            | SignalingError::InvalidSdp(_) => StatusCode::BAD_REQUEST,
            SignalingError::WebRtc(_) | SignalingError::NoLocalDescription => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(peers: Arc<PeerRegistry>, hls_dir: &Path) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/offer", post(offer))
        .route("/health", get(health))
        .nest_service("/hls", ServeDir::new(hls_dir))
        .layer(cors)
        .with_state(AppState { peers })
}

// body 手动解析，JSON 格式错误统一返回 400
async fn offer(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SessionDescription>, SignalingError> {
    let offer: SessionDescription = serde_json::from_slice(&body)?;
    let answer = state.peers.answer(offer).await?;
    Ok(Json(answer))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let peers = state.peers.len().await;
    (
        [(header::CACHE_CONTROL, HeaderValue::from_static("no-store"))],
        Json(json!({ "status": "ok", "peers": peers })),
    )
}

/// Serve until `shutdown_rx` flips to true.
pub async fn run_server(
    addr: SocketAddr,
    peers: Arc<PeerRegistry>,
    hls_dir: &Path,
    mut shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = router(peers, hls_dir);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    log::info!("WebRTC signaling server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown_rx.borrow_and_update() {
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;

    log::info!("Signaling server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::MediaRelay;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(hls_dir: &Path) -> (Router, Arc<PeerRegistry>) {
        let peers =
            Arc::new(PeerRegistry::new(Arc::new(MediaRelay::new(true, false)), &[]).unwrap());
        (router(peers.clone(), hls_dir), peers)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_offer(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/offer")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ORIGIN, "http://viewer.local")
            .body(body.into())
            .unwrap()
    }

    #[tokio::test]
    async fn preflight_allows_any_origin() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path());
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/offer")
                    .header(header::ORIGIN, "http://viewer.local")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let methods = headers[header::ACCESS_CONTROL_ALLOW_METHODS].to_str().unwrap();
        assert!(methods.contains("POST") && methods.contains("OPTIONS"));
        let allowed = headers[header::ACCESS_CONTROL_ALLOW_HEADERS].to_str().unwrap();
        assert!(allowed.eq_ignore_ascii_case("content-type"));
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let (app, peers) = app(dir.path());
        let response = app.oneshot(post_offer("{not json")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(body_json(response).await["error"].is_string());
        assert_eq!(peers.len().await, 0);
    }

    #[tokio::test]
    async fn missing_fields_are_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path());
        let response = app.oneshot(post_offer(r#"{"sdp":"v=0"}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn answer_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path());
        let response = app
            .oneshot(post_offer(r#"{"sdp":"v=0","type":"answer"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("answer"));
    }

    #[tokio::test]
    async fn offer_returns_answer() {
        let dir = tempfile::tempdir().unwrap();
        let (app, peers) = app(dir.path());
        let (viewer, offer) = crate::peer::tests::viewer_offer().await;

        let response = app
            .oneshot(post_offer(serde_json::to_vec(&offer).unwrap()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let body = body_json(response).await;
        assert_eq!(body["type"], "answer");
        assert!(body["sdp"].as_str().unwrap().starts_with("v=0"));
        assert_eq!(peers.len().await, 1);

        peers.close_all().await;
        viewer.close().await.unwrap();
    }

    #[tokio::test]
    async fn health_reports_peer_count() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["peers"], 0);
    }

    #[tokio::test]
    async fn serves_hls_playlist() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.m3u8"), "#EXTM3U\n").unwrap();
        let (app, _) = app(dir.path());

        let response = app
            .clone()
            .oneshot(Request::get("/hls/index.m3u8").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"#EXTM3U\n");

        let missing = app
            .oneshot(Request::get("/hls/seg_999.ts").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn shuts_down_on_signal() {
        let dir = tempfile::tempdir().unwrap();
        let peers =
            Arc::new(PeerRegistry::new(Arc::new(MediaRelay::new(false, false)), &[]).unwrap());
        let (tx, rx) = watch::channel(false);
        let hls = dir.path().to_path_buf();
        let handle = tokio::spawn(async move {
            run_server(SocketAddr::from(([127, 0, 0, 1], 0)), peers, &hls, rx).await
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
