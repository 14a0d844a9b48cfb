//! HTTP control surface.
//!
//! Stands in for the message bus: triggers and volume changes come in as
//! requests, and the latest reported states can be read back.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chimeconf::VolumeMode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::error::ChimeError;
use crate::orchestrator::{Orchestrator, PoolSnapshot, TriggerOutcome};
use crate::reporter::{PoolState, StateBoard};
use crate::volume::{VolumeState, VolumeTarget};

/// Shared state for web handlers
#[derive(Clone)]
pub struct WebState {
    pub orchestrator: Arc<Orchestrator>,
    pub board: Arc<StateBoard>,
    pub started: Instant,
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/", get(serve_root))
        .route("/health", get(health))
        .route("/pools", get(list_pools))
        .route("/pools/{id}/play", post(play_pool))
        .route("/pools/{id}/volume", put(set_pool_volume))
        .route("/volume", get(device_volume).put(set_device_volume))
        .route("/volume/mute", put(set_device_mute))
        .route("/refresh", post(refresh))
        .with_state(state)
}

struct ApiError(ChimeError);

impl From<ChimeError> for ApiError {
    fn from(e: ChimeError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ChimeError::UnknownPool(_) => StatusCode::NOT_FOUND,
            ChimeError::PoolUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ChimeError::InvalidVolume(_) => StatusCode::BAD_REQUEST,
            ChimeError::Configuration(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn serve_root() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "chimebox",
        "version": env!("CARGO_PKG_VERSION"),
        "links": {
            "health": "/health",
            "pools": "/pools",
            "volume": "/volume",
        }
    }))
}

async fn health(State(state): State<WebState>) -> impl IntoResponse {
    let pools = state.orchestrator.snapshots();
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started.elapsed().as_secs(),
        "pools": {
            "total": pools.len(),
            "available": pools.iter().filter(|p| p.available).count(),
            "playing": pools.iter().filter(|p| p.state == PoolState::On).count(),
        }
    }))
}

#[derive(Debug, Serialize)]
struct PoolView {
    #[serde(flatten)]
    pool: PoolSnapshot,
    /// Last state sent to the reporter, if any.
    reported: Option<PoolState>,
    volume: Option<VolumeState>,
}

async fn list_pools(State(state): State<WebState>) -> impl IntoResponse {
    let volume = state.orchestrator.volume();
    let views: Vec<PoolView> = state
        .orchestrator
        .snapshots()
        .into_iter()
        .map(|pool| {
            let target = match volume.mode() {
                VolumeMode::Device => VolumeTarget::Device,
                VolumeMode::Pool => VolumeTarget::Pool(pool.identifier.clone()),
            };
            PoolView {
                reported: state.board.state(&pool.identifier),
                volume: volume.get(&target).ok(),
                pool,
            }
        })
        .collect();
    Json(views)
}

async fn play_pool(
    State(state): State<WebState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let response = match state.orchestrator.on_trigger(&id)? {
        TriggerOutcome::Started(_) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "pool": id, "status": "started" })),
        ),
        TriggerOutcome::AlreadyPlaying => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "pool": id, "status": "already_playing" })),
        ),
    };
    Ok(response.into_response())
}

#[derive(Debug, Deserialize)]
struct VolumeBody {
    percent: Option<u32>,
    muted: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct MuteBody {
    muted: bool,
}

async fn apply_volume(
    orchestrator: &Orchestrator,
    target: VolumeTarget,
    body: VolumeBody,
) -> Result<VolumeState, ChimeError> {
    let mut state = orchestrator.volume().get(&target)?;
    if let Some(percent) = body.percent {
        state = orchestrator.on_volume_set(target.clone(), percent).await?;
    }
    if let Some(muted) = body.muted {
        state = orchestrator.on_mute_set(target, muted).await?;
    }
    Ok(state)
}

async fn device_volume(State(state): State<WebState>) -> Result<Json<VolumeState>, ApiError> {
    Ok(Json(state.orchestrator.volume().get(&VolumeTarget::Device)?))
}

async fn set_device_volume(
    State(state): State<WebState>,
    Json(body): Json<VolumeBody>,
) -> Result<Json<VolumeState>, ApiError> {
    let volume = apply_volume(&state.orchestrator, VolumeTarget::Device, body).await?;
    Ok(Json(volume))
}

async fn set_device_mute(
    State(state): State<WebState>,
    Json(body): Json<MuteBody>,
) -> Result<Json<VolumeState>, ApiError> {
    let volume = state
        .orchestrator
        .on_mute_set(VolumeTarget::Device, body.muted)
        .await?;
    Ok(Json(volume))
}

async fn set_pool_volume(
    State(state): State<WebState>,
    Path(id): Path<String>,
    Json(body): Json<VolumeBody>,
) -> Result<Json<VolumeState>, ApiError> {
    if state.orchestrator.pool(&id).is_none() {
        return Err(ChimeError::UnknownPool(id).into());
    }
    let volume = apply_volume(&state.orchestrator, VolumeTarget::Pool(id), body).await?;
    Ok(Json(volume))
}

async fn refresh(State(state): State<WebState>) -> impl IntoResponse {
    Json(state.orchestrator.refresh_all().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::orchestrator::PoolRuntime;
    use crate::player::Player;
    use crate::sequence::QueueRandom;
    use crate::source::SoundSource;
    use crate::types::ClipId;
    use crate::volume::VolumeControl;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use bytes::Bytes;
    use chimeconf::VolumeConfig;
    use tower::ServiceExt;

    struct OneClip;

    #[async_trait]
    impl SoundSource for OneClip {
        async fn list_clips(&self) -> Result<Vec<ClipId>> {
            Ok(vec![ClipId::new("ding.mp3")])
        }

        async fn fetch_clip(&self, _clip: &ClipId) -> Result<Bytes> {
            Ok(Bytes::from_static(b"ding"))
        }

        fn describe(&self) -> String {
            "one-clip".to_string()
        }
    }

    /// Never finishes, so a pool stays playing for the whole test.
    struct StuckPlayer;

    #[async_trait]
    impl Player for StuckPlayer {
        async fn play(&self, _clip: &ClipId, _audio: Bytes, _volume: u8) -> Result<()> {
            futures::future::pending::<()>().await;
            Ok(())
        }
    }

    async fn setup(mode: VolumeMode) -> WebState {
        let pools = vec![
            PoolRuntime::new("bell", "Bell", Box::new(OneClip), Box::new(QueueRandom::new())),
            PoolRuntime::new("gong", "Gong", Box::new(OneClip), Box::new(QueueRandom::new())),
        ];
        let board = Arc::new(StateBoard::new());
        let volume = Arc::new(VolumeControl::new(
            &VolumeConfig {
                mode,
                default_percent: 50,
            },
            ["bell", "gong"],
        ));
        let orchestrator = Orchestrator::new(pools, Arc::new(StuckPlayer), board.clone(), volume);
        // only "bell" gets a listing
        orchestrator.pool("bell").unwrap().refresh().await.unwrap();

        WebState {
            orchestrator: Arc::new(orchestrator),
            board,
            started: Instant::now(),
        }
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_play_statuses() {
        let app = router(setup(VolumeMode::Device).await);

        let (status, json) = send(&app, "POST", "/pools/bell/play", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["status"], "started");

        let (status, _) = send(&app, "POST", "/pools/bell/play", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(&app, "POST", "/pools/gong/play", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = send(&app, "POST", "/pools/nope/play", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_pools() {
        let app = router(setup(VolumeMode::Device).await);

        let (status, json) = send(&app, "GET", "/pools", None).await;

        assert_eq!(status, StatusCode::OK);
        let pools = json.as_array().unwrap();
        assert_eq!(pools.len(), 2);
        assert_eq!(pools[0]["identifier"], "bell");
        assert_eq!(pools[0]["available"], true);
        assert_eq!(pools[0]["clips"], 1);
        assert_eq!(pools[0]["state"], "off");
        assert_eq!(pools[0]["volume"]["percent"], 50);
        assert_eq!(pools[1]["available"], false);
    }

    #[tokio::test]
    async fn test_device_volume() {
        let state = setup(VolumeMode::Device).await;
        let board = state.board.clone();
        let app = router(state);

        let (status, json) = send(&app, "PUT", "/volume", Some(r#"{"percent": 30}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["percent"], 30);

        let (status, json) = send(&app, "PUT", "/volume/mute", Some(r#"{"muted": true}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["muted"], true);
        assert_eq!(json["percent"], 30);
        assert_eq!(board.volume(&VolumeTarget::Device).map(|v| v.muted), Some(true));

        let (status, _) = send(&app, "PUT", "/volume", Some(r#"{"percent": 150}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "PUT", "/pools/bell/volume", Some(r#"{"percent": 10}"#)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_pool_volume() {
        let app = router(setup(VolumeMode::Pool).await);

        let (status, json) = send(
            &app,
            "PUT",
            "/pools/gong/volume",
            Some(r#"{"percent": 20, "muted": false}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["percent"], 20);

        let (status, _) = send(&app, "PUT", "/pools/nope/volume", Some(r#"{"percent": 20}"#)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_refresh_and_health() {
        let app = router(setup(VolumeMode::Device).await);

        let (status, json) = send(&app, "POST", "/refresh", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["refreshed"].as_array().unwrap().len(), 2);

        let (status, json) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["pools"]["available"], 2);
    }
}
