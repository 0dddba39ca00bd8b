//! HTTP surface: `POST /goals` generates a plan, `PUT /goals/:id` refreshes
//! it. Workflow runs happen on the blocking pool, serialized per goal id.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::extract::{self, DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use guide_contracts::events::{PlanEventKind, PlanJournal};
use guide_contracts::store::validate_goal_id;
use guide_contracts::{ContractError, GoalStore, PixelPlan, Plan};
use guide_engine::imaging::{decode_base64_image, encode_base64, ImagePayloadError};
use guide_engine::{ArtifactLayout, PlanError, PlanWorkflow, WorkflowArtifacts};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, warn};

const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct GoalRequest {
    pub image_base64: String,
}

#[derive(Debug, Serialize)]
pub struct GoalResponse {
    pub id: String,
    pub plan: PixelPlan,
    pub highlight_image_base64: Option<String>,
    pub banana_image_base64: Option<String>,
}

/// Client-facing failure rendered as `{"detail": <message>}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Upstream(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<ImagePayloadError> for ApiError {
    fn from(err: ImagePayloadError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<ContractError> for ApiError {
    fn from(err: ContractError) -> Self {
        match err {
            ContractError::InvalidGoalId { .. } => Self::BadRequest(err.to_string()),
            ContractError::GoalNotFound { .. } => Self::NotFound(err.to_string()),
            other => {
                error!(error = %other, "goal store failure");
                Self::Internal(other.to_string())
            }
        }
    }
}

impl From<PlanError> for ApiError {
    fn from(err: PlanError) -> Self {
        if err.is_model_failure() {
            warn!(error = %err, "model failure");
            Self::Upstream(err.to_string())
        } else {
            error!(error = %err, "workflow failure");
            Self::Internal(err.to_string())
        }
    }
}

type LockMap = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Per-goal async locks. An entry lives only while a request holds or waits
/// on it.
#[derive(Clone, Default)]
struct GoalLocks {
    map: LockMap,
}

impl GoalLocks {
    async fn acquire(&self, id: &str) -> GoalLockGuard {
        let lock = lock_map(&self.map).entry(id.to_string()).or_default().clone();
        let guard = lock.lock_owned().await;
        GoalLockGuard {
            map: self.map.clone(),
            id: id.to_string(),
            guard: Some(guard),
        }
    }

    fn len(&self) -> usize {
        lock_map(&self.map).len()
    }
}

struct GoalLockGuard {
    map: LockMap,
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for GoalLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = lock_map(&self.map);
        // Only the map's own handle left: nobody holds or waits on this id.
        if map
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&self.id);
        }
    }
}

fn lock_map(
    map: &Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
) -> std::sync::MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    workflow: PlanWorkflow,
    store: GoalStore,
    data_dir: PathBuf,
    locks: GoalLocks,
}

impl AppState {
    pub fn new(workflow: PlanWorkflow, store: GoalStore, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                workflow,
                store,
                data_dir: data_dir.into(),
                locks: GoalLocks::default(),
            }),
        }
    }

    pub fn store(&self) -> &GoalStore {
        &self.inner.store
    }

    pub fn layout_for(&self, id: &str) -> ArtifactLayout {
        ArtifactLayout::new(self.inner.data_dir.join(id))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(healthcheck))
        .route("/goals", post(create_goal))
        .route("/goals/:id", put(update_goal))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

pub async fn serve(bind: &str, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(addr = %listener.local_addr()?, "guide server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
    }
}

pub async fn healthcheck() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn create_goal(
    State(state): State<AppState>,
    Json(request): Json<GoalRequest>,
) -> Result<Json<GoalResponse>, ApiError> {
    let image = decode_base64_image(&request.image_base64)?;
    let id = GoalStore::new_id();
    info!(goal_id = %id, width = image.width(), height = image.height(), "creating goal");
    run_workflow(state.clone(), id, image, None, None).await.map(Json)
}

pub async fn update_goal(
    State(state): State<AppState>,
    extract::Path(raw_id): extract::Path<String>,
    Json(request): Json<GoalRequest>,
) -> Result<Json<GoalResponse>, ApiError> {
    let id = validate_goal_id(&raw_id)?.to_string();
    if !state.store().contains(&id)? {
        return Err(ContractError::GoalNotFound { id }.into());
    }
    let guard = state.inner.locks.acquire(&id).await;
    let existing = state.store().load(&id)?;
    let image = decode_base64_image(&request.image_base64)?;
    info!(goal_id = %id, width = image.width(), height = image.height(), "refreshing goal");
    run_workflow(state.clone(), id, image, Some(existing), Some(guard))
        .await
        .map(Json)
}

async fn run_workflow(
    state: AppState,
    id: String,
    image: DynamicImage,
    existing: Option<Plan>,
    guard: Option<GoalLockGuard>,
) -> Result<GoalResponse, ApiError> {
    // Held until the workflow finishes, even if the request is dropped.
    tokio::task::spawn_blocking(move || {
        let _guard = guard;
        execute(&state, &id, &image, existing.as_ref())
    })
    .await
    .map_err(|err| ApiError::Internal(format!("workflow task failed: {err}")))?
}

fn execute(
    state: &AppState,
    id: &str,
    image: &DynamicImage,
    existing: Option<&Plan>,
) -> Result<GoalResponse, ApiError> {
    let layout = state.layout_for(id);
    fs::create_dir_all(layout.root())
        .map_err(|err| ApiError::from(PlanError::io(layout.root(), err)))?;
    let request_path = layout.request_image_path();
    image
        .save(&request_path)
        .map_err(|err| ApiError::from(PlanError::image(&request_path, err)))?;

    let workflow = &state.inner.workflow;
    let (artifacts, kind) = match existing {
        None => (workflow.generate(image, &layout)?, PlanEventKind::PlanGenerated),
        Some(plan) => (
            workflow.refresh(image, plan, &layout)?,
            PlanEventKind::PlanRefreshed,
        ),
    };
    state.store().save(id, &artifacts.plan)?;

    let journal = PlanJournal::new(state.store().events_path_for(id)?, id);
    if let Err(err) = journal.record(
        kind,
        &artifacts.plan,
        artifacts.highlight_path.is_some(),
        artifacts.preview_path().is_some(),
    ) {
        warn!(goal_id = id, error = %err, "failed to append plan event");
    }

    Ok(build_response(id, &artifacts, image.width(), image.height()))
}

fn build_response(id: &str, artifacts: &WorkflowArtifacts, width: u32, height: u32) -> GoalResponse {
    GoalResponse {
        id: id.to_string(),
        plan: artifacts
            .plan
            .to_pixel_space(width, height)
            .retain_actionable(),
        highlight_image_base64: encode_file(artifacts.highlight_path.as_deref()),
        banana_image_base64: encode_file(artifacts.preview_path()),
    }
}

fn encode_file(path: Option<&std::path::Path>) -> Option<String> {
    let path = path?;
    match fs::read(path) {
        Ok(bytes) => Some(encode_base64(&bytes)),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "artifact unreadable");
            None
        }
    }
}
