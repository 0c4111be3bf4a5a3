/// REST endpoints over the collaboration service
/// Projects, tracks, collaborators, versions and revert
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use collaboration::{
    Actor, CollaborationError, CollaborationService, Collaborator, Project, ProjectId,
    ProjectMeta, ProjectVersion, Revision, Track, TrackId, TrackPayload, UserId, VersionId,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use crate::AppState;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Conflict(String),
    BadRequest(String),
    Unauthorized(String),
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<CollaborationError> for ApiError {
    fn from(err: CollaborationError) -> Self {
        match err {
            CollaborationError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            CollaborationError::ConcurrentEdit { .. } | CollaborationError::AlreadyExists { .. } => {
                ApiError::Conflict(err.to_string())
            }
            CollaborationError::Validation(msg) => ApiError::BadRequest(msg),
            other => {
                // details stay in the log, clients get a generic body
                error!("Request failed: {}", other);
                ApiError::Internal
            }
        }
    }
}

/// Runs a blocking service call off the async runtime
async fn blocking<T, F>(service: &Arc<CollaborationService>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&CollaborationService) -> collaboration::Result<T> + Send + 'static,
{
    let service = service.clone();
    tokio::task::spawn_blocking(move || f(&service))
        .await
        .map_err(|e| {
            error!("Blocking task failed: {}", e);
            ApiError::Internal
        })?
        .map_err(ApiError::from)
}

/// Caller identity from `x-user-id` and `x-user-roles`; credentials are
/// checked upstream
pub struct RequestActor(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for RequestActor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .ok_or_else(|| ApiError::Unauthorized("missing or invalid x-user-id header".into()))?;

        let mut actor = Actor::new(UserId(id));
        if let Some(roles) = parts
            .headers
            .get("x-user-roles")
            .and_then(|v| v.to_str().ok())
        {
            for role in roles.split(',').map(str::trim).filter(|r| !r.is_empty()) {
                actor = actor.with_role(role);
            }
        }
        Ok(RequestActor(actor))
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTrackRequest {
    /// Revision the client last observed
    pub revision: Revision,
    #[serde(flatten)]
    pub payload: TrackPayload,
}

#[derive(Debug, Deserialize)]
pub struct RevisionQuery {
    pub revision: Revision,
}

#[derive(Debug, Deserialize)]
pub struct AddCollaboratorRequest {
    pub user_id: UserId,
    pub role: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SaveVersionRequest {
    pub description: Option<String>,
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "time": chrono::Utc::now() }))
}

/// POST /projects
pub async fn create_project(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Json(meta): Json<ProjectMeta>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    let project = blocking(&state.service, move |svc| svc.create_project(&actor, meta)).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// GET /projects
pub async fn list_projects(State(state): State<AppState>) -> Result<Json<Vec<Project>>, ApiError> {
    blocking(&state.service, |svc| svc.list_projects())
        .await
        .map(Json)
}

/// GET /projects/search?query=
pub async fn search_projects(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Vec<Project>>, ApiError> {
    blocking(&state.service, move |svc| svc.search_projects(&q.query))
        .await
        .map(Json)
}

/// GET /projects/:id
pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<ProjectId>,
) -> Result<Json<Project>, ApiError> {
    blocking(&state.service, move |svc| svc.get_project(id))
        .await
        .map(Json)
}

/// PUT /projects/:id
pub async fn update_project(
    State(state): State<AppState>,
    Path(id): Path<ProjectId>,
    RequestActor(actor): RequestActor,
    Json(meta): Json<ProjectMeta>,
) -> Result<Json<Project>, ApiError> {
    blocking(&state.service, move |svc| svc.update_project(&actor, id, meta))
        .await
        .map(Json)
}

/// DELETE /projects/:id
pub async fn delete_project(
    State(state): State<AppState>,
    Path(id): Path<ProjectId>,
    RequestActor(actor): RequestActor,
) -> Result<StatusCode, ApiError> {
    blocking(&state.service, move |svc| svc.delete_project(&actor, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /projects/:id/tracks
pub async fn list_tracks(
    State(state): State<AppState>,
    Path(project_id): Path<ProjectId>,
) -> Result<Json<Vec<Track>>, ApiError> {
    blocking(&state.service, move |svc| svc.list_tracks(project_id))
        .await
        .map(Json)
}

/// POST /projects/:id/tracks
pub async fn create_track(
    State(state): State<AppState>,
    Path(project_id): Path<ProjectId>,
    RequestActor(actor): RequestActor,
    Json(payload): Json<TrackPayload>,
) -> Result<(StatusCode, Json<Track>), ApiError> {
    let track = blocking(&state.service, move |svc| {
        svc.create_track(&actor, project_id, payload)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(track)))
}

/// GET /projects/:id/tracks/:track_id
pub async fn get_track(
    State(state): State<AppState>,
    Path((project_id, track_id)): Path<(ProjectId, TrackId)>,
) -> Result<Json<Track>, ApiError> {
    blocking(&state.service, move |svc| svc.get_track(project_id, track_id))
        .await
        .map(Json)
}

/// PUT /projects/:id/tracks/:track_id
pub async fn update_track(
    State(state): State<AppState>,
    Path((project_id, track_id)): Path<(ProjectId, TrackId)>,
    RequestActor(actor): RequestActor,
    Json(req): Json<UpdateTrackRequest>,
) -> Result<Json<Track>, ApiError> {
    blocking(&state.service, move |svc| {
        svc.update_track(&actor, project_id, track_id, req.revision, req.payload)
    })
    .await
    .map(Json)
}

/// DELETE /projects/:id/tracks/:track_id?revision=
pub async fn delete_track(
    State(state): State<AppState>,
    Path((project_id, track_id)): Path<(ProjectId, TrackId)>,
    Query(q): Query<RevisionQuery>,
    RequestActor(actor): RequestActor,
) -> Result<StatusCode, ApiError> {
    blocking(&state.service, move |svc| {
        svc.delete_track(&actor, project_id, track_id, q.revision)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /projects/:id/collaborators
pub async fn list_collaborators(
    State(state): State<AppState>,
    Path(project_id): Path<ProjectId>,
) -> Result<Json<Vec<Collaborator>>, ApiError> {
    blocking(&state.service, move |svc| svc.collaborators(project_id))
        .await
        .map(Json)
}

/// POST /projects/:id/collaborators
pub async fn add_collaborator(
    State(state): State<AppState>,
    Path(project_id): Path<ProjectId>,
    RequestActor(actor): RequestActor,
    Json(req): Json<AddCollaboratorRequest>,
) -> Result<(StatusCode, Json<Collaborator>), ApiError> {
    let collaborator = blocking(&state.service, move |svc| {
        svc.add_collaborator(&actor, project_id, req.user_id, &req.role)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(collaborator)))
}

/// GET /projects/:id/collaborators/:user_id; 404 when the user is not one
pub async fn get_collaborator(
    State(state): State<AppState>,
    Path((project_id, user_id)): Path<(ProjectId, UserId)>,
) -> Result<Json<Collaborator>, ApiError> {
    blocking(&state.service, move |svc| svc.get_collaborator(project_id, user_id))
        .await
        .map(Json)
}

/// DELETE /projects/:id/collaborators/:user_id
pub async fn remove_collaborator(
    State(state): State<AppState>,
    Path((project_id, user_id)): Path<(ProjectId, UserId)>,
    RequestActor(actor): RequestActor,
) -> Result<StatusCode, ApiError> {
    blocking(&state.service, move |svc| {
        svc.remove_collaborator(&actor, project_id, user_id)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /projects/:id/versions
pub async fn list_versions(
    State(state): State<AppState>,
    Path(project_id): Path<ProjectId>,
) -> Result<Json<Vec<ProjectVersion>>, ApiError> {
    blocking(&state.service, move |svc| svc.versions_for_project(project_id))
        .await
        .map(Json)
}

/// POST /projects/:id/versions; the body is optional
pub async fn save_version(
    State(state): State<AppState>,
    Path(project_id): Path<ProjectId>,
    RequestActor(actor): RequestActor,
    body: Option<Json<SaveVersionRequest>>,
) -> Result<(StatusCode, Json<ProjectVersion>), ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let version = blocking(&state.service, move |svc| {
        svc.save_version(&actor, project_id, req.description.as_deref())
    })
    .await?;
    Ok((StatusCode::CREATED, Json(version)))
}

/// POST /projects/:id/revert/:version_id
pub async fn revert_to_version(
    State(state): State<AppState>,
    Path((project_id, version_id)): Path<(ProjectId, VersionId)>,
    RequestActor(actor): RequestActor,
) -> Result<Json<Project>, ApiError> {
    blocking(&state.service, move |svc| {
        svc.revert_to_version(&actor, project_id, version_id)
    })
    .await
    .map(Json)
}
