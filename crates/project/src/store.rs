/// Storage contracts consumed by the collaboration core
use thiserror::Error;

use crate::{
    Collaborator, EntityKind, NewVersion, Project, ProjectId, ProjectMeta, ProjectVersion,
    Revision, Track, TrackId, TrackPayload, UserId, VersionId,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: i64 },

    /// A conditional write found a different stamp, or no row at all
    #[error("stale revision for track {id}: expected {expected}, stored {}", display_stored(.stored))]
    StaleRevision {
        id: TrackId,
        expected: Revision,
        stored: Option<Revision>,
    },

    #[error("{kind} {id} already exists")]
    Duplicate { kind: EntityKind, id: i64 },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

fn display_stored(stored: &Option<Revision>) -> String {
    match stored {
        Some(revision) => revision.to_string(),
        None => "nothing (deleted)".to_string(),
    }
}

impl StoreError {
    pub fn not_found(kind: EntityKind, id: impl Into<i64>) -> Self {
        StoreError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable keyed storage for projects and their tracks.
///
/// Track writes are conditional on the revision stamp the writer observed;
/// the stamp check and the increment happen in one statement.
pub trait EntityStore {
    /// Loads a project with all of its tracks
    fn get_project(&self, id: ProjectId) -> Result<Project>;

    fn list_projects(&self) -> Result<Vec<Project>>;

    /// Case-insensitive substring search over title, description and genre
    fn search_projects(&self, query: &str) -> Result<Vec<Project>>;

    fn insert_project(&self, owner: UserId, meta: &ProjectMeta) -> Result<Project>;

    fn update_project_meta(&self, id: ProjectId, meta: &ProjectMeta) -> Result<()>;

    /// Removes the project, its tracks and its versions
    fn delete_project(&self, id: ProjectId) -> Result<()>;

    fn get_track(&self, id: TrackId) -> Result<Track>;

    fn list_tracks(&self, project_id: ProjectId) -> Result<Vec<Track>>;

    fn insert_track(&self, project_id: ProjectId, payload: &TrackPayload) -> Result<Track>;

    fn update_track(&self, id: TrackId, expected: Revision, payload: &TrackPayload)
        -> Result<Track>;

    fn delete_track(&self, id: TrackId, expected: Revision) -> Result<()>;

    /// Fails with `Duplicate` if the user already collaborates on the project
    fn add_collaborator(&self, project_id: ProjectId, user_id: UserId, role: &str)
        -> Result<Collaborator>;

    fn get_collaborator(&self, project_id: ProjectId, user_id: UserId) -> Result<Collaborator>;

    /// Returns the membership that was removed
    fn remove_collaborator(&self, project_id: ProjectId, user_id: UserId) -> Result<Collaborator>;

    /// Ordered by the time each user was added
    fn list_collaborators(&self, project_id: ProjectId) -> Result<Vec<Collaborator>>;
}

/// Append-only storage for project versions
pub trait SnapshotStore {
    fn append_version(&self, version: &NewVersion) -> Result<ProjectVersion>;

    fn get_version(&self, id: VersionId) -> Result<ProjectVersion>;

    /// Most recent first; append order breaks timestamp ties
    fn list_versions(&self, project_id: ProjectId) -> Result<Vec<ProjectVersion>>;
}
