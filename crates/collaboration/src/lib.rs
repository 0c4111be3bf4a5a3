/// Collaborative project editing core
/// Snapshots, revert-by-identity, optimistic track writes and change fan-out
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use project::{
    Collaborator, EntityKind, EntityStore, NewVersion, Project, ProjectDb, ProjectId,
    ProjectMeta, ProjectVersion, Revision, SnapshotStore, StoreError, Track, TrackId,
    TrackPayload, UserId, VersionId,
};

mod events;
pub use events::*;

mod broadcast;
pub use broadcast::*;

mod guard;
pub use guard::*;

mod snapshot;
pub use snapshot::*;

mod revert;
pub use revert::*;

mod config;
pub use config::*;

mod service;
pub use service::*;

#[derive(Debug, Error)]
pub enum CollaborationError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: i64 },

    #[error("track {track_id} was modified by another user; refresh and retry")]
    ConcurrentEdit {
        track_id: TrackId,
        expected: Revision,
        /// `None` when the track was deleted underneath the writer
        stored: Option<Revision>,
    },

    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: EntityKind, id: i64 },

    #[error("failed to serialize project snapshot: {0}")]
    SnapshotSerialization(String),

    #[error("failed to deserialize project snapshot: {0}")]
    SnapshotDeserialization(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[source] StoreError),
}

impl CollaborationError {
    pub fn not_found(kind: EntityKind, id: impl Into<i64>) -> Self {
        CollaborationError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Only a stale revision can succeed on retry, after the caller refreshes
    pub fn is_retryable(&self) -> bool {
        matches!(self, CollaborationError::ConcurrentEdit { .. })
    }
}

impl From<StoreError> for CollaborationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => CollaborationError::NotFound { kind, id },
            StoreError::Duplicate { kind, id } => CollaborationError::AlreadyExists { kind, id },
            StoreError::StaleRevision {
                id,
                expected,
                stored,
            } => CollaborationError::ConcurrentEdit {
                track_id: id,
                expected,
                stored,
            },
            other => CollaborationError::Storage(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, CollaborationError>;

/// The user on whose behalf a core call runs.
///
/// Identity is taken at face value; credentials are checked by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Actor {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_taxonomy() {
        let err: CollaborationError = StoreError::not_found(EntityKind::Track, 4).into();
        assert!(matches!(
            err,
            CollaborationError::NotFound {
                kind: EntityKind::Track,
                id: 4
            }
        ));
        assert!(!err.is_retryable());

        let err: CollaborationError = StoreError::StaleRevision {
            id: TrackId(4),
            expected: Revision(1),
            stored: Some(Revision(2)),
        }
        .into();
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "track 4 was modified by another user; refresh and retry"
        );

        let err: CollaborationError = StoreError::Duplicate {
            kind: EntityKind::Collaborator,
            id: 3,
        }
        .into();
        assert!(matches!(err, CollaborationError::AlreadyExists { id: 3, .. }));
        assert!(!err.is_retryable());

        let err: CollaborationError = StoreError::Corrupt("bad row".into()).into();
        assert!(matches!(err, CollaborationError::Storage(_)));
    }

    #[test]
    fn test_not_found_message() {
        let err = CollaborationError::not_found(EntityKind::Version, VersionId(12));
        assert_eq!(err.to_string(), "project version 12 not found");
    }
}
