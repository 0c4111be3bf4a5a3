/// Change notifications sent to collaborators
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

use crate::{
    Collaborator, EntityKind, Project, ProjectId, ProjectVersion, Track, TrackId, UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Add,
    Modify,
    Delete,
}

/// Topic a change is published on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum Scope {
    Project(ProjectId),
    Track(TrackId),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Project(id) => write!(f, "/topic/project/{id}"),
            Scope::Track(id) => write!(f, "/topic/track/{id}"),
        }
    }
}

/// Ephemeral change event; never persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub entity: EntityKind,
    pub entity_id: i64,
    pub project_id: ProjectId,
    pub actor_id: UserId,
    pub payload: serde_json::Value,
    pub emitted_at: DateTime<Utc>,
}

impl ChangeEvent {
    fn new(
        kind: ChangeKind,
        entity: EntityKind,
        entity_id: i64,
        project_id: ProjectId,
        actor_id: UserId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            entity,
            entity_id,
            project_id,
            actor_id,
            payload,
            emitted_at: Utc::now(),
        }
    }

    pub fn track_added(track: &Track, actor_id: UserId) -> Self {
        Self::track_change(ChangeKind::Add, track, actor_id)
    }

    pub fn track_modified(track: &Track, actor_id: UserId) -> Self {
        Self::track_change(ChangeKind::Modify, track, actor_id)
    }

    pub fn track_deleted(project_id: ProjectId, track_id: TrackId, actor_id: UserId) -> Self {
        Self::new(
            ChangeKind::Delete,
            EntityKind::Track,
            track_id.0,
            project_id,
            actor_id,
            json!({ "id": track_id }),
        )
    }

    fn track_change(kind: ChangeKind, track: &Track, actor_id: UserId) -> Self {
        Self::new(
            kind,
            EntityKind::Track,
            track.id.0,
            track.project_id,
            actor_id,
            json!({
                "id": track.id,
                "instrument": track.payload.instrument,
                "musical_sequence": track.payload.musical_sequence,
                "revision": track.revision,
            }),
        )
    }

    pub fn project_added(project: &Project, actor_id: UserId) -> Self {
        Self::project_change(ChangeKind::Add, project, actor_id)
    }

    pub fn project_modified(project: &Project, actor_id: UserId) -> Self {
        Self::project_change(ChangeKind::Modify, project, actor_id)
    }

    pub fn project_deleted(project_id: ProjectId, actor_id: UserId) -> Self {
        Self::new(
            ChangeKind::Delete,
            EntityKind::Project,
            project_id.0,
            project_id,
            actor_id,
            json!({ "id": project_id }),
        )
    }

    fn project_change(kind: ChangeKind, project: &Project, actor_id: UserId) -> Self {
        Self::new(
            kind,
            EntityKind::Project,
            project.id.0,
            project.id,
            actor_id,
            json!({
                "id": project.id,
                "title": project.meta.title,
                "description": project.meta.description,
                "genre": project.meta.genre,
                "tempo": project.meta.tempo,
                "track_ids": project.tracks.iter().map(|t| t.id).collect::<Vec<_>>(),
            }),
        )
    }

    pub fn version_added(version: &ProjectVersion, actor_id: UserId) -> Self {
        Self::new(
            ChangeKind::Add,
            EntityKind::Version,
            version.id.0,
            version.project_id,
            actor_id,
            json!({
                "id": version.id,
                "description": version.description,
                "created_at": version.created_at,
            }),
        )
    }

    pub fn collaborator_added(collaborator: &Collaborator, actor_id: UserId) -> Self {
        Self::collaborator_change(ChangeKind::Add, collaborator, actor_id)
    }

    pub fn collaborator_removed(collaborator: &Collaborator, actor_id: UserId) -> Self {
        Self::collaborator_change(ChangeKind::Delete, collaborator, actor_id)
    }

    fn collaborator_change(
        kind: ChangeKind,
        collaborator: &Collaborator,
        actor_id: UserId,
    ) -> Self {
        Self::new(
            kind,
            EntityKind::Collaborator,
            collaborator.user_id.0,
            collaborator.project_id,
            actor_id,
            json!({
                "user_id": collaborator.user_id,
                "role": collaborator.role,
            }),
        )
    }

    /// Scopes this event is delivered on
    pub fn scopes(&self) -> Vec<Scope> {
        match self.entity {
            EntityKind::Track => vec![
                Scope::Track(TrackId(self.entity_id)),
                Scope::Project(self.project_id),
            ],
            EntityKind::Project | EntityKind::Version | EntityKind::Collaborator => {
                vec![Scope::Project(self.project_id)]
            }
        }
    }
}
