/// Immutable full-state project checkpoints
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{error, info};

use crate::{
    Actor, CollaborationError, EntityKind, NewVersion, Project, ProjectId, ProjectMeta,
    ProjectVersion, Result, SnapshotStore, TrackId, TrackPayload, VersionId,
};

/// Serialized form of a project held in `ProjectVersion::snapshot_data`.
///
/// Revision stamps are not captured; tracks restored from a snapshot get
/// fresh stamps from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub id: ProjectId,
    #[serde(flatten)]
    pub meta: ProjectMeta,
    #[serde(default)]
    pub tracks: Vec<SnapshotTrack>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotTrack {
    /// `None` for a track that has no identity yet
    #[serde(default)]
    pub id: Option<TrackId>,
    #[serde(flatten)]
    pub payload: TrackPayload,
}

impl ProjectSnapshot {
    pub fn capture(project: &Project) -> Result<Self> {
        let snapshot = Self {
            id: project.id,
            meta: project.meta.clone(),
            tracks: project
                .tracks
                .iter()
                .map(|t| SnapshotTrack {
                    id: Some(t.id),
                    payload: t.payload.clone(),
                })
                .collect(),
        };
        snapshot
            .check_unique_ids()
            .map_err(CollaborationError::SnapshotSerialization)?;
        Ok(snapshot)
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| CollaborationError::SnapshotSerialization(e.to_string()))
    }

    pub fn decode(data: &str) -> Result<Self> {
        let snapshot: Self = serde_json::from_str(data)
            .map_err(|e| CollaborationError::SnapshotDeserialization(e.to_string()))?;
        snapshot
            .check_unique_ids()
            .map_err(CollaborationError::SnapshotDeserialization)?;
        Ok(snapshot)
    }

    pub fn track_ids(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.tracks.iter().filter_map(|t| t.id)
    }

    fn check_unique_ids(&self) -> std::result::Result<(), String> {
        let mut seen = HashSet::new();
        for id in self.track_ids() {
            if !seen.insert(id) {
                return Err(format!("track {} appears more than once", id));
            }
        }
        Ok(())
    }
}

/// Appends snapshots and reads them back; never touches live entities
pub struct SnapshotManager<'s, S: SnapshotStore + ?Sized> {
    store: &'s S,
}

impl<'s, S: SnapshotStore + ?Sized> SnapshotManager<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// `project` must be fully loaded; every track it carries is captured
    pub fn create_snapshot(
        &self,
        project: &Project,
        actor: &Actor,
        description: Option<&str>,
    ) -> Result<ProjectVersion> {
        let snapshot_data = ProjectSnapshot::capture(project)
            .and_then(|s| s.encode())
            .map_err(|e| {
                error!("Failed to snapshot project {}: {}", project.id, e);
                e
            })?;

        let version = self.store.append_version(&NewVersion {
            project_id: project.id,
            saved_by: actor.id,
            description: description.map(str::to_owned),
            snapshot_data,
        })?;

        info!(
            "Saved version {} of project {} ({} tracks)",
            version.id,
            project.id,
            project.tracks.len()
        );
        Ok(version)
    }

    /// Most recent first
    pub fn versions_for_project(&self, project_id: ProjectId) -> Result<Vec<ProjectVersion>> {
        Ok(self.store.list_versions(project_id)?)
    }

    /// A version is only visible through the project it was taken from
    pub fn load(
        &self,
        project_id: ProjectId,
        version_id: VersionId,
    ) -> Result<(ProjectVersion, ProjectSnapshot)> {
        let version = self.store.get_version(version_id)?;
        if version.project_id != project_id {
            return Err(CollaborationError::not_found(EntityKind::Version, version_id));
        }

        let snapshot = ProjectSnapshot::decode(&version.snapshot_data).map_err(|e| {
            error!(
                "Unreadable snapshot in version {} of project {}: {}",
                version_id, project_id, e
            );
            e
        })?;
        if snapshot.id != project_id {
            error!(
                "Version {} stores a snapshot of project {}, filed under {}",
                version_id, snapshot.id, project_id
            );
            return Err(CollaborationError::SnapshotDeserialization(format!(
                "snapshot belongs to project {}",
                snapshot.id
            )));
        }

        Ok((version, snapshot))
    }
}
