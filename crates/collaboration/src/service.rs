/// Entry points that sequence guard, store and broadcast
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    Actor, ChangeBroadcaster, ChangeEvent, CollaborationConfig, CollaborationError, Collaborator,
    ConcurrencyGuard, EntityKind, EntityStore, Project, ProjectDb, ProjectId, ProjectMeta,
    ProjectVersion, Result, RevertEngine, Revision, Scope, SnapshotManager, Subscription, Track,
    TrackId, TrackPayload, UserId, VersionId,
};

const MAX_TEMPO: u32 = 999;

/// Synchronous facade over the collaboration core.
///
/// A mutation is persisted first and announced second: events are only
/// published once the store has accepted the change, and a failed publish
/// never undoes it. Calls block on the store, so async callers should run
/// them on a blocking thread.
pub struct CollaborationService {
    db: Arc<ProjectDb>,
    broadcaster: Arc<ChangeBroadcaster>,
    config: CollaborationConfig,
}

impl CollaborationService {
    pub fn new(db: Arc<ProjectDb>, config: CollaborationConfig) -> Self {
        let broadcaster = Arc::new(ChangeBroadcaster::new(config.broadcast_capacity));
        Self::with_broadcaster(db, broadcaster, config)
    }

    pub fn with_broadcaster(
        db: Arc<ProjectDb>,
        broadcaster: Arc<ChangeBroadcaster>,
        config: CollaborationConfig,
    ) -> Self {
        Self {
            db,
            broadcaster,
            config,
        }
    }

    pub fn broadcaster(&self) -> &Arc<ChangeBroadcaster> {
        &self.broadcaster
    }

    pub fn subscribe(&self, scope: Scope) -> Subscription {
        self.broadcaster.subscribe(scope)
    }

    fn publish(&self, event: ChangeEvent) {
        let reached = self.broadcaster.publish_event(&event);
        debug!(
            "Published {:?} {} {} to {} subscribers",
            event.kind, event.entity, event.entity_id, reached
        );
    }

    // Projects

    pub fn create_project(&self, actor: &Actor, meta: ProjectMeta) -> Result<Project> {
        validate_meta(&meta)?;
        let project = self
            .db
            .with_store(|store| store.insert_project(actor.id, &meta))?;
        info!("User {} created project {}", actor.id, project.id);
        self.publish(ChangeEvent::project_added(&project, actor.id));
        Ok(project)
    }

    pub fn get_project(&self, id: ProjectId) -> Result<Project> {
        Ok(self.db.with_store(|store| store.get_project(id))?)
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.db.with_store(|store| store.list_projects())?)
    }

    pub fn search_projects(&self, query: &str) -> Result<Vec<Project>> {
        Ok(self.db.with_store(|store| store.search_projects(query))?)
    }

    pub fn update_project(
        &self,
        actor: &Actor,
        id: ProjectId,
        meta: ProjectMeta,
    ) -> Result<Project> {
        validate_meta(&meta)?;
        let project = self.db.with_store(|store| {
            store.update_project_meta(id, &meta)?;
            store.get_project(id)
        })?;
        self.publish(ChangeEvent::project_modified(&project, actor.id));
        Ok(project)
    }

    /// Tracks and versions go with the project; its topics are closed
    pub fn delete_project(&self, actor: &Actor, id: ProjectId) -> Result<()> {
        let project = self.db.with_transaction(|store| {
            let project = store.get_project(id)?;
            store.delete_project(id)?;
            Ok::<_, CollaborationError>(project)
        })?;
        info!("User {} deleted project {}", actor.id, id);

        self.publish(ChangeEvent::project_deleted(id, actor.id));
        for track in &project.tracks {
            self.broadcaster.close(Scope::Track(track.id));
        }
        self.broadcaster.close(Scope::Project(id));
        Ok(())
    }

    // Tracks

    pub fn create_track(
        &self,
        actor: &Actor,
        project_id: ProjectId,
        payload: TrackPayload,
    ) -> Result<Track> {
        let track = self
            .db
            .with_store(|store| ConcurrencyGuard::new(store).create_track(project_id, &payload))?;
        self.publish(ChangeEvent::track_added(&track, actor.id));
        Ok(track)
    }

    pub fn get_track(&self, project_id: ProjectId, track_id: TrackId) -> Result<Track> {
        let track = self.db.with_store(|store| store.get_track(track_id))?;
        if track.project_id != project_id {
            return Err(CollaborationError::not_found(EntityKind::Track, track_id));
        }
        Ok(track)
    }

    pub fn list_tracks(&self, project_id: ProjectId) -> Result<Vec<Track>> {
        let project = self.get_project(project_id)?;
        Ok(project.tracks)
    }

    /// Fails with `ConcurrentEdit` unless `expected` is the stored revision
    pub fn update_track(
        &self,
        actor: &Actor,
        project_id: ProjectId,
        track_id: TrackId,
        expected: Revision,
        payload: TrackPayload,
    ) -> Result<Track> {
        let track = self.db.with_store(|store| {
            ConcurrencyGuard::new(store).update_track(project_id, track_id, expected, &payload)
        })?;
        self.publish(ChangeEvent::track_modified(&track, actor.id));
        Ok(track)
    }

    pub fn delete_track(
        &self,
        actor: &Actor,
        project_id: ProjectId,
        track_id: TrackId,
        expected: Revision,
    ) -> Result<()> {
        self.db.with_store(|store| {
            ConcurrencyGuard::new(store).delete_track(project_id, track_id, expected)
        })?;
        self.publish(ChangeEvent::track_deleted(project_id, track_id, actor.id));
        self.broadcaster.close(Scope::Track(track_id));
        Ok(())
    }

    // Versions

    /// Checkpoints the current state of the project
    pub fn save_version(
        &self,
        actor: &Actor,
        project_id: ProjectId,
        description: Option<&str>,
    ) -> Result<ProjectVersion> {
        let description = description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(self.config.default_version_description.as_str());

        let version = self.db.with_store(|store| {
            let project = store.get_project(project_id)?;
            SnapshotManager::new(store).create_snapshot(&project, actor, Some(description))
        })?;
        self.publish(ChangeEvent::version_added(&version, actor.id));
        Ok(version)
    }

    /// Most recent first
    pub fn versions_for_project(&self, project_id: ProjectId) -> Result<Vec<ProjectVersion>> {
        self.db.with_store(|store| {
            // distinguishes a missing project from one with no versions
            store.get_project(project_id)?;
            SnapshotManager::new(store).versions_for_project(project_id)
        })
    }

    /// Restores the project to `version_id` in one transaction.
    ///
    /// No snapshot of the pre-revert state is taken; call [`Self::save_version`]
    /// first to keep one.
    pub fn revert_to_version(
        &self,
        actor: &Actor,
        project_id: ProjectId,
        version_id: VersionId,
    ) -> Result<Project> {
        let report = self.db.with_transaction(|store| {
            RevertEngine::new(store).revert_to_version(project_id, version_id, actor)
        })?;

        for event in report.events(actor.id) {
            self.publish(event);
        }
        for track in &report.deleted {
            self.broadcaster.close(Scope::Track(track.id));
        }
        Ok(report.project)
    }

    // Collaborators

    /// Fails with `AlreadyExists` if the user already collaborates on the project
    pub fn add_collaborator(
        &self,
        actor: &Actor,
        project_id: ProjectId,
        user_id: UserId,
        role: &str,
    ) -> Result<Collaborator> {
        let role = role.trim();
        if role.is_empty() {
            return Err(CollaborationError::Validation(
                "collaborator role must not be blank".into(),
            ));
        }
        let collaborator = self
            .db
            .with_store(|store| store.add_collaborator(project_id, user_id, role))?;
        info!(
            "User {} added {} to project {} as {}",
            actor.id, user_id, project_id, collaborator.role
        );
        self.publish(ChangeEvent::collaborator_added(&collaborator, actor.id));
        Ok(collaborator)
    }

    pub fn remove_collaborator(
        &self,
        actor: &Actor,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<Collaborator> {
        let collaborator = self
            .db
            .with_store(|store| store.remove_collaborator(project_id, user_id))?;
        info!(
            "User {} removed {} from project {}",
            actor.id, user_id, project_id
        );
        self.publish(ChangeEvent::collaborator_removed(&collaborator, actor.id));
        Ok(collaborator)
    }

    /// `NotFound` when the user is not a collaborator on the project
    pub fn get_collaborator(&self, project_id: ProjectId, user_id: UserId) -> Result<Collaborator> {
        Ok(self
            .db
            .with_store(|store| store.get_collaborator(project_id, user_id))?)
    }

    pub fn collaborators(&self, project_id: ProjectId) -> Result<Vec<Collaborator>> {
        self.db.with_store(|store| {
            store.get_project(project_id)?;
            Ok(store.list_collaborators(project_id)?)
        })
    }
}

pub fn validate_meta(meta: &ProjectMeta) -> Result<()> {
    if meta.title.trim().is_empty() {
        return Err(CollaborationError::Validation(
            "project title must not be blank".into(),
        ));
    }
    if let Some(tempo) = meta.tempo {
        if tempo == 0 || tempo > MAX_TEMPO {
            return Err(CollaborationError::Validation(format!(
                "tempo must be between 1 and {} BPM, got {}",
                MAX_TEMPO, tempo
            )));
        }
    }
    Ok(())
}
