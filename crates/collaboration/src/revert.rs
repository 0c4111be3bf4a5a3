/// Reconciling a live project against a stored snapshot by track identity
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::{
    Actor, ChangeEvent, ConcurrencyGuard, EntityStore, Project, ProjectId, Result,
    SnapshotManager, SnapshotStore, SnapshotTrack, Track, TrackId, TrackPayload, UserId,
    VersionId,
};

/// Writes needed to turn the live track set into the target set.
///
/// A target track whose id matches a live track is always an update, never a
/// delete followed by a create. Target tracks without an id, or with an id no
/// longer live, become creates and receive fresh ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    pub deletes: Vec<Track>,
    /// Live track paired with the payload it must take
    pub updates: Vec<(Track, TrackPayload)>,
    pub creates: Vec<TrackPayload>,
    /// Matched tracks whose payload already equals the target
    pub unchanged: Vec<TrackId>,
}

impl ReconcilePlan {
    pub fn compute(live: &[Track], target: &[SnapshotTrack]) -> Self {
        let existing_by_id: HashMap<TrackId, &Track> = live.iter().map(|t| (t.id, t)).collect();
        let target_ids: HashSet<TrackId> = target.iter().filter_map(|t| t.id).collect();

        let mut plan = ReconcilePlan {
            deletes: live
                .iter()
                .filter(|t| !target_ids.contains(&t.id))
                .cloned()
                .collect(),
            ..Default::default()
        };

        for wanted in target {
            match wanted.id.and_then(|id| existing_by_id.get(&id)) {
                Some(current) if current.payload == wanted.payload => {
                    plan.unchanged.push(current.id)
                }
                Some(current) => plan
                    .updates
                    .push(((*current).clone(), wanted.payload.clone())),
                None => plan.creates.push(wanted.payload.clone()),
            }
        }

        plan
    }

    pub fn is_noop(&self) -> bool {
        self.deletes.is_empty() && self.updates.is_empty() && self.creates.is_empty()
    }
}

/// Outcome of a revert, carrying what changed so callers can notify
#[derive(Debug, Clone)]
pub struct RevertReport {
    pub project: Project,
    pub version_id: VersionId,
    pub deleted: Vec<Track>,
    pub updated: Vec<Track>,
    pub created: Vec<Track>,
}

impl RevertReport {
    /// The events the same changes would emit as individual edits, followed by
    /// the project metadata change
    pub fn events(&self, actor_id: UserId) -> Vec<ChangeEvent> {
        let project_id = self.project.id;
        let mut events: Vec<ChangeEvent> = self
            .deleted
            .iter()
            .map(|t| ChangeEvent::track_deleted(project_id, t.id, actor_id))
            .collect();
        events.extend(
            self.updated
                .iter()
                .map(|t| ChangeEvent::track_modified(t, actor_id)),
        );
        events.extend(
            self.created
                .iter()
                .map(|t| ChangeEvent::track_added(t, actor_id)),
        );
        events.push(ChangeEvent::project_modified(&self.project, actor_id));
        events
    }
}

pub struct RevertEngine<'s, S: EntityStore + SnapshotStore + ?Sized> {
    store: &'s S,
}

impl<'s, S: EntityStore + SnapshotStore + ?Sized> RevertEngine<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// Brings the project back to the state captured in `version_id`.
    ///
    /// Deletes are applied first, then updates and creates, then metadata.
    /// Every track write goes through the concurrency guard with the stamp
    /// read at load time, so an edit landing mid-revert fails the revert
    /// rather than being overwritten. Callers wanting all-or-nothing run this
    /// inside a store transaction.
    pub fn revert_to_version(
        &self,
        project_id: ProjectId,
        version_id: VersionId,
        actor: &Actor,
    ) -> Result<RevertReport> {
        let live = self.store.get_project(project_id)?;
        let (_, target) = SnapshotManager::new(self.store).load(project_id, version_id)?;

        let plan = ReconcilePlan::compute(&live.tracks, &target.tracks);
        if plan.is_noop() {
            debug!("Tracks of project {} already match version {}", project_id, version_id);
        } else {
            debug!(
                "Revert plan for project {}: {} deletes, {} updates, {} creates, {} unchanged",
                project_id,
                plan.deletes.len(),
                plan.updates.len(),
                plan.creates.len(),
                plan.unchanged.len()
            );
        }

        let guard = ConcurrencyGuard::new(self.store);

        let mut deleted = Vec::with_capacity(plan.deletes.len());
        for track in &plan.deletes {
            deleted.push(guard.delete_track(project_id, track.id, track.revision)?);
        }

        let mut updated = Vec::with_capacity(plan.updates.len());
        for (track, payload) in &plan.updates {
            updated.push(guard.update_track(project_id, track.id, track.revision, payload)?);
        }

        let mut created = Vec::with_capacity(plan.creates.len());
        for payload in &plan.creates {
            created.push(guard.create_track(project_id, payload)?);
        }

        self.store.update_project_meta(project_id, &target.meta)?;
        let project = self.store.get_project(project_id)?;

        info!(
            "User {} reverted project {} to version {}",
            actor.id, project_id, version_id
        );
        Ok(RevertReport {
            project,
            version_id,
            deleted,
            updated,
            created,
        })
    }
}
