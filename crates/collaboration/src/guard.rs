/// Optimistic compare-and-swap on track writes
use tracing::{debug, warn};

use crate::{
    CollaborationError, EntityKind, EntityStore, ProjectId, Result, Revision, Track, TrackId,
    TrackPayload,
};

/// Every track mutation passes through here, including the writes made while
/// reverting.
///
/// The guard never retries and never locks across calls. A writer presents the
/// revision it last observed; the stored stamp must still match or the write is
/// rejected with [`CollaborationError::ConcurrentEdit`] and nothing changes.
/// The store repeats the stamp check inside the write statement, so two writers
/// racing past the read still cannot both succeed.
pub struct ConcurrencyGuard<'s, S: EntityStore + ?Sized> {
    store: &'s S,
}

impl<'s, S: EntityStore + ?Sized> ConcurrencyGuard<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// Creation presents no stamp; the store assigns [`Revision::INITIAL`]
    pub fn create_track(&self, project_id: ProjectId, payload: &TrackPayload) -> Result<Track> {
        validate_payload(payload)?;
        let track = self.store.insert_track(project_id, payload)?;
        debug!("Created track {} in project {}", track.id, project_id);
        Ok(track)
    }

    pub fn update_track(
        &self,
        project_id: ProjectId,
        track_id: TrackId,
        expected: Revision,
        payload: &TrackPayload,
    ) -> Result<Track> {
        validate_payload(payload)?;
        let current = self.owned_track(project_id, track_id)?;
        check_revision(&current, expected)?;

        let track = self
            .store
            .update_track(track_id, expected, payload)
            .map_err(|e| log_stale(e.into()))?;
        debug!("Track {} now at {}", track.id, track.revision);
        Ok(track)
    }

    /// Returns the track as it was just before removal
    pub fn delete_track(
        &self,
        project_id: ProjectId,
        track_id: TrackId,
        expected: Revision,
    ) -> Result<Track> {
        let current = self.owned_track(project_id, track_id)?;
        check_revision(&current, expected)?;

        self.store
            .delete_track(track_id, expected)
            .map_err(|e| log_stale(e.into()))?;
        debug!("Deleted track {} from project {}", track_id, project_id);
        Ok(current)
    }

    /// A track filed under another project is reported as missing
    fn owned_track(&self, project_id: ProjectId, track_id: TrackId) -> Result<Track> {
        let track = self.store.get_track(track_id)?;
        if track.project_id != project_id {
            return Err(CollaborationError::not_found(EntityKind::Track, track_id));
        }
        Ok(track)
    }
}

pub fn validate_payload(payload: &TrackPayload) -> Result<()> {
    if payload.instrument.trim().is_empty() {
        return Err(CollaborationError::Validation(
            "track instrument must not be blank".into(),
        ));
    }
    Ok(())
}

fn check_revision(current: &Track, expected: Revision) -> Result<()> {
    if current.revision == expected {
        return Ok(());
    }
    Err(log_stale(CollaborationError::ConcurrentEdit {
        track_id: current.id,
        expected,
        stored: Some(current.revision),
    }))
}

fn log_stale(err: CollaborationError) -> CollaborationError {
    if let CollaborationError::ConcurrentEdit {
        track_id,
        expected,
        stored,
    } = &err
    {
        warn!(
            "Rejected stale write to track {}: presented {}, stored {:?}",
            track_id, expected, stored
        );
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ProjectDb, ProjectMeta, UserId};

    fn seeded() -> (ProjectDb, ProjectId) {
        let db = ProjectDb::open_in_memory().unwrap();
        let project = db
            .with_store(|s| s.insert_project(UserId(1), &ProjectMeta::new("Session")))
            .unwrap();
        (db, project.id)
    }

    #[test]
    fn test_update_with_current_revision() {
        let (db, project_id) = seeded();

        db.with_store(|store| {
            let guard = ConcurrencyGuard::new(store);
            let track = guard
                .create_track(project_id, &TrackPayload::new("Bass", "[]"))
                .unwrap();
            assert_eq!(track.revision, Revision::INITIAL);

            let updated = guard
                .update_track(
                    project_id,
                    track.id,
                    track.revision,
                    &TrackPayload::new("Bass", "[40]"),
                )
                .unwrap();
            assert_eq!(updated.revision, Revision(2));
            assert_eq!(updated.payload.musical_sequence, "[40]");
            Ok::<_, CollaborationError>(())
        })
        .unwrap();
    }

    #[test]
    fn test_stale_revision_rejected_without_change() {
        let (db, project_id) = seeded();

        db.with_store(|store| {
            let guard = ConcurrencyGuard::new(store);
            let track = guard
                .create_track(project_id, &TrackPayload::new("Drums", "[1]"))
                .unwrap();
            guard
                .update_track(project_id, track.id, track.revision, &TrackPayload::new("Drums", "[2]"))
                .unwrap();

            let err = guard
                .update_track(project_id, track.id, track.revision, &TrackPayload::new("Drums", "[3]"))
                .unwrap_err();
            assert!(matches!(
                err,
                CollaborationError::ConcurrentEdit {
                    stored: Some(Revision(2)),
                    ..
                }
            ));
            assert!(err.is_retryable());

            let stored = store.get_track(track.id).unwrap();
            assert_eq!(stored.payload.musical_sequence, "[2]");
            assert_eq!(stored.revision, Revision(2));
            Ok::<_, CollaborationError>(())
        })
        .unwrap();
    }

    #[test]
    fn test_delete_requires_current_revision() {
        let (db, project_id) = seeded();

        db.with_store(|store| {
            let guard = ConcurrencyGuard::new(store);
            let track = guard
                .create_track(project_id, &TrackPayload::new("Keys", ""))
                .unwrap();

            let err = guard
                .delete_track(project_id, track.id, Revision(7))
                .unwrap_err();
            assert!(matches!(err, CollaborationError::ConcurrentEdit { .. }));

            let removed = guard
                .delete_track(project_id, track.id, track.revision)
                .unwrap();
            assert_eq!(removed.id, track.id);
            assert!(matches!(
                store.get_track(track.id),
                Err(crate::StoreError::NotFound { .. })
            ));
            Ok::<_, CollaborationError>(())
        })
        .unwrap();
    }

    #[test]
    fn test_track_from_other_project_is_not_found() {
        let (db, project_id) = seeded();

        db.with_store(|store| {
            let other = store
                .insert_project(UserId(2), &ProjectMeta::new("Other"))
                .unwrap();
            let guard = ConcurrencyGuard::new(store);
            let track = guard
                .create_track(other.id, &TrackPayload::new("Synth", ""))
                .unwrap();

            let err = guard
                .update_track(project_id, track.id, track.revision, &TrackPayload::new("Synth", "[1]"))
                .unwrap_err();
            assert!(matches!(
                err,
                CollaborationError::NotFound {
                    kind: EntityKind::Track,
                    ..
                }
            ));
            Ok::<_, CollaborationError>(())
        })
        .unwrap();
    }

    #[test]
    fn test_blank_instrument_rejected_before_store() {
        let (db, project_id) = seeded();

        db.with_store(|store| {
            let guard = ConcurrencyGuard::new(store);
            let err = guard
                .create_track(project_id, &TrackPayload::new("   ", "[]"))
                .unwrap_err();
            assert!(matches!(err, CollaborationError::Validation(_)));
            assert!(store.list_tracks(project_id).unwrap().is_empty());
            Ok::<_, CollaborationError>(())
        })
        .unwrap();
    }

    #[test]
    fn test_create_in_missing_project() {
        let (db, _) = seeded();

        db.with_store(|store| {
            let guard = ConcurrencyGuard::new(store);
            let err = guard
                .create_track(ProjectId(404), &TrackPayload::new("Horn", ""))
                .unwrap_err();
            assert!(matches!(
                err,
                CollaborationError::NotFound {
                    kind: EntityKind::Project,
                    id: 404
                }
            ));
            Ok::<_, CollaborationError>(())
        })
        .unwrap();
    }
}
