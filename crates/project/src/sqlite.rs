use chrono::{DateTime, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::store::{EntityStore, Result, SnapshotStore, StoreError};
use crate::{
    Collaborator, EntityKind, NewVersion, Project, ProjectId, ProjectMeta, ProjectVersion, Revision, Track,
    TrackId, TrackPayload, UserId, VersionId,
};

const PROJECT_COLUMNS: &str =
    "id, owner_id, title, description, genre, tempo, created_at, updated_at";
const TRACK_COLUMNS: &str = "id, project_id, instrument, musical_sequence, revision, updated_at";
const VERSION_COLUMNS: &str = "id, project_id, created_at, snapshot_data, saved_by, description";
const COLLABORATOR_COLUMNS: &str = "project_id, user_id, role, added_at";

/// Registers `fold_case(text)`, the Unicode lowercase search compares with.
///
/// SQLite's own `lower()` and `LIKE` only fold ASCII letters.
pub(crate) fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "fold_case",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| Ok(ctx.get::<Option<String>>(0)?.map(|text| text.to_lowercase())),
    )
}

/// Store operations over a borrowed SQLite connection or transaction
pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn project_exists(&self, id: ProjectId) -> Result<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM projects WHERE id = ?1", params![id.0], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    fn stored_revision(&self, id: TrackId) -> Result<Option<Revision>> {
        let revision = self
            .conn
            .query_row(
                "SELECT revision FROM tracks WHERE id = ?1",
                params![id.0],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(revision.map(Revision))
    }

    fn stale(&self, id: TrackId, expected: Revision) -> Result<StoreError> {
        Ok(StoreError::StaleRevision {
            id,
            expected,
            stored: self.stored_revision(id)?,
        })
    }

    fn attach_tracks(&self, mut project: Project) -> Result<Project> {
        project.tracks = self.list_tracks(project.id)?;
        Ok(project)
    }

    fn query_projects(&self, sql: &str, pattern: Option<&str>) -> Result<Vec<Project>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = match pattern {
            Some(p) => stmt.query_map(params![p], project_from_row)?,
            None => stmt.query_map([], project_from_row)?,
        };
        let mut projects = Vec::new();
        for row in rows {
            projects.push(self.attach_tracks(row?)?);
        }
        Ok(projects)
    }
}

impl EntityStore for SqliteStore<'_> {
    fn get_project(&self, id: ProjectId) -> Result<Project> {
        let project = self
            .conn
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
                params![id.0],
                project_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found(EntityKind::Project, id))?;
        self.attach_tracks(project)
    }

    fn list_projects(&self) -> Result<Vec<Project>> {
        self.query_projects(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects ORDER BY id"),
            None,
        )
    }

    fn search_projects(&self, query: &str) -> Result<Vec<Project>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let pattern = format!("%{}%", escape_like(&query.to_lowercase()));
        self.query_projects(
            &format!(
                "SELECT {PROJECT_COLUMNS} FROM projects
                 WHERE fold_case(title) LIKE ?1 ESCAPE '\\'
                    OR fold_case(description) LIKE ?1 ESCAPE '\\'
                    OR fold_case(genre) LIKE ?1 ESCAPE '\\'
                 ORDER BY id"
            ),
            Some(&pattern),
        )
    }

    fn insert_project(&self, owner: UserId, meta: &ProjectMeta) -> Result<Project> {
        let now = now_micros();
        self.conn.execute(
            "INSERT INTO projects(owner_id, title, description, genre, tempo, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![owner.0, meta.title, meta.description, meta.genre, meta.tempo, now],
        )?;
        self.get_project(ProjectId(self.conn.last_insert_rowid()))
    }

    fn update_project_meta(&self, id: ProjectId, meta: &ProjectMeta) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE projects SET title = ?2, description = ?3, genre = ?4, tempo = ?5, updated_at = ?6
             WHERE id = ?1",
            params![id.0, meta.title, meta.description, meta.genre, meta.tempo, now_micros()],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found(EntityKind::Project, id));
        }
        Ok(())
    }

    fn delete_project(&self, id: ProjectId) -> Result<()> {
        // tracks and project_versions go with it through ON DELETE CASCADE
        let changed = self
            .conn
            .execute("DELETE FROM projects WHERE id = ?1", params![id.0])?;
        if changed == 0 {
            return Err(StoreError::not_found(EntityKind::Project, id));
        }
        Ok(())
    }

    fn get_track(&self, id: TrackId) -> Result<Track> {
        self.conn
            .query_row(
                &format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE id = ?1"),
                params![id.0],
                track_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found(EntityKind::Track, id))
    }

    fn list_tracks(&self, project_id: ProjectId) -> Result<Vec<Track>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TRACK_COLUMNS} FROM tracks WHERE project_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![project_id.0], track_from_row)?;
        let mut tracks = Vec::new();
        for row in rows {
            tracks.push(row?);
        }
        Ok(tracks)
    }

    fn insert_track(&self, project_id: ProjectId, payload: &TrackPayload) -> Result<Track> {
        if !self.project_exists(project_id)? {
            return Err(StoreError::not_found(EntityKind::Project, project_id));
        }
        self.conn.execute(
            "INSERT INTO tracks(project_id, instrument, musical_sequence, revision, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5)",
            params![
                project_id.0,
                payload.instrument,
                payload.musical_sequence,
                Revision::INITIAL.0,
                now_micros()
            ],
        )?;
        self.get_track(TrackId(self.conn.last_insert_rowid()))
    }

    fn update_track(
        &self,
        id: TrackId,
        expected: Revision,
        payload: &TrackPayload,
    ) -> Result<Track> {
        let changed = self.conn.execute(
            "UPDATE tracks
             SET instrument = ?3, musical_sequence = ?4, revision = revision + 1, updated_at = ?5
             WHERE id = ?1 AND revision = ?2",
            params![
                id.0,
                expected.0,
                payload.instrument,
                payload.musical_sequence,
                now_micros()
            ],
        )?;
        if changed == 0 {
            return Err(self.stale(id, expected)?);
        }
        self.get_track(id)
    }

    fn delete_track(&self, id: TrackId, expected: Revision) -> Result<()> {
        let changed = self.conn.execute(
            "DELETE FROM tracks WHERE id = ?1 AND revision = ?2",
            params![id.0, expected.0],
        )?;
        if changed == 0 {
            return Err(self.stale(id, expected)?);
        }
        Ok(())
    }

    fn add_collaborator(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        role: &str,
    ) -> Result<Collaborator> {
        if !self.project_exists(project_id)? {
            return Err(StoreError::not_found(EntityKind::Project, project_id));
        }
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO collaborators(project_id, user_id, role, added_at)
             VALUES(?1, ?2, ?3, ?4)",
            params![project_id.0, user_id.0, role, now_micros()],
        )?;
        if inserted == 0 {
            return Err(StoreError::Duplicate {
                kind: EntityKind::Collaborator,
                id: user_id.0,
            });
        }
        self.get_collaborator(project_id, user_id)
    }

    fn get_collaborator(&self, project_id: ProjectId, user_id: UserId) -> Result<Collaborator> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {COLLABORATOR_COLUMNS} FROM collaborators
                     WHERE project_id = ?1 AND user_id = ?2"
                ),
                params![project_id.0, user_id.0],
                collaborator_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found(EntityKind::Collaborator, user_id))
    }

    fn remove_collaborator(&self, project_id: ProjectId, user_id: UserId) -> Result<Collaborator> {
        let collaborator = self.get_collaborator(project_id, user_id)?;
        self.conn.execute(
            "DELETE FROM collaborators WHERE project_id = ?1 AND user_id = ?2",
            params![project_id.0, user_id.0],
        )?;
        Ok(collaborator)
    }

    fn list_collaborators(&self, project_id: ProjectId) -> Result<Vec<Collaborator>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLLABORATOR_COLUMNS} FROM collaborators
             WHERE project_id = ?1
             ORDER BY added_at, user_id"
        ))?;
        let rows = stmt.query_map(params![project_id.0], collaborator_from_row)?;
        let mut collaborators = Vec::new();
        for row in rows {
            collaborators.push(row?);
        }
        Ok(collaborators)
    }
}

impl SnapshotStore for SqliteStore<'_> {
    fn append_version(&self, version: &NewVersion) -> Result<ProjectVersion> {
        if !self.project_exists(version.project_id)? {
            return Err(StoreError::not_found(
                EntityKind::Project,
                version.project_id,
            ));
        }
        self.conn.execute(
            "INSERT INTO project_versions(project_id, created_at, snapshot_data, saved_by, description)
             VALUES(?1, ?2, ?3, ?4, ?5)",
            params![
                version.project_id.0,
                now_micros(),
                version.snapshot_data,
                version.saved_by.0,
                version.description
            ],
        )?;
        self.get_version(VersionId(self.conn.last_insert_rowid()))
    }

    fn get_version(&self, id: VersionId) -> Result<ProjectVersion> {
        self.conn
            .query_row(
                &format!("SELECT {VERSION_COLUMNS} FROM project_versions WHERE id = ?1"),
                params![id.0],
                version_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found(EntityKind::Version, id))
    }

    fn list_versions(&self, project_id: ProjectId) -> Result<Vec<ProjectVersion>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {VERSION_COLUMNS} FROM project_versions
             WHERE project_id = ?1
             ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map(params![project_id.0], version_from_row)?;
        let mut versions = Vec::new();
        for row in rows {
            versions.push(row?);
        }
        Ok(versions)
    }
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: ProjectId(row.get(0)?),
        owner_id: UserId(row.get(1)?),
        meta: ProjectMeta {
            title: row.get(2)?,
            description: row.get(3)?,
            genre: row.get(4)?,
            tempo: row.get(5)?,
        },
        tracks: Vec::new(),
        created_at: micros_to_utc(6, row.get(6)?)?,
        updated_at: micros_to_utc(7, row.get(7)?)?,
    })
}

fn track_from_row(row: &Row<'_>) -> rusqlite::Result<Track> {
    Ok(Track {
        id: TrackId(row.get(0)?),
        project_id: ProjectId(row.get(1)?),
        payload: TrackPayload {
            instrument: row.get(2)?,
            musical_sequence: row.get(3)?,
        },
        revision: Revision(row.get(4)?),
        updated_at: micros_to_utc(5, row.get(5)?)?,
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<ProjectVersion> {
    Ok(ProjectVersion {
        id: VersionId(row.get(0)?),
        project_id: ProjectId(row.get(1)?),
        created_at: micros_to_utc(2, row.get(2)?)?,
        snapshot_data: row.get(3)?,
        saved_by: UserId(row.get(4)?),
        description: row.get(5)?,
    })
}

fn collaborator_from_row(row: &Row<'_>) -> rusqlite::Result<Collaborator> {
    Ok(Collaborator {
        project_id: ProjectId(row.get(0)?),
        user_id: UserId(row.get(1)?),
        role: row.get(2)?,
        added_at: micros_to_utc(3, row.get(3)?)?,
    })
}

fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

fn micros_to_utc(idx: usize, micros: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, micros))
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
