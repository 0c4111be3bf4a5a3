/// Records held by the entity and snapshot stores
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

record_id!(
    /// Store-assigned project identity
    ProjectId
);
record_id!(
    /// Store-assigned track identity
    TrackId
);
record_id!(
    /// Store-assigned snapshot identity
    VersionId
);
record_id!(
    /// Identity of a user acting on the store
    UserId
);

/// Revision stamp used for optimistic concurrency on tracks.
///
/// The store assigns `Revision::INITIAL` on insert and increments the stamp
/// by one on every successful conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(pub i64);

impl Revision {
    pub const INITIAL: Revision = Revision(1);

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Kinds of records addressable by id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    Track,
    Version,
    Collaborator,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Project => "project",
            EntityKind::Track => "track",
            EntityKind::Version => "project version",
            EntityKind::Collaborator => "collaborator",
        };
        f.write_str(name)
    }
}

/// Scalar project metadata
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectMeta {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    /// Beats per minute
    #[serde(default)]
    pub tempo: Option<u32>,
}

impl ProjectMeta {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }

    pub fn with_tempo(mut self, tempo: u32) -> Self {
        self.tempo = Some(tempo);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A project together with the tracks it owns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub owner_id: UserId,
    #[serde(flatten)]
    pub meta: ProjectMeta,
    /// Ordered by ascending track id
    pub tracks: Vec<Track>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Mutable fields of a track
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackPayload {
    pub instrument: String,
    /// Opaque serialized note sequence
    #[serde(default)]
    pub musical_sequence: String,
}

impl TrackPayload {
    pub fn new(instrument: impl Into<String>, musical_sequence: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            musical_sequence: musical_sequence.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    /// Owning project, used for lookups only
    pub project_id: ProjectId,
    #[serde(flatten)]
    pub payload: TrackPayload,
    pub revision: Revision,
    pub updated_at: DateTime<Utc>,
}

/// A user's membership in a project, with a free-form role such as "producer"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collaborator {
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub role: String,
    pub added_at: DateTime<Utc>,
}

/// Snapshot about to be appended; the store assigns id and timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVersion {
    pub project_id: ProjectId,
    pub saved_by: UserId,
    pub description: Option<String>,
    pub snapshot_data: String,
}

/// Immutable, timestamped copy of a project's full state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectVersion {
    pub id: VersionId,
    pub project_id: ProjectId,
    pub created_at: DateTime<Utc>,
    pub snapshot_data: String,
    pub saved_by: UserId,
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&TrackId(42)).unwrap();
        assert_eq!(json, "42");

        let id: ProjectId = serde_json::from_str("7").unwrap();
        assert_eq!(id, ProjectId(7));
    }

    #[test]
    fn test_track_payload_flattens() {
        let track = Track {
            id: TrackId(3),
            project_id: ProjectId(1),
            payload: TrackPayload::new("Piano", "[60,64,67]"),
            revision: Revision::INITIAL,
            updated_at: Utc::now(),
        };

        let value = serde_json::to_value(&track).unwrap();
        assert_eq!(value["instrument"], "Piano");
        assert_eq!(value["musical_sequence"], "[60,64,67]");
        assert_eq!(value["revision"], 1);
    }

    #[test]
    fn test_revision_next() {
        assert_eq!(Revision::INITIAL.next(), Revision(2));
        assert_eq!(Revision(9).to_string(), "r9");
    }
}
