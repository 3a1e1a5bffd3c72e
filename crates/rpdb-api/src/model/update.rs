// Versioned change sets delivered by the socket or the update endpoint.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::entry::Entry;
use super::attribute::Attribute;
use super::time::DateTime;

/// All changes that occurred since a known version of the data.
///
/// Carries the server's current version marker and one change bucket
/// per entity set. An update without any version information represents
/// "something changed, but no delta is available" (sent to observers
/// after a full reload).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Update {
    /// Current version number of the data.
    pub version: i64,

    /// Instant the last change was made.
    pub version_date: DateTime,

    /// Changed entries.
    pub entry: UpdateData<Entry>,

    /// Changed attributes.
    pub attribute: UpdateData<Attribute>,
}

impl Update {
    /// Build a local delta for entry changes, stamped with the current
    /// wall clock.
    pub fn with_entries(deleted: Vec<i64>, updated: Vec<Entry>, created: Vec<Entry>) -> Self {
        Update {
            version_date: DateTime::now(),
            entry: UpdateData {
                deleted,
                updated,
                created,
                ..UpdateData::default()
            },
            ..Update::default()
        }
    }

    /// Whether this update carries no version information. For observer
    /// deliveries this means "treat everything as changed".
    pub fn is_zero(&self) -> bool {
        self.version == 0 && !self.version_date.is_set()
    }
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[version {} from {}]",
            self.version,
            self.version_date.format_pretty()
        )?;
        if self.entry.is_update() {
            write!(f, " entries: {}", self.entry)?;
        }
        if self.attribute.is_update() {
            write!(f, " attributes: {}", self.attribute)?;
        }
        Ok(())
    }
}

/// The objects of one entity set that were deleted, updated or created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateData<T> {
    /// Unique ids of the deleted objects.
    pub deleted: Vec<i64>,

    /// Snapshots of deleted entries for the delete hook. Sent even for
    /// deletions this client requested itself, since the data is
    /// usually gone locally by then. Only the id, dates, parameters and
    /// attribute id are reliable on these.
    #[serde(rename = "deletedPre")]
    pub deleted_pre: Vec<T>,

    /// Updated objects with their new data.
    pub updated: Vec<T>,

    /// Created objects.
    pub created: Vec<T>,
}

// A manual impl: deriving `Default` would needlessly bound `T: Default`.
impl<T> Default for UpdateData<T> {
    fn default() -> Self {
        UpdateData {
            deleted: Vec::new(),
            deleted_pre: Vec::new(),
            updated: Vec::new(),
            created: Vec::new(),
        }
    }
}

impl<T> UpdateData<T> {
    /// Whether this entity set was changed at all.
    pub fn is_update(&self) -> bool {
        !self.created.is_empty() || !self.deleted.is_empty() || !self.updated.is_empty()
    }
}

impl<T> fmt::Display for UpdateData<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} deleted | {} updated | {} created",
            self.deleted.len(),
            self.updated.len(),
            self.created.len()
        )
    }
}

/// Query parameters for the update endpoint.
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    /// The latest version number this client knows. Only later changes
    /// are returned.
    pub latest_version: i64,

    /// Changes must additionally be newer than this instant.
    pub later_than: DateTime,

    /// Upper version bound (0 = unbounded).
    pub max_version: i64,

    /// Only return the current version marker, without the change data.
    pub only_version: bool,
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_update() {
        let json = r#"{
            "version": 42,
            "version_date": "2030-01-01T10:00:00",
            "entry": {
                "deleted": [7],
                "updated": [],
                "created": [{ "id": 9, "attribute": { "id": 1 } }]
            },
            "attribute": { "deleted": [], "updated": [], "created": [] }
        }"#;

        let update: Update = serde_json::from_str(json).unwrap();
        assert_eq!(update.version, 42);
        assert!(update.entry.is_update());
        assert!(!update.attribute.is_update());
        assert_eq!(update.entry.created[0].attribute.id(), 1);
        assert!(!update.is_zero());
    }

    #[test]
    fn empty_update_is_zero() {
        let update = Update::default();
        assert!(update.is_zero());
        assert!(!update.entry.is_update());
    }

    #[test]
    fn local_delta_is_stamped() {
        let update = Update::with_entries(vec![3], vec![], vec![]);
        assert!(update.version_date.is_set());
        assert_eq!(update.entry.deleted, vec![3]);
        assert!(!update.is_zero());
    }
}
