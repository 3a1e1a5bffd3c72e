// Local mirror of the entry set.

use std::sync::{Arc, RwLock};

use rpdb_api::model::{Entry, EntryFilter, UpdateData};
use tracing::error;

use super::{read_lock, write_lock, AttributeStore};

/// Owner of all locally cached entries, kept sorted ascending by
/// `date_time` (stable for equal instants).
///
/// Readers receive shared snapshots; apart from the execution flag the
/// entries must be treated as read-only. Entries arrive from the server
/// with id-only attribute stubs, so every insertion path links the
/// attribute against the [`AttributeStore`] first.
pub struct EntryStore {
    data: RwLock<Vec<Arc<Entry>>>,
    attributes: Arc<AttributeStore>,
}

impl EntryStore {
    pub fn new(attributes: Arc<AttributeStore>) -> Self {
        EntryStore {
            data: RwLock::new(Vec::new()),
            attributes,
        }
    }

    /// Replace the whole cache content, e.g. after a full reload.
    /// Attributes are not linked here; call [`link_all`](Self::link_all)
    /// once the attribute cache is populated as well.
    pub fn replace_all(&self, entries: Vec<Entry>) {
        let mut data = write_lock(&self.data);
        *data = entries.into_iter().map(Arc::new).collect();
        sort(&mut data);
    }

    /// Resolve the attribute reference of one entry against the
    /// attribute cache. A missing attribute is logged and the entry
    /// keeps its wire stub.
    pub fn link(&self, entry: &Entry) {
        match self.attributes.get(entry.attribute.id()) {
            Some(attribute) => entry.attribute.link(attribute),
            None => error!(
                attribute = entry.attribute.id(),
                entry = entry.id,
                "failed to find attribute for entry"
            ),
        }
    }

    /// Relink every cached entry, e.g. after attribute changes.
    pub fn link_all(&self) {
        let data = write_lock(&self.data);
        for entry in data.iter() {
            self.link(entry);
        }
    }

    /// Link a batch of entries that are not (or not yet) cached.
    pub fn link_slice(&self, entries: &[Entry]) {
        for entry in entries {
            self.link(entry);
        }
    }

    pub fn get(&self, id: i64) -> Option<Arc<Entry>> {
        read_lock(&self.data)
            .iter()
            .find(|e| e.id == id)
            .map(Arc::clone)
    }

    pub fn get_all(&self) -> Vec<Arc<Entry>> {
        read_lock(&self.data).clone()
    }

    /// Evaluate a locally handleable filter against the cache.
    pub fn get_filtered(&self, filter: &EntryFilter) -> Vec<Arc<Entry>> {
        read_lock(&self.data)
            .iter()
            .filter(|e| filter.matches(e))
            .map(Arc::clone)
            .collect()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.data).len()
    }

    pub fn is_empty(&self) -> bool {
        read_lock(&self.data).is_empty()
    }

    /// Insert entries and restore the sort order.
    pub fn add_sorted(&self, entries: impl IntoIterator<Item = Arc<Entry>>) {
        let mut data = write_lock(&self.data);
        data.extend(entries);
        sort(&mut data);
    }

    /// Remove a single entry by id.
    pub fn remove(&self, id: i64) -> Option<Arc<Entry>> {
        let mut data = write_lock(&self.data);
        let index = data.iter().position(|e| e.id == id)?;
        Some(data.remove(index))
    }

    /// Remove a batch of entries by id.
    pub fn remove_all(&self, ids: &[i64]) {
        let mut data = write_lock(&self.data);
        data.retain(|e| !ids.contains(&e.id));
    }

    /// Merge a change set into the cache: deletions by id, updates and
    /// creations as linked upserts. Replaying the same change set is a
    /// no-op.
    pub fn apply_update(&self, update: &UpdateData<Entry>) {
        let mut data = write_lock(&self.data);

        if !update.deleted.is_empty() {
            data.retain(|e| !update.deleted.contains(&e.id));
        }

        for entry in update.created.iter().chain(update.updated.iter()) {
            let entry = entry.clone();
            self.link(&entry);
            data.retain(|e| e.id != entry.id);
            data.push(Arc::new(entry));
        }

        sort(&mut data);
    }
}

fn sort(data: &mut Vec<Arc<Entry>>) {
    data.sort_by(|a, b| a.date_time.cmp(&b.date_time));
}

// ── Tests ────────────────────────────────────────────────────────────
