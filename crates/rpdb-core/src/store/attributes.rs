// Local mirror of the attribute set.

use std::sync::{Arc, RwLock};

use rpdb_api::model::{Attribute, UpdateData};

use super::{read_lock, write_lock};

/// Owner of all locally cached attributes, ordered by name.
///
/// Entries reference attributes through shared pointers handed out by
/// this store; replacing an attribute here requires relinking the
/// affected entries afterwards.
pub struct AttributeStore {
    data: RwLock<Vec<Arc<Attribute>>>,
}

impl AttributeStore {
    pub fn new() -> Self {
        AttributeStore {
            data: RwLock::new(Vec::new()),
        }
    }

    /// Replace the whole cache content, e.g. after a full reload.
    pub fn replace_all(&self, attributes: Vec<Attribute>) {
        let mut data = write_lock(&self.data);
        *data = attributes.into_iter().map(Arc::new).collect();
        sort(&mut data);
    }

    pub fn get(&self, id: i64) -> Option<Arc<Attribute>> {
        read_lock(&self.data)
            .iter()
            .find(|a| a.id == id)
            .map(Arc::clone)
    }

    /// Look up an attribute by its unique name.
    pub fn get_by_name(&self, name: &str) -> Option<Arc<Attribute>> {
        read_lock(&self.data)
            .iter()
            .find(|a| a.name == name)
            .map(Arc::clone)
    }

    pub fn get_all(&self) -> Vec<Arc<Attribute>> {
        read_lock(&self.data).clone()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.data).len()
    }

    pub fn is_empty(&self) -> bool {
        read_lock(&self.data).is_empty()
    }

    /// Merge a change set into the cache. Deletions are applied by id,
    /// updates and creations as upserts so replays stay idempotent.
    pub fn apply_update(&self, update: &UpdateData<Attribute>) {
        let mut data = write_lock(&self.data);

        if !update.deleted.is_empty() {
            data.retain(|a| !update.deleted.contains(&a.id));
        }

        for attribute in update.created.iter().chain(update.updated.iter()) {
            data.retain(|a| a.id != attribute.id);
            data.push(Arc::new(attribute.clone()));
        }

        sort(&mut data);
    }
}

impl Default for AttributeStore {
    fn default() -> Self {
        AttributeStore::new()
    }
}

fn sort(data: &mut Vec<Arc<Attribute>>) {
    data.sort_by(|a, b| a.name.cmp(&b.name));
}

// ── Tests ────────────────────────────────────────────────────────────
