//! The session's local object table.

use std::collections::HashMap;
use std::sync::Arc;

use tether_core::ObjectId;

use crate::addressable::Addressable;

/// Objects the client may address by id. Id 0 is the root.
pub(crate) struct LocalObjectTable {
    objects: HashMap<ObjectId, Arc<dyn Addressable>>,
}

impl LocalObjectTable {
    pub(crate) fn with_root(root: Arc<dyn Addressable>) -> Self {
        let mut objects = HashMap::new();
        let _ = objects.insert(ObjectId::ROOT, root);
        Self { objects }
    }

    pub(crate) fn insert(&mut self, id: ObjectId, object: Arc<dyn Addressable>) {
        let _ = self.objects.insert(id, object);
    }

    /// Remove a non-root object. The root stays for the session's lifetime.
    pub(crate) fn remove(&mut self, id: ObjectId) -> bool {
        if id.is_root() {
            return false;
        }
        self.objects.remove(&id).is_some()
    }

    pub(crate) fn get(&self, id: ObjectId) -> Option<&Arc<dyn Addressable>> {
        self.objects.get(&id)
    }

    pub(crate) fn clear(&mut self) {
        self.objects.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.objects.len()
    }
}
