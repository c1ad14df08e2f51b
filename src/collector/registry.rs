use super::runtime::ContainerRecord;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct AddedReport {
    containers: Vec<ContainerRecord>,
    reported: HashSet<String>,
}

/// Containers currently tracked on the host plus the "added containers"
/// report consumed by inputs.
///
/// Only the watcher mutates tracked entries; everything else reads snapshots.
#[derive(Debug, Default)]
pub struct ContainerRegistry {
    containers: RwLock<HashMap<String, ContainerRecord>>,
    added: Mutex<AddedReport>,
    added_notify: Notify,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, record: ContainerRecord) {
        self.containers.write().insert(record.id.clone(), record);
    }

    /// Forgets a container everywhere, including its reported status, so a
    /// reused id is treated as new.
    pub fn remove(&self, id: &str) -> Option<ContainerRecord> {
        let removed = self.containers.write().remove(id);
        let mut added = self.added.lock();
        if added.reported.remove(id) {
            added.containers.retain(|c| c.id != id);
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<ContainerRecord> {
        self.containers.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.containers.read().contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.containers.read().keys().cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<ContainerRecord> {
        self.containers.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.containers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.read().is_empty()
    }

    /// Appends every tracked, not yet reported id to the added report.
    /// Returns how many containers were newly reported.
    pub fn record_containers<'a, I>(&self, ids: I) -> usize
    where
        I: IntoIterator<Item = &'a String>,
    {
        let containers = self.containers.read();
        let mut added = self.added.lock();
        let mut recorded = 0;
        for id in ids {
            let Some(record) = containers.get(id) else {
                continue;
            };
            if added.reported.insert(id.clone()) {
                added.containers.push(record.clone());
                recorded += 1;
            }
        }
        drop(added);
        drop(containers);

        if recorded > 0 {
            tracing::debug!(recorded, "Recorded added containers");
            self.added_notify.notify_waiters();
        }
        recorded
    }

    pub fn added_containers(&self) -> Vec<ContainerRecord> {
        self.added.lock().containers.clone()
    }

    /// Drains the added report; drained containers may be reported again.
    pub fn take_added_containers(&self) -> Vec<ContainerRecord> {
        let mut added = self.added.lock();
        added.reported.clear();
        std::mem::take(&mut added.containers)
    }

    /// Resolves the next time containers are recorded.
    pub async fn wait_for_added(&self) {
        self.added_notify.notified().await;
    }
}
