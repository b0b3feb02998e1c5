use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::event_bus::{Event, EventBus};
use crate::reference::{Reference, ReferenceId};
use crate::TaskId;

struct Entry {
    producer: Option<TaskId>,
    refs: Vec<Reference>,
}

struct Inner {
    next_id: ReferenceId,
    entries: HashMap<ReferenceId, Entry>,
    stopping: bool,
}

/// Allocates opaque, monotonically increasing reference ids and records
/// which task produced each one. Separate from the lazy task pool's own
/// bookkeeping: any collaborator (the job pool allocating a root output,
/// an interpreter registering a spawn) can allocate or wait on an id here
/// without going through task/job subscription machinery.
pub struct GlobalNameDirectory {
    inner: Mutex<Inner>,
    changed: Condvar,
    event_bus: Arc<EventBus>,
}

impl GlobalNameDirectory {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                entries: HashMap::new(),
                stopping: false,
            }),
            changed: Condvar::new(),
            event_bus,
        }
    }

    pub fn allocate_id(&self) -> ReferenceId {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.insert(
            id,
            Entry {
                producer: None,
                refs: Vec::new(),
            },
        );
        id
    }

    pub fn register_producer(&self, id: ReferenceId, task_id: TaskId) {
        let mut inner = self.inner.lock();
        inner
            .entries
            .entry(id)
            .or_insert_with(|| Entry {
                producer: None,
                refs: Vec::new(),
            })
            .producer = Some(task_id);
    }

    pub fn producer_of(&self, id: ReferenceId) -> Option<TaskId> {
        self.inner.lock().entries.get(&id).and_then(|e| e.producer.clone())
    }

    /// Appends newly known refs for `id` and wakes any waiters.
    pub fn add_refs_for_id(&self, id: ReferenceId, refs: Vec<Reference>) {
        {
            let mut inner = self.inner.lock();
            inner
                .entries
                .entry(id)
                .or_insert_with(|| Entry {
                    producer: None,
                    refs: Vec::new(),
                })
                .refs
                .extend(refs);
        }
        self.changed.notify_all();
        self.event_bus.publish(Event::GlobalNameAvailable { id });
    }

    /// Blocks until `id` has at least one known reference, or the
    /// directory is marked stopping.
    pub fn wait_for_completion(&self, id: ReferenceId) -> Vec<Reference> {
        let mut inner = self.inner.lock();
        loop {
            if inner.stopping {
                return Vec::new();
            }
            if let Some(entry) = inner.entries.get(&id) {
                if !entry.refs.is_empty() {
                    return entry.refs.clone();
                }
            }
            self.changed.wait(&mut inner);
        }
    }

    pub fn stop(&self) {
        self.inner.lock().stopping = true;
        self.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_id_is_monotonically_increasing() {
        let dir = GlobalNameDirectory::new(Arc::new(EventBus::new()));
        let a = dir.allocate_id();
        let b = dir.allocate_id();
        assert!(b > a);
    }

    #[test]
    fn add_refs_for_id_is_observed_by_wait_for_completion() {
        use std::thread;
        use std::time::Duration;

        let dir = Arc::new(GlobalNameDirectory::new(Arc::new(EventBus::new())));
        let id = dir.allocate_id();

        let waiter_dir = dir.clone();
        let handle = thread::spawn(move || waiter_dir.wait_for_completion(id));

        thread::sleep(Duration::from_millis(20));
        dir.add_refs_for_id(id, vec![Reference::Null { id }]);

        let refs = handle.join().unwrap();
        assert_eq!(refs.len(), 1);
    }

    #[test]
    fn stop_wakes_waiters_with_no_refs() {
        use std::thread;
        use std::time::Duration;

        let dir = Arc::new(GlobalNameDirectory::new(Arc::new(EventBus::new())));
        let id = dir.allocate_id();

        let waiter_dir = dir.clone();
        let handle = thread::spawn(move || waiter_dir.wait_for_completion(id));

        thread::sleep(Duration::from_millis(20));
        dir.stop();

        let refs = handle.join().unwrap();
        assert!(refs.is_empty());
    }
}
