use parking_lot::Mutex;

use crate::error::TaskFailureReason;
use crate::reference::ReferenceId;
use crate::{TaskId, WorkerId};

/// Topics published on the in-process bus. Publication is synchronous
/// and runs on the publisher's own thread.
#[derive(Clone)]
pub enum Event {
    Schedule,
    WorkerIdle { worker_id: WorkerId },
    WorkerFailed { worker_id: WorkerId },
    TaskFailed {
        task_id: TaskId,
        reason: TaskFailureReasonTag,
    },
    GlobalNameAvailable { id: ReferenceId },
    Stop,
}

/// A cheaply-clonable summary of [`TaskFailureReason`], since the full
/// reason can carry a `Reference` that subscribers rarely need.
#[derive(Clone, Debug)]
pub enum TaskFailureReasonTag {
    WorkerFailed,
    MissingInput,
    RuntimeException,
}

impl From<&TaskFailureReason> for TaskFailureReasonTag {
    fn from(reason: &TaskFailureReason) -> Self {
        match reason {
            TaskFailureReason::WorkerFailed => TaskFailureReasonTag::WorkerFailed,
            TaskFailureReason::MissingInput { .. } => TaskFailureReasonTag::MissingInput,
            TaskFailureReason::RuntimeException(_) => TaskFailureReasonTag::RuntimeException,
        }
    }
}

type Subscriber = Box<dyn Fn(&Event) + Send + Sync>;

/// In-process publish/subscribe bus. Subscribers registered through
/// [`EventBus::subscribe_priority`] are invoked, in subscription order,
/// before those registered through [`EventBus::subscribe`] -- used so the
/// job pool observes `stop` before the HTTP transport does.
#[derive(Default)]
pub struct EventBus {
    priority: Mutex<Vec<Subscriber>>,
    normal: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, f: impl Fn(&Event) + Send + Sync + 'static) {
        self.normal.lock().push(Box::new(f));
    }

    pub fn subscribe_priority(&self, f: impl Fn(&Event) + Send + Sync + 'static) {
        self.priority.lock().push(Box::new(f));
    }

    pub fn publish(&self, event: Event) {
        for subscriber in self.priority.lock().iter() {
            subscriber(&event);
        }
        for subscriber in self.normal.lock().iter() {
            subscriber(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn priority_subscribers_run_before_normal_ones() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe(move |_| o1.lock().push("normal"));
        let o2 = order.clone();
        bus.subscribe_priority(move |_| o2.lock().push("priority"));

        bus.publish(Event::Stop);

        assert_eq!(*order.lock(), vec!["priority", "normal"]);
    }

    #[test]
    fn every_subscriber_observes_every_publish() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Event::Schedule);
        bus.publish(Event::Schedule);

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
