use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::debug;

use crate::descriptor::TaskDescriptor;
use crate::lazy_task_pool::LazyTaskPool;
use crate::worker_pool::WorkerPool;

/// Matches idle workers to runnable tasks. Driven by `schedule` /
/// `worker_idle` wake-ups rather than polling; dispatch itself is a
/// single best-effort pass over whatever is in the runnable queue right
/// now.
pub struct Dispatcher {
    lazy_task_pool: Arc<LazyTaskPool>,
    worker_pool: Arc<WorkerPool>,
}

impl Dispatcher {
    pub fn new(lazy_task_pool: Arc<LazyTaskPool>, worker_pool: Arc<WorkerPool>) -> Self {
        Self {
            lazy_task_pool,
            worker_pool,
        }
    }

    /// Blocks on `wake` and runs one dispatch pass per wake-up. Intended
    /// to be the body of the dedicated dispatch thread.
    pub fn run_loop(&self, wake: Receiver<()>) {
        while wake.recv().is_ok() {
            self.dispatch_once();
        }
    }

    /// Pops every currently-runnable task once, matching each against an
    /// idle worker with the required features. Tasks that find no match
    /// this pass go back to the end of the queue for the next wake-up.
    pub fn dispatch_once(&self) {
        let mut deferred = Vec::new();

        while let Some(task_id) = self.lazy_task_pool.pop_runnable() {
            let required = self.lazy_task_pool.required_features(&task_id);

            match self.worker_pool.idle_worker_matching(&required) {
                Some(worker_id) => {
                    let descriptor = self.build_descriptor(&task_id);
                    if !self
                        .worker_pool
                        .execute_task_on_worker(worker_id, &task_id, &descriptor)
                    {
                        debug!(task_id, "lost the race for a worker, will retry next pass");
                        deferred.push(task_id);
                    }
                }
                None => deferred.push(task_id),
            }
        }

        for task_id in deferred {
            self.lazy_task_pool.requeue(task_id);
        }
    }

    fn build_descriptor(&self, task_id: &str) -> TaskDescriptor {
        let extras = self.lazy_task_pool.descriptor_extras_for(task_id);
        TaskDescriptor {
            task_id: task_id.to_string(),
            parent_task_id: extras.parent_task_id,
            handler: self.lazy_task_pool.handler_for(task_id).unwrap_or_default(),
            inputs: self.lazy_task_pool.inputs_for(task_id),
            expected_outputs: Some(self.lazy_task_pool.expected_outputs_for(task_id)),
            num_outputs: None,
            continues_task: extras.continues_task,
            require_features: self.lazy_task_pool.required_features(task_id),
            save_continuation: extras.save_continuation,
            select_group: extras.select_group,
            select_timeout: extras.select_timeout,
            replay_uuids: extras.replay_uuids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TaskDescriptor as Descr;
    use crate::event_bus::EventBus;
    use crate::global_names::GlobalNameDirectory;
    use crate::job::Job;
    use crate::task::Task;
    use crate::transport::{TransportError, WorkerTransport};
    use crate::worker_pool::WorkerDescriptor;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex as StdMutex;

    struct RecordingTransport {
        assigned: StdMutex<Vec<String>>,
    }

    impl WorkerTransport for RecordingTransport {
        fn assign(&self, netloc: &str, _descriptor: &Descr) -> Result<(), TransportError> {
            self.assigned.lock().unwrap().push(netloc.to_string());
            Ok(())
        }
        fn abort(&self, _netloc: &str, _task_id: &str) -> Result<(), TransportError> {
            Ok(())
        }
        fn health_check(&self, _netloc: &str) -> Result<(), TransportError> {
            Ok(())
        }
        fn kill(&self, _netloc: &str) {}
    }

    #[test]
    fn dispatch_once_assigns_a_runnable_task_to_a_matching_idle_worker() {
        let bus = Arc::new(EventBus::new());
        let names = Arc::new(GlobalNameDirectory::new(bus.clone()));
        let ltp = Arc::new(LazyTaskPool::new(bus.clone(), names));
        let transport = Arc::new(RecordingTransport {
            assigned: StdMutex::new(Vec::new()),
        });
        let wp = Arc::new(WorkerPool::new(
            bus.clone(),
            ltp.clone(),
            transport.clone(),
            Arc::new(AtomicBool::new(false)),
            5,
        ));
        let dispatcher = Dispatcher::new(ltp.clone(), wp.clone());

        let job = Arc::new(Job::new(
            uuid::Uuid::new_v4(),
            "root:d0".into(),
            Arc::new(AtomicBool::new(false)),
            10,
        ));
        let root = Task::new("root:d0".into(), job, "noop".into(), vec![1], HashMap::new());
        ltp.add_task(root, true);

        wp.create_worker(WorkerDescriptor {
            netloc: "w0:9000".into(),
            features: vec![],
        });

        dispatcher.dispatch_once();

        assert_eq!(transport.assigned.lock().unwrap().as_slice(), ["w0:9000"]);
        assert_eq!(
            ltp.task_state("root:d0"),
            Some(crate::task::TaskState::Assigned)
        );
    }
}
