use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use crate::descriptor::TaskDescriptor;
use crate::error::ControlError;
use crate::global_names::GlobalNameDirectory;
use crate::job::{Job, JobId, JobState};
use crate::journal::Journal;
use crate::lazy_task_pool::LazyTaskPool;
use crate::reference::Reference;
use crate::task::Task;
use crate::TaskId;

/// Registry of jobs keyed by id. Allocates job ids, builds per-job
/// journal directories, admits root tasks into the lazy task pool, and
/// mediates bounded long-polling on job completion.
pub struct JobPool {
    jobs: DashMap<JobId, Arc<Job>>,
    journals: DashMap<JobId, Journal>,
    journal_root: PathBuf,
    lazy_task_pool: Arc<LazyTaskPool>,
    global_names: Arc<GlobalNameDirectory>,
    stopping: Arc<AtomicBool>,
    max_waiters_per_job: usize,
}

/// Copies the continuation/selection fields the core never interprets
/// from an admitted descriptor onto its constructed task, so every
/// admission path (root submit, replay, child spawn) round-trips them
/// onto the outbound task descriptor unmodified (§9).
fn apply_continuation_fields(descriptor: &TaskDescriptor, task: &mut Task) {
    task.parent_task_id = descriptor.parent_task_id.clone();
    task.continues_task = descriptor.continues_task.clone();
    task.require_features = descriptor.require_features.clone();
    task.save_continuation = descriptor.save_continuation;
    task.select_group = descriptor.select_group.clone();
    task.select_timeout = descriptor.select_timeout;
    task.replay_uuids = descriptor.replay_uuids.clone();
}

impl JobPool {
    pub fn new(
        journal_root: PathBuf,
        lazy_task_pool: Arc<LazyTaskPool>,
        global_names: Arc<GlobalNameDirectory>,
        max_waiters_per_job: usize,
    ) -> Self {
        Self {
            jobs: DashMap::new(),
            journals: DashMap::new(),
            journal_root,
            lazy_task_pool,
            global_names,
            stopping: Arc::new(AtomicBool::new(false)),
            max_waiters_per_job,
        }
    }

    /// Submits a new job whose root task is described by `descriptor`.
    /// Allocates exactly one job id and derives the root task id from it
    /// (`root:<job_id>`); see Open Question (c) in DESIGN.md for why this
    /// implementation never allocates a second id for the same job.
    pub fn submit(&self, mut descriptor: TaskDescriptor) -> JobId {
        let job_id = Uuid::new_v4();
        let root_task_id: TaskId = format!("root:{job_id}");
        descriptor.task_id = root_task_id.clone();

        let expected_outputs = match &descriptor.expected_outputs {
            Some(outputs) => outputs.clone(),
            None => {
                let n = descriptor.num_outputs.unwrap_or(1);
                (0..n).map(|_| self.global_names.allocate_id()).collect()
            }
        };
        descriptor.expected_outputs = Some(expected_outputs.clone());

        let job = Arc::new(Job::new(
            job_id,
            root_task_id.clone(),
            self.stopping.clone(),
            self.max_waiters_per_job,
        ));

        let job_dir = self.journal_root.join(job_id.to_string());
        if let Ok(journal) = Journal::create(&job_dir) {
            if let Err(e) = journal.append_root(&descriptor) {
                tracing::warn!(job_id = %job_id, error = %e, "failed to persist root task to journal");
            }
            self.journals.insert(job_id, journal);
        } else {
            tracing::warn!(job_id = %job_id, "failed to create journal directory");
        }

        self.jobs.insert(job_id, job.clone());

        let mut task = Task::new(
            root_task_id,
            job,
            std::mem::take(&mut descriptor.handler),
            expected_outputs,
            std::mem::take(&mut descriptor.inputs),
        );
        apply_continuation_fields(&descriptor, &mut task);
        self.lazy_task_pool.add_task(task, true);

        info!(job_id = %job_id, "job submitted");
        job_id
    }

    /// Admits a task spawned by a running task (not a job root). Appends
    /// an un-synced journal record; the next root/sync write on this
    /// job's journal will carry it to disk.
    pub fn admit_child_task(&self, job_id: JobId, descriptor: TaskDescriptor) -> Option<()> {
        self.admit_child_task_inner(job_id, descriptor, true)
    }

    fn admit_child_task_inner(
        &self,
        job_id: JobId,
        mut descriptor: TaskDescriptor,
        persist: bool,
    ) -> Option<()> {
        let job = self.jobs.get(&job_id)?.clone();

        let expected_outputs = match &descriptor.expected_outputs {
            Some(outputs) => outputs.clone(),
            None => {
                let n = descriptor.num_outputs.unwrap_or(1);
                (0..n).map(|_| self.global_names.allocate_id()).collect()
            }
        };
        descriptor.expected_outputs = Some(expected_outputs.clone());

        if persist {
            if let Some(journal) = self.journals.get(&job_id) {
                if let Err(e) = journal.append_child(&descriptor) {
                    tracing::warn!(job_id = %job_id, error = %e, "failed to persist child task to journal");
                }
            }
        }

        let mut task = Task::new(
            descriptor.task_id.clone(),
            job,
            std::mem::take(&mut descriptor.handler),
            expected_outputs,
            std::mem::take(&mut descriptor.inputs),
        );
        apply_continuation_fields(&descriptor, &mut task);
        self.lazy_task_pool.add_task(task, false);
        Some(())
    }

    pub fn job(&self, id: JobId) -> Option<Arc<Job>> {
        self.jobs.get(&id).map(|j| j.clone())
    }

    pub fn wait_for_completion(&self, id: JobId) -> Result<Reference, ControlError> {
        if self.stopping.load(Ordering::SeqCst) {
            return Err(ControlError::ServerStopping);
        }
        let job = self.job(id).ok_or(ControlError::ServerStopping)?;
        job.wait_for_completion()
    }

    /// Reconstructs this job's tasks from its on-disk journal, used on
    /// startup recovery. Re-admits every record in append order.
    pub fn replay(&self, job_id: JobId) -> std::io::Result<()> {
        let job_dir = self.journal_root.join(job_id.to_string());
        let records = Journal::replay(&job_dir.join("task_journal"))?;

        // Reopen the existing journal for append before replaying, so
        // any task admitted from here on is still persisted.
        let journal = Journal::create(&job_dir)?;
        self.journals.insert(job_id, journal);

        for (i, descriptor) in records.into_iter().enumerate() {
            if i == 0 {
                self.submit_with_id(job_id, descriptor);
            } else {
                self.admit_child_task_inner(job_id, descriptor, false);
            }
        }
        Ok(())
    }

    fn submit_with_id(&self, job_id: JobId, mut descriptor: TaskDescriptor) {
        let root_task_id = descriptor.task_id.clone();
        let expected_outputs = descriptor.expected_outputs.clone().unwrap_or_default();

        let job = Arc::new(Job::new(
            job_id,
            root_task_id.clone(),
            self.stopping.clone(),
            self.max_waiters_per_job,
        ));
        self.jobs.insert(job_id, job.clone());

        let mut task = Task::new(
            root_task_id,
            job,
            std::mem::take(&mut descriptor.handler),
            expected_outputs,
            std::mem::take(&mut descriptor.inputs),
        );
        apply_continuation_fields(&descriptor, &mut task);
        self.lazy_task_pool.add_task(task, true);
    }

    /// Wakes every job's completion waiters so they observe
    /// `SERVER_STOPPING`.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        for entry in self.jobs.iter() {
            entry.value().notify_stopping();
        }
        self.global_names.stop();
    }

    pub fn job_state(&self, id: JobId) -> Option<JobState> {
        self.job(id).map(|j| j.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;
    use std::collections::HashMap;

    fn pool(journal_root: PathBuf) -> JobPool {
        let bus = Arc::new(EventBus::new());
        let names = Arc::new(GlobalNameDirectory::new(bus.clone()));
        let ltp = Arc::new(LazyTaskPool::new(bus, names.clone()));
        JobPool::new(journal_root, ltp, names, 10)
    }

    fn descriptor_with_continuation(task_id: &str) -> TaskDescriptor {
        TaskDescriptor {
            task_id: task_id.to_string(),
            parent_task_id: Some("parent:0".into()),
            handler: "noop".into(),
            inputs: HashMap::new(),
            expected_outputs: Some(vec![1]),
            num_outputs: None,
            continues_task: Some("continued:0".into()),
            require_features: vec!["gpu".into()],
            save_continuation: true,
            select_group: Some("group-a".into()),
            select_timeout: Some(30),
            replay_uuids: vec!["replay-uuid-0".into()],
        }
    }

    fn assert_round_tripped(job_pool: &JobPool, task_id: &str) {
        let extras = job_pool.lazy_task_pool.descriptor_extras_for(task_id);
        assert_eq!(extras.parent_task_id, Some("parent:0".to_string()));
        assert_eq!(extras.continues_task, Some("continued:0".to_string()));
        assert!(extras.save_continuation);
        assert_eq!(extras.select_group, Some("group-a".to_string()));
        assert_eq!(extras.select_timeout, Some(30));
        assert_eq!(extras.replay_uuids, vec!["replay-uuid-0".to_string()]);
    }

    #[test]
    fn submit_round_trips_continuation_fields_onto_the_root_task() {
        let dir = tempfile::tempdir().unwrap();
        let job_pool = pool(dir.path().to_path_buf());
        let mut descriptor = descriptor_with_continuation("root:unused");
        descriptor.num_outputs = Some(1);
        descriptor.expected_outputs = None;
        let job_id = job_pool.submit(descriptor);
        assert_round_tripped(&job_pool, &format!("root:{job_id}"));
    }

    #[test]
    fn admit_child_task_round_trips_continuation_fields() {
        let dir = tempfile::tempdir().unwrap();
        let job_pool = pool(dir.path().to_path_buf());
        let job_id = job_pool.submit(TaskDescriptor {
            task_id: "root:unused".into(),
            parent_task_id: None,
            handler: "noop".into(),
            inputs: HashMap::new(),
            expected_outputs: Some(vec![1]),
            num_outputs: None,
            continues_task: None,
            require_features: vec![],
            save_continuation: false,
            select_group: None,
            select_timeout: None,
            replay_uuids: vec![],
        });

        job_pool
            .admit_child_task(job_id, descriptor_with_continuation("child:0"))
            .unwrap();
        assert_round_tripped(&job_pool, "child:0");
    }

    #[test]
    fn replay_round_trips_continuation_fields_onto_the_recovered_root_task() {
        let dir = tempfile::tempdir().unwrap();
        let job_id = {
            let job_pool = pool(dir.path().to_path_buf());
            let mut descriptor = descriptor_with_continuation("root:unused");
            descriptor.num_outputs = Some(1);
            descriptor.expected_outputs = None;
            job_pool.submit(descriptor)
        };

        let job_pool = pool(dir.path().to_path_buf());
        job_pool.replay(job_id).unwrap();
        assert_round_tripped(&job_pool, &format!("root:{job_id}"));
    }
}
