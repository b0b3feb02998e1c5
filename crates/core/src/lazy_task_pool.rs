use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::TaskFailureReason;
use crate::event_bus::{Event, EventBus};
use crate::global_names::GlobalNameDirectory;
use crate::job::Job;
use crate::reference::{Reference, ReferenceId};
use crate::task::{Task, TaskState};
use crate::{TaskId, WorkerId};

#[derive(Clone, PartialEq, Eq, Hash)]
enum Consumer {
    Task(TaskId),
    Job(uuid::Uuid),
}

/// Continuation/selection fields carried on a `Task` but never
/// interpreted by the pool itself; see [`LazyTaskPool::descriptor_extras_for`].
#[derive(Debug, Clone, Default)]
pub struct TaskDescriptorExtras {
    pub parent_task_id: Option<TaskId>,
    pub continues_task: Option<TaskId>,
    pub save_continuation: bool,
    pub select_group: Option<String>,
    pub select_timeout: Option<u64>,
    pub replay_uuids: Vec<String>,
}

/// Coarse-grained state behind the lazy task pool's single lock.
///
/// `schedule_needed` is scratch: every public operation resets it to
/// `false`, runs its logic, and reads it back before dropping the lock
/// to decide whether to publish a `schedule` event. It is not part of
/// the pool's durable state.
struct Inner {
    tasks: HashMap<TaskId, Task>,
    task_for_output: HashMap<ReferenceId, TaskId>,
    consumers_for_output: HashMap<ReferenceId, HashSet<Consumer>>,
    ref_for_output: HashMap<ReferenceId, Reference>,
    root_jobs: HashMap<ReferenceId, Arc<Job>>,
    task_queue: VecDeque<TaskId>,
    schedule_needed: bool,
}

impl Inner {
    fn set_state(&mut self, task_id: &TaskId, new_state: TaskState) {
        if let Some(task) = self.tasks.get_mut(task_id) {
            let old_state = task.state;
            if old_state == new_state {
                return;
            }
            task.state = new_state;
            task.job.record_task_transition(old_state, new_state);
        }
    }

    /// Admits a producer's output into the BFS frontier, exactly once
    /// per pass: BLOCKING is used as the visited marker, so a task
    /// already BLOCKING, RUNNABLE, QUEUED, or ASSIGNED is left alone.
    fn seed(&mut self, task_id: &TaskId, queue: &mut VecDeque<TaskId>) {
        let admit = matches!(
            self.tasks.get(task_id).map(|t| t.state),
            Some(TaskState::Created) | Some(TaskState::Committed)
        );
        if admit {
            self.set_state(task_id, TaskState::Blocking);
            queue.push_back(task_id.clone());
        }
    }

    fn mark_runnable(&mut self, task_id: &TaskId) {
        self.set_state(task_id, TaskState::Runnable);
        self.set_state(task_id, TaskState::Queued);
        self.task_queue.push_back(task_id.clone());
        self.schedule_needed = true;
    }

    /// Installs `new_ref` as the current known value for `id`, combining
    /// with any existing Concrete reference, then atomically pops and
    /// notifies every subscribed consumer. Returns the reference as
    /// installed.
    fn publish_ref(&mut self, id: ReferenceId, new_ref: Reference) -> Reference {
        let resolved = match self.ref_for_output.remove(&id) {
            Some(existing) if existing.is_concrete() && new_ref.is_concrete() => {
                existing.combine_with(new_ref)
            }
            _ => new_ref,
        };
        self.ref_for_output.insert(id, resolved.clone());

        let consumers = self.consumers_for_output.remove(&id).unwrap_or_default();
        for consumer in consumers {
            match consumer {
                Consumer::Job(job_id) => {
                    if let Some(job) = self.root_jobs.get(&id) {
                        debug_assert_eq!(job.id, job_id);
                        if resolved.is_error() {
                            job.fail(resolved.clone());
                        } else {
                            job.complete(resolved.clone());
                        }
                    }
                }
                Consumer::Task(consumer_id) => {
                    let matching_keys: Vec<String> = self
                        .tasks
                        .get(&consumer_id)
                        .map(|t| {
                            t.dependencies
                                .iter()
                                .filter(|(_, r)| r.id() == id)
                                .map(|(k, _)| k.clone())
                                .collect()
                        })
                        .unwrap_or_default();

                    if let Some(task) = self.tasks.get_mut(&consumer_id) {
                        task.blocked_on.remove(&id);
                        for key in matching_keys {
                            // Also rewrite the declared dependency itself,
                            // not just `inputs`: a later MISSING_INPUT
                            // re-reduction re-reads `dependencies`, and it
                            // must see the now-Concrete reference (so the
                            // Concrete arm of `resolve_dependency` runs and
                            // applies `ignore_endpoints`) rather than the
                            // original Future, which would short-circuit
                            // through the cached-value branch unchanged.
                            task.dependencies.insert(key.clone(), resolved.clone());
                            task.inputs.insert(key, resolved.clone());
                        }
                        if task.blocked_on.is_empty() {
                            drop(task);
                            self.mark_runnable(&consumer_id);
                        }
                    }
                }
            }
        }

        resolved
    }

    /// Resolves a single declared dependency against current knowledge.
    /// Returns `Some(reference)` if the dependency is already satisfied
    /// (registering nothing further), or `None` if the caller must
    /// block on it (having been registered as a consumer).
    fn resolve_dependency(
        &mut self,
        waiting_task: &TaskId,
        dep: &Reference,
        ignore_endpoints: &[String],
    ) -> Option<Reference> {
        match dep {
            Reference::Data { .. } | Reference::Url { .. } | Reference::Null { .. } | Reference::Error { .. } => {
                Some(dep.clone())
            }
            Reference::Future { id, .. } => {
                if let Some(existing) = self.ref_for_output.get(id) {
                    if existing.is_satisfied() {
                        return Some(existing.clone());
                    }
                }
                self.consumers_for_output
                    .entry(*id)
                    .or_default()
                    .insert(Consumer::Task(waiting_task.clone()));
                None
            }
            Reference::Concrete { id, .. } if ignore_endpoints.is_empty() => {
                Some(self.publish_ref(*id, dep.clone()))
            }
            Reference::Concrete { id, .. } => {
                let merged = match self.ref_for_output.remove(id) {
                    Some(existing) if existing.is_concrete() => existing.combine_with(dep.clone()),
                    _ => dep.clone(),
                };
                match merged.without_endpoints(ignore_endpoints) {
                    Some(trimmed) => Some(self.publish_ref(*id, trimmed)),
                    None => {
                        let future = merged.as_future();
                        self.resolve_dependency(waiting_task, &future, &[])
                    }
                }
            }
        }
    }

    /// Breadth-first activation of the minimal subgraph needed to
    /// satisfy `demanded` plus any extra seed tasks, optionally
    /// blacklisting a set of worker endpoints while resolving Concrete
    /// dependencies (used by the MISSING_INPUT recovery path).
    fn reduce(&mut self, demanded: Vec<ReferenceId>, extra_seeds: Vec<TaskId>, ignore_endpoints: &[String]) {
        let mut queue = VecDeque::new();

        for output_id in demanded {
            if let Some(producer) = self.task_for_output.get(&output_id).cloned() {
                self.seed(&producer, &mut queue);
            }
        }
        for seed in extra_seeds {
            self.seed(&seed, &mut queue);
        }

        while let Some(task_id) = queue.pop_front() {
            let deps: Vec<(String, Reference)> = match self.tasks.get(&task_id) {
                Some(task) => task
                    .dependencies
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                None => continue,
            };

            let mut blocked_on = HashSet::new();
            for (local_key, dep) in deps {
                match self.resolve_dependency(&task_id, &dep, ignore_endpoints) {
                    Some(resolved) => {
                        if let Some(task) = self.tasks.get_mut(&task_id) {
                            // Keep the declared dependency itself in sync
                            // with the latest resolution (not just
                            // `inputs`): otherwise a later re-reduction
                            // re-reads the stale, un-trimmed reference from
                            // `dependencies` and can resurrect an endpoint
                            // a previous MISSING_INPUT already blacklisted.
                            task.dependencies.insert(local_key.clone(), resolved.clone());
                            task.inputs.insert(local_key, resolved);
                        }
                    }
                    None => {
                        blocked_on.insert(dep.id());
                        if let Some(producer) = self.task_for_output.get(&dep.id()).cloned() {
                            self.seed(&producer, &mut queue);
                        }
                    }
                }
            }

            if let Some(task) = self.tasks.get_mut(&task_id) {
                task.blocked_on = blocked_on;
                if task.blocked_on.is_empty() {
                    drop(task);
                    self.mark_runnable(&task_id);
                }
            }
        }
    }
}

/// Owns tasks, the producer/consumer subscription maps, the runnable
/// queue, and the graph-reduction algorithm.
pub struct LazyTaskPool {
    inner: Mutex<Inner>,
    event_bus: Arc<EventBus>,
    global_names: Arc<GlobalNameDirectory>,
    max_attempts: u32,
}

impl LazyTaskPool {
    pub fn new(event_bus: Arc<EventBus>, global_names: Arc<GlobalNameDirectory>) -> Self {
        Self::with_max_attempts(event_bus, global_names, 3)
    }

    pub fn with_max_attempts(
        event_bus: Arc<EventBus>,
        global_names: Arc<GlobalNameDirectory>,
        max_attempts: u32,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                tasks: HashMap::new(),
                task_for_output: HashMap::new(),
                consumers_for_output: HashMap::new(),
                ref_for_output: HashMap::new(),
                root_jobs: HashMap::new(),
                task_queue: VecDeque::new(),
                schedule_needed: false,
            }),
            event_bus,
            global_names,
            max_attempts,
        }
    }

    /// Admits a task. `is_root` marks it as a job's root task, whose
    /// single expected output the job subscribes to for completion.
    pub fn add_task(&self, task: Task, is_root: bool) {
        let mut inner = self.inner.lock();
        if inner.tasks.contains_key(&task.task_id) {
            return;
        }
        inner.schedule_needed = false;

        let task_id = task.task_id.clone();
        let job = task.job.clone();
        let expected_outputs = task.expected_outputs.clone();

        job.record_task_admitted(TaskState::Created);

        for &output_id in &expected_outputs {
            inner.task_for_output.insert(output_id, task_id.clone());
            self.global_names.register_producer(output_id, task_id.clone());
        }

        if is_root {
            for &output_id in &expected_outputs {
                inner.root_jobs.insert(output_id, job.clone());
                inner
                    .consumers_for_output
                    .entry(output_id)
                    .or_default()
                    .insert(Consumer::Job(job.id));
            }
        }

        let has_existing_consumers = expected_outputs
            .iter()
            .any(|id| inner.consumers_for_output.get(id).map_or(false, |c| !c.is_empty()));

        inner.tasks.insert(task_id.clone(), task);

        if is_root || has_existing_consumers {
            inner.reduce(expected_outputs, Vec::new(), &[]);
        }

        let schedule = inner.schedule_needed;
        drop(inner);
        if schedule {
            self.event_bus.publish(Event::Schedule);
        }
    }

    /// A worker reported `task_id` committed, producing `bindings`:
    /// each expected output maps to one or more concrete references
    /// (several when the output is reachable from several locations).
    ///
    /// Returns the worker the task had been assigned to, if any, so the
    /// caller can release it back to the worker pool's idle set -- the
    /// lazy task pool holds no reference to the worker pool itself.
    pub fn task_completed(&self, task_id: &str, bindings: HashMap<ReferenceId, Vec<Reference>>) -> Option<WorkerId> {
        let mut inner = self.inner.lock();
        inner.schedule_needed = false;

        let released_worker = if let Some(task) = inner.tasks.get_mut(task_id) {
            let released = task.worker.take();
            let old_state = task.state;
            task.state = TaskState::Committed;
            task.job.record_task_transition(old_state, TaskState::Committed);
            released
        } else {
            return None;
        };

        let mut published = Vec::new();
        for (id, refs) in bindings {
            for r in refs {
                let resolved = inner.publish_ref(id, r);
                published.push((id, resolved));
            }
        }

        let schedule = inner.schedule_needed;
        drop(inner);

        for (id, r) in published {
            self.global_names.add_refs_for_id(id, vec![r]);
        }
        if schedule {
            self.event_bus.publish(Event::Schedule);
        }
        released_worker
    }

    /// A worker (or the worker pool, on its behalf) reported `task_id`
    /// failed for `reason`. See the WORKER_FAILED / MISSING_INPUT /
    /// RUNTIME_EXCEPTION branches in the module-level design notes.
    ///
    /// Returns the worker the task had been assigned to, but only when
    /// that worker is still alive and should be released back to the
    /// idle set -- i.e. for MISSING_INPUT / RUNTIME_EXCEPTION, reported
    /// by a worker that is still up. For WORKER_FAILED the caller is the
    /// worker pool itself, already handling that worker's removal, so
    /// this always returns `None` on that path.
    pub fn task_failed(&self, task_id: &str, reason: TaskFailureReason) -> Option<WorkerId> {
        enum Outcome {
            Retry { ignore_endpoints: Vec<String> },
            Terminal(Vec<(ReferenceId, Reference)>),
        }

        let (outcome, worker_to_release) = {
            let mut inner = self.inner.lock();
            inner.schedule_needed = false;

            let Some(task) = inner.tasks.get_mut(task_id) else {
                return None;
            };
            let job = task.job.clone();
            let old_state = task.state;
            let previous_worker = task.worker.take();
            let worker_to_release = if matches!(reason, TaskFailureReason::WorkerFailed) {
                None
            } else {
                previous_worker
            };

            let outcome = match &reason {
                TaskFailureReason::WorkerFailed => {
                    task.current_attempt += 1;
                    let max_attempts = self.max_attempts;
                    if task.current_attempt > max_attempts {
                        task.state = TaskState::Failed;
                        job.record_task_transition(old_state, TaskState::Failed);
                        let refs = task
                            .expected_outputs
                            .iter()
                            .map(|&id| {
                                (
                                    id,
                                    Reference::Error {
                                        id,
                                        reason: "WORKER_FAILED".into(),
                                        details: Some(format!(
                                            "exceeded {max_attempts} attempts"
                                        )),
                                    },
                                )
                            })
                            .collect();
                        Outcome::Terminal(refs)
                    } else {
                        task.state = TaskState::Created;
                        job.record_task_transition(old_state, TaskState::Created);
                        Outcome::Retry {
                            ignore_endpoints: Vec::new(),
                        }
                    }
                }
                TaskFailureReason::MissingInput { detail } => {
                    task.state = TaskState::Created;
                    job.record_task_transition(old_state, TaskState::Created);

                    let endpoints = match detail {
                        Some(Reference::Concrete { location_hints, .. }) => {
                            location_hints.keys().cloned().collect()
                        }
                        _ => {
                            tracing::warn!(
                                task_id,
                                "MISSING_INPUT reported without a concrete detail; blacklisting no endpoints"
                            );
                            Vec::new()
                        }
                    };
                    Outcome::Retry {
                        ignore_endpoints: endpoints,
                    }
                }
                TaskFailureReason::RuntimeException(message) => {
                    task.state = TaskState::Failed;
                    job.record_task_transition(old_state, TaskState::Failed);
                    let refs = task
                        .expected_outputs
                        .iter()
                        .map(|&id| {
                            (
                                id,
                                Reference::Error {
                                    id,
                                    reason: "RUNTIME_EXCEPTION".into(),
                                    details: Some(message.clone()),
                                },
                            )
                        })
                        .collect();
                    Outcome::Terminal(refs)
                }
            };
            (outcome, worker_to_release)
        };

        self.event_bus.publish(Event::TaskFailed {
            task_id: task_id.to_string(),
            reason: (&reason).into(),
        });

        match outcome {
            Outcome::Retry { ignore_endpoints } => {
                let mut inner = self.inner.lock();
                inner.schedule_needed = false;
                let expected_outputs = inner
                    .tasks
                    .get(task_id)
                    .map(|t| t.expected_outputs.clone())
                    .unwrap_or_default();
                inner.reduce(expected_outputs, vec![task_id.to_string()], &ignore_endpoints);
                let schedule = inner.schedule_needed;
                drop(inner);
                if schedule {
                    self.event_bus.publish(Event::Schedule);
                }
            }
            Outcome::Terminal(refs) => {
                // Published outside the guard that recorded the FAILED
                // transition: see Open Question (a) in DESIGN.md.
                for (id, r) in refs {
                    let mut inner = self.inner.lock();
                    inner.schedule_needed = false;
                    let resolved = inner.publish_ref(id, r);
                    let schedule = inner.schedule_needed;
                    drop(inner);
                    self.global_names.add_refs_for_id(id, vec![resolved]);
                    if schedule {
                        self.event_bus.publish(Event::Schedule);
                    }
                }
            }
        }

        worker_to_release
    }

    /// Pops the next queued task, skipping any entry whose state has
    /// since moved on (e.g. it failed before the dispatcher reached it).
    pub fn pop_runnable(&self) -> Option<TaskId> {
        let mut inner = self.inner.lock();
        while let Some(candidate) = inner.task_queue.pop_front() {
            if matches!(inner.tasks.get(&candidate).map(|t| t.state), Some(TaskState::Queued)) {
                return Some(candidate);
            }
        }
        None
    }

    /// Returns a popped task to the back of the dispatch queue, used
    /// when the dispatcher could not find a matching idle worker.
    pub fn requeue(&self, task_id: TaskId) {
        self.inner.lock().task_queue.push_back(task_id);
    }

    pub fn required_features(&self, task_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .tasks
            .get(task_id)
            .map(|t| t.require_features.clone())
            .unwrap_or_default()
    }

    pub fn handler_for(&self, task_id: &str) -> Option<String> {
        self.inner.lock().tasks.get(task_id).map(|t| t.handler.clone())
    }

    pub fn inputs_for(&self, task_id: &str) -> HashMap<String, Reference> {
        self.inner
            .lock()
            .tasks
            .get(task_id)
            .map(|t| t.inputs.clone())
            .unwrap_or_default()
    }

    pub fn expected_outputs_for(&self, task_id: &str) -> Vec<ReferenceId> {
        self.inner
            .lock()
            .tasks
            .get(task_id)
            .map(|t| t.expected_outputs.clone())
            .unwrap_or_default()
    }

    /// The continuation/selection fields the core treats as opaque and
    /// round-trips unmodified onto the outbound task descriptor (§9).
    pub fn descriptor_extras_for(&self, task_id: &str) -> TaskDescriptorExtras {
        self.inner
            .lock()
            .tasks
            .get(task_id)
            .map(|t| TaskDescriptorExtras {
                parent_task_id: t.parent_task_id.clone(),
                continues_task: t.continues_task.clone(),
                save_continuation: t.save_continuation,
                select_group: t.select_group.clone(),
                select_timeout: t.select_timeout,
                replay_uuids: t.replay_uuids.clone(),
            })
            .unwrap_or_default()
    }

    pub fn task_state(&self, task_id: &str) -> Option<TaskState> {
        self.inner.lock().tasks.get(task_id).map(|t| t.state)
    }

    /// Looks up the job a task belongs to, used by the inbound RPC layer
    /// to route a worker's spawned-child report to the right job pool
    /// entry without the caller having to track job ids itself.
    pub fn job_id_for(&self, task_id: &str) -> Option<uuid::Uuid> {
        self.inner.lock().tasks.get(task_id).map(|t| t.job.id)
    }

    /// Marks `task_id` ASSIGNED to `worker_id`; called by the worker
    /// pool once it has committed to dispatching this task there.
    pub fn mark_assigned(&self, task_id: &str, worker_id: WorkerId) {
        let mut inner = self.inner.lock();
        if let Some(task) = inner.tasks.get_mut(task_id) {
            let old = task.state;
            task.state = TaskState::Assigned;
            task.worker = Some(worker_id);
            task.job.record_task_transition(old, TaskState::Assigned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;
    use std::sync::atomic::AtomicBool;

    fn pool() -> (LazyTaskPool, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let names = Arc::new(GlobalNameDirectory::new(bus.clone()));
        (LazyTaskPool::new(bus.clone(), names), bus)
    }

    fn job(root_task_id: &str) -> Arc<Job> {
        Arc::new(Job::new(
            uuid::Uuid::new_v4(),
            root_task_id.to_string(),
            Arc::new(AtomicBool::new(false)),
            10,
        ))
    }

    #[test]
    fn single_task_job_completes_on_commit() {
        let (pool, _bus) = pool();
        let j = job("root:j0");
        let root = Task::new("root:j0".into(), j.clone(), "noop".into(), vec![1], HashMap::new());
        pool.add_task(root, true);

        assert_eq!(pool.task_state("root:j0"), Some(TaskState::Queued));

        let popped = pool.pop_runnable().unwrap();
        assert_eq!(popped, "root:j0");
        pool.mark_assigned("root:j0", 7);

        let mut bindings = HashMap::new();
        bindings.insert(
            1,
            vec![Reference::Concrete {
                id: 1,
                size_hint: None,
                location_hints: [("w0".to_string(), "store".to_string())].into_iter().collect(),
                provenance: crate::reference::Provenance {
                    task_id: "root:j0".into(),
                    output_index: 0,
                },
            }],
        );
        pool.task_completed("root:j0", bindings);

        assert_eq!(j.state(), crate::job::JobState::Completed);
        assert_eq!(j.result_ref().unwrap().id(), 1);
    }

    #[test]
    fn chain_unblocks_consumer_when_dependency_commits() {
        let (pool, _bus) = pool();
        let j = job("root:j1");

        let mut deps = HashMap::new();
        deps.insert(
            "x".to_string(),
            Reference::Future {
                id: 2,
                provenance: crate::reference::Provenance {
                    task_id: "t1".into(),
                    output_index: 0,
                },
            },
        );
        let root = Task::new("root:j1".into(), j.clone(), "noop".into(), vec![1], deps);
        pool.add_task(root, true);

        assert_eq!(pool.task_state("root:j1"), Some(TaskState::Blocking));
        assert_eq!(pool.pop_runnable(), None);

        let child = Task::new("t1".into(), j.clone(), "noop".into(), vec![2], HashMap::new());
        pool.add_task(child, false);

        assert_eq!(pool.task_state("t1"), Some(TaskState::Queued));
        let popped = pool.pop_runnable().unwrap();
        assert_eq!(popped, "t1");

        let mut bindings = HashMap::new();
        bindings.insert(
            2,
            vec![Reference::Concrete {
                id: 2,
                size_hint: None,
                location_hints: [("w0".to_string(), "store".to_string())].into_iter().collect(),
                provenance: crate::reference::Provenance {
                    task_id: "t1".into(),
                    output_index: 0,
                },
            }],
        );
        pool.task_completed("t1", bindings);

        assert_eq!(pool.task_state("root:j1"), Some(TaskState::Queued));
    }

    #[test]
    fn worker_failure_retries_then_terminates_after_three_attempts() {
        let (pool, _bus) = pool();
        let j = job("root:j2");
        let root = Task::new("root:j2".into(), j.clone(), "noop".into(), vec![1], HashMap::new());
        pool.add_task(root, true);
        pool.pop_runnable();

        for _ in 0..3 {
            pool.task_failed("root:j2", TaskFailureReason::WorkerFailed);
            assert_eq!(j.state(), crate::job::JobState::Active);
            pool.pop_runnable();
        }

        pool.task_failed("root:j2", TaskFailureReason::WorkerFailed);
        assert_eq!(j.state(), crate::job::JobState::Failed);
    }

    #[test]
    fn missing_input_blacklists_reported_endpoint_but_keeps_others() {
        let (pool, _bus) = pool();
        let j = job("root:j3");

        let mut deps = HashMap::new();
        deps.insert(
            "x".to_string(),
            Reference::Future {
                id: 2,
                provenance: crate::reference::Provenance {
                    task_id: "t1".into(),
                    output_index: 0,
                },
            },
        );
        let root = Task::new("root:j3".into(), j.clone(), "noop".into(), vec![1], deps);
        pool.add_task(root, true);

        let child = Task::new("t1".into(), j.clone(), "noop".into(), vec![2], HashMap::new());
        pool.add_task(child, false);
        pool.pop_runnable();

        let mut bindings = HashMap::new();
        bindings.insert(
            2,
            vec![Reference::Concrete {
                id: 2,
                size_hint: None,
                location_hints: [
                    ("w0".to_string(), "store".to_string()),
                    ("w1".to_string(), "store".to_string()),
                ]
                .into_iter()
                .collect(),
                provenance: crate::reference::Provenance {
                    task_id: "t1".into(),
                    output_index: 0,
                },
            }],
        );
        pool.task_completed("t1", bindings);

        assert_eq!(pool.pop_runnable(), Some("root:j3".to_string()));
        pool.mark_assigned("root:j3", 9);

        let detail = Reference::Concrete {
            id: 2,
            size_hint: None,
            location_hints: [("w0".to_string(), "store".to_string())].into_iter().collect(),
            provenance: crate::reference::Provenance {
                task_id: "t1".into(),
                output_index: 0,
            },
        };
        pool.task_failed(
            "root:j3",
            TaskFailureReason::MissingInput {
                detail: Some(detail),
            },
        );

        assert_eq!(pool.task_state("root:j3"), Some(TaskState::Queued));
        let inputs = pool.inputs_for("root:j3");
        match inputs.get("x").unwrap() {
            Reference::Concrete { location_hints, .. } => {
                assert_eq!(location_hints.len(), 1);
                assert!(location_hints.contains_key("w1"));
            }
            _ => panic!("expected Concrete"),
        }
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::job::Job;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicBool;

    fn pool() -> LazyTaskPool {
        let bus = Arc::new(EventBus::new());
        let names = Arc::new(GlobalNameDirectory::new(bus.clone()));
        LazyTaskPool::new(bus, names)
    }

    proptest! {
        /// Admitting a root task plus N independent, dependency-free
        /// children never loses or double-counts a task: the sum of
        /// task_state_counts always equals the number of tasks admitted
        /// to the job, whatever state each ends up in.
        #[test]
        fn task_state_counts_sum_matches_admitted_tasks(num_children in 0usize..20) {
            let pool = pool();
            let job = Arc::new(Job::new(
                uuid::Uuid::new_v4(),
                "root:p0".into(),
                Arc::new(AtomicBool::new(false)),
                10,
            ));
            let root = Task::new("root:p0".into(), job.clone(), "noop".into(), vec![1], HashMap::new());
            pool.add_task(root, true);

            for i in 0..num_children {
                let child = Task::new(
                    format!("child:{i}"),
                    job.clone(),
                    "noop".into(),
                    vec![(i as u64) + 2],
                    HashMap::new(),
                );
                pool.add_task(child, false);
            }

            let counts = job.task_state_counts();
            let total: usize = counts.values().sum();
            prop_assert_eq!(total, num_children + 1);
        }
    }
}
