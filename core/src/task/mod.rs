//! Task execution engine
//!
//! This module orchestrates one logical task across detached OS processes:
//! deriving a stable identity, double-forking a worker (and optionally a
//! progress publisher), publishing status transitions through the IPC
//! store, and cancelling or cleaning up the whole group.
//!
//! ## Execution protocol
//!
//! ```text
//! caller ── execute() ── fork ──▶ worker ──(optional fork)──▶ publisher
//!   │                              │                             │
//!   returns immediately            │ Running + pid → store       │ pid → store
//!                                  │ pre-hook, work, post-hook   │ sleep, hook, repeat
//!                                  │ kill publisher              │ (until killed)
//!                                  │ Finished → store, cleanup
//! ```
//!
//! The caller never blocks: after the fork the parent branch returns and
//! every subsequent observation (`status`, `wait`, `cancel`) goes through
//! the IPC store and the PID registry, so it works from unrelated process
//! invocations that share the same identity.
//!
//! Status is only observed `Running`/`Finished`/`Canceled` after the
//! owning process durably wrote it; a caller polling right after
//! `execute` returns may still see `Pending` for a short window.

use crate::config::TaskConfig;
use crate::process::{self, ForkRole};
use crate::registry::PidRegistry;
use crate::{CoreError, Result};
use ipc::{IpcStore, SharedMemoryStore, TaskIdentity, TaskOrigin, PUBLISHER_PID_KEY};
use schema::{Params, PidFilter, ProcessKind, TaskStatus};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error};

/// Default minimum microseconds between progress-hook invocations
pub const DEFAULT_PROGRESS_DELAY_MICROS: u64 = 1_000_000;

/// Sleep between poll attempts while waiting on a worker pid
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

type WorkFn = Box<dyn FnMut(Params) -> Value + Send>;
type PreExecuteFn = Box<dyn FnMut(&mut Params) + Send>;
type PostExecuteFn = Box<dyn FnMut(&Value) + Send>;
type CancelFn = Box<dyn FnMut() + Send>;
type ProgressFn = Box<dyn FnMut() + Send>;

/// What a task does: the required work function plus optional callback
/// slots.
///
/// The presence of `publish_progress` is what enables the second fork — a
/// definition without it never creates a publisher process.
pub struct TaskDefinition {
    work: WorkFn,
    pre_execute: Option<PreExecuteFn>,
    post_execute: Option<PostExecuteFn>,
    on_cancelled: Option<CancelFn>,
    publish_progress: Option<ProgressFn>,
}

impl TaskDefinition {
    /// Create a definition from the required work function
    pub fn new(work: impl FnMut(Params) -> Value + Send + 'static) -> Self {
        Self {
            work: Box::new(work),
            pre_execute: None,
            post_execute: None,
            on_cancelled: None,
            publish_progress: None,
        }
    }

    /// Hook run in the worker before the work function; may rewrite or
    /// replace the parameter bag
    pub fn pre_execute(mut self, hook: impl FnMut(&mut Params) + Send + 'static) -> Self {
        self.pre_execute = Some(Box::new(hook));
        self
    }

    /// Hook run in the worker with the work function's result
    pub fn post_execute(mut self, hook: impl FnMut(&Value) + Send + 'static) -> Self {
        self.post_execute = Some(Box::new(hook));
        self
    }

    /// Hook run by the cancelling process before the worker is killed
    pub fn on_cancelled(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.on_cancelled = Some(Box::new(hook));
        self
    }

    /// Progress hook, invoked periodically from a dedicated publisher
    /// process for as long as the worker runs
    pub fn publish_progress(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.publish_progress = Some(Box::new(hook));
        self
    }

    /// Whether this definition publishes progress
    pub fn has_progress(&self) -> bool {
        self.publish_progress.is_some()
    }
}

impl std::fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("pre_execute", &self.pre_execute.is_some())
            .field("post_execute", &self.post_execute.is_some())
            .field("on_cancelled", &self.on_cancelled.is_some())
            .field("publish_progress", &self.publish_progress.is_some())
            .finish()
    }
}

/// One execute-able occurrence of a task definition.
///
/// Construction derives the identity, initializes the store, and writes
/// `Pending`; `execute` forks the worker. Any process that constructs a
/// task with the same origin and ordinal shares the same store namespace
/// and can observe, wait on, or cancel the run.
pub struct AsyncTask<S: IpcStore = SharedMemoryStore> {
    definition: TaskDefinition,
    store: S,
    registry: PidRegistry,
    identity: TaskIdentity,
    title: String,
    progress_delay_micros: u64,
}

impl AsyncTask<SharedMemoryStore> {
    /// Create a task over the shared-memory reference backing.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity cannot be derived or the store
    /// cannot be initialized.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use forktask_core::{AsyncTask, Params, TaskDefinition};
    /// use ipc::TaskOrigin;
    /// use serde_json::json;
    ///
    /// let definition = TaskDefinition::new(|_params| json!("done"));
    /// let mut task = AsyncTask::new(definition, TaskOrigin::new(file!(), line!()), 0)?;
    /// task.execute(Params::new())?;
    /// # Ok::<(), forktask_core::CoreError>(())
    /// ```
    pub fn new(definition: TaskDefinition, origin: TaskOrigin, ordinal: u32) -> Result<Self> {
        Self::with_store(SharedMemoryStore::new(), definition, origin, ordinal)
    }
}

impl<S: IpcStore> AsyncTask<S> {
    /// Create a task over an explicit store backing.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity cannot be derived or the store
    /// cannot be initialized.
    pub fn with_store(
        mut store: S,
        definition: TaskDefinition,
        origin: TaskOrigin,
        ordinal: u32,
    ) -> Result<Self> {
        let identity = TaskIdentity::derive(&origin, ordinal)?;
        store.bind(identity);
        store.initialize()?;
        store.set_status(TaskStatus::Pending)?;

        Ok(Self {
            definition,
            store,
            registry: PidRegistry::system(),
            identity,
            title: String::new(),
            progress_delay_micros: DEFAULT_PROGRESS_DELAY_MICROS,
        })
    }

    /// Use an explicit PID registry instead of the system one
    pub fn with_registry(mut self, registry: PidRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Apply a validated configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn configure(&mut self, config: &TaskConfig) -> Result<()> {
        config.validate()?;
        if let Some(title) = &config.title {
            self.title = title.clone();
        }
        self.progress_delay_micros = config.progress_delay_micros;
        Ok(())
    }

    /// Launch the task in a detached worker process.
    ///
    /// The calling process returns immediately after the fork; the worker
    /// publishes `Running`, runs the hooks and the work function, then
    /// publishes `Finished` and cleans up after itself.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::AlreadyRunning`] (no state mutated) if a
    /// previous run has not completed, or with a process-control error if
    /// the execute protocol cannot be set up.
    pub fn execute(&mut self, params: Params) -> Result<()> {
        if self.status() == TaskStatus::Running {
            return Err(CoreError::AlreadyRunning);
        }

        process::detach()?;

        match process::fork() {
            ForkRole::Parent { child } => {
                debug!("Worker {} detached for task {}", child, self.identity.id());
                Ok(())
            }
            ForkRole::Child => self.run_worker(params),
        }
    }

    /// Cancel the current run, killing the worker and any publisher.
    ///
    /// Returns `Ok(true)` immediately when there is nothing to cancel. The
    /// `on_cancelled` hook runs in the cancelling process — the worker is
    /// killed forcefully and gets no opportunity to react.
    ///
    /// # Errors
    ///
    /// Returns an error if the `Canceled` status cannot be written.
    pub fn cancel(&mut self) -> Result<bool> {
        let Some(worker_pid) = self.store.worker_pid() else {
            return Ok(true);
        };

        if let Some(hook) = self.definition.on_cancelled.as_mut() {
            hook();
        }

        self.registry.remove(worker_pid, ProcessKind::Worker);
        process::kill(&self.registry, worker_pid);

        if let Some(publisher_pid) = self.store.publisher_pid() {
            self.registry.remove(publisher_pid, ProcessKind::Publisher);
            process::kill(&self.registry, publisher_pid);
            self.store.remove(PUBLISHER_PID_KEY);
        }

        self.store.set_status(TaskStatus::Canceled)?;
        self.store.clear_worker_pid();

        let group_is_idle = self.registry.open_pids(PidFilter::Worker, false).is_empty()
            && self
                .registry
                .open_pids(PidFilter::Publisher, false)
                .is_empty();
        self.store.teardown(group_is_idle);

        debug!("Cancelled task {}", self.identity.id());
        Ok(true)
    }

    /// Current status as recorded in the store; `Undefined` if the store
    /// holds no status for this identity
    pub fn status(&self) -> TaskStatus {
        self.store.status()
    }

    /// Whether the task was cancelled before completing normally
    pub fn is_cancelled(&self) -> bool {
        self.status() == TaskStatus::Canceled
    }

    /// Block until the recorded worker pid is no longer running.
    ///
    /// Polls with a short sleep between attempts; returns immediately when
    /// no worker pid is recorded, and never hangs on pids from foreign
    /// process trees.
    pub fn wait(&self) -> bool {
        let Some(pid) = self.store.worker_pid() else {
            return true;
        };

        loop {
            if process::try_wait(pid) {
                return true;
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// The configured process title
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Set the process title applied to the worker (and, suffixed, to the
    /// publisher)
    pub fn set_title(&mut self, title: impl Into<String>) -> &mut Self {
        self.title = title.into();
        self
    }

    /// Minimum microseconds between progress-hook invocations
    pub fn progress_delay_micros(&self) -> u64 {
        self.progress_delay_micros
    }

    /// Set the minimum microseconds between progress-hook invocations
    pub fn set_progress_delay_micros(&mut self, micros: u64) -> &mut Self {
        self.progress_delay_micros = micros;
        self
    }

    /// The derived task identity
    pub fn identity(&self) -> &TaskIdentity {
        &self.identity
    }

    /// The caller-supplied instance ordinal
    pub fn ordinal(&self) -> u32 {
        self.identity.ordinal()
    }

    /// The store this task publishes through
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the store (status probes, tests)
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Worker branch of `execute`; never returns.
    fn run_worker(&mut self, params: Params) -> Result<()> {
        match self.worker_protocol(params) {
            Ok(()) => std::process::exit(0),
            Err(e) => {
                // The store keeps whatever was last written (usually
                // Running); it must not claim a terminal status here.
                error!("Worker for task {} failed: {}", self.identity.id(), e);
                std::process::exit(1);
            }
        }
    }

    fn worker_protocol(&mut self, mut params: Params) -> Result<()> {
        self.store.initialize()?;
        self.store.set_status(TaskStatus::Running)?;

        let worker_pid = process::current_pid();
        self.store.record_worker_pid(worker_pid)?;

        if !self.title.is_empty() {
            process::set_title(&self.title)?;
        }

        self.registry.create(
            worker_pid,
            &format!("{}:{}", self.store.backend_name(), self.identity.id()),
            ProcessKind::Worker,
        )?;

        if self.definition.has_progress() && process::fork().is_child() {
            self.run_publisher();
        }

        if let Some(hook) = self.definition.pre_execute.as_mut() {
            hook(&mut params);
        }

        let result = (self.definition.work)(params);

        if let Some(hook) = self.definition.post_execute.as_mut() {
            hook(&result);
        }

        if let Some(publisher_pid) = self.store.publisher_pid() {
            if publisher_pid > 0 {
                self.registry.remove(publisher_pid, ProcessKind::Publisher);
                process::kill(&self.registry, publisher_pid);
            }
        }

        self.store.set_status(TaskStatus::Finished)?;
        self.store.clear_worker_pid();
        self.registry.remove(worker_pid, ProcessKind::Worker);

        // Best-effort group cleanup: racing completions may both observe an
        // idle group; segment removal is idempotent either way
        let group_is_idle = self.registry.open_pids(PidFilter::Worker, false).is_empty();
        self.store.teardown(group_is_idle);

        Ok(())
    }

    /// Publisher branch of the worker's fork; never returns.
    ///
    /// Records its own pid, registers its marker, then invokes the
    /// progress hook at the configured cadence until killed.
    fn run_publisher(&mut self) -> ! {
        let publisher_pid = process::current_pid();

        if let Err(e) = self.publisher_setup(publisher_pid) {
            error!(
                "Publisher for task {} failed to start: {}",
                self.identity.id(),
                e
            );
            std::process::exit(1);
        }

        let delay = Duration::from_micros(self.progress_delay_micros);
        loop {
            std::thread::sleep(delay);
            if let Some(hook) = self.definition.publish_progress.as_mut() {
                hook();
            }
        }
    }

    fn publisher_setup(&mut self, publisher_pid: u32) -> Result<()> {
        self.store.record_publisher_pid(publisher_pid)?;

        if !self.title.is_empty() {
            process::set_title(&format!("{} (progress)", self.title))?;
        }

        self.registry
            .create(publisher_pid, "", ProcessKind::Publisher)?;
        Ok(())
    }
}

impl<S: IpcStore> std::fmt::Debug for AsyncTask<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncTask")
            .field("identity", &self.identity)
            .field("title", &self.title)
            .field("progress_delay_micros", &self.progress_delay_micros)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipc::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn noop_definition() -> TaskDefinition {
        TaskDefinition::new(|_| Value::Null)
    }

    fn memory_task(locator: u32, ordinal: u32) -> AsyncTask<MemoryStore> {
        let origin = TaskOrigin::new(std::env::temp_dir(), locator);
        AsyncTask::with_store(MemoryStore::new(), noop_definition(), origin, ordinal)
            .expect("task construction")
    }

    #[test]
    fn construction_initializes_to_pending() {
        let task = memory_task(1, 0);
        assert_eq!(task.status(), TaskStatus::Pending);
        assert!(!task.is_cancelled());
    }

    #[test]
    fn ordinals_share_definition_key_but_not_id() {
        let a = memory_task(2, 0);
        let b = memory_task(2, 1);

        assert_ne!(a.identity().id(), b.identity().id());
        assert_eq!(
            a.identity().definition_key(),
            b.identity().definition_key()
        );
        assert_eq!(a.ordinal(), 0);
        assert_eq!(b.ordinal(), 1);
    }

    #[test]
    fn execute_while_running_is_rejected() {
        let dir = tempdir().unwrap();
        let mut task = memory_task(3, 0).with_registry(PidRegistry::in_dir(dir.path()));

        task.store_mut().set_status(TaskStatus::Running).unwrap();

        let err = task.execute(Params::new()).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyRunning));
        // No state mutated: still Running, no pids recorded
        assert_eq!(task.status(), TaskStatus::Running);
        assert_eq!(task.store().worker_pid(), None);
    }

    #[test]
    fn cancel_without_a_worker_is_a_successful_noop() {
        let dir = tempdir().unwrap();
        let mut task = memory_task(4, 0).with_registry(PidRegistry::in_dir(dir.path()));

        assert!(task.cancel().unwrap());
        // Nothing to cancel, nothing transitioned
        assert_eq!(task.status(), TaskStatus::Pending);
    }

    #[test]
    fn cancel_runs_hook_and_transitions_to_canceled() {
        let dir = tempdir().unwrap();
        let cancelled = Arc::new(AtomicUsize::new(0));
        let observer = Arc::clone(&cancelled);

        let definition = TaskDefinition::new(|_| Value::Null)
            .on_cancelled(move || {
                observer.fetch_add(1, Ordering::SeqCst);
            });

        let origin = TaskOrigin::new(std::env::temp_dir(), 5);
        let mut task = AsyncTask::with_store(MemoryStore::new(), definition, origin, 0)
            .unwrap()
            .with_registry(PidRegistry::in_dir(dir.path()));

        // Simulate a live run with a pid that is long gone
        task.store_mut().set_status(TaskStatus::Running).unwrap();
        task.store_mut().record_worker_pid(999_999).unwrap();

        assert!(task.cancel().unwrap());
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
        assert!(task.is_cancelled());
        assert_eq!(task.store().worker_pid(), None);
    }

    #[test]
    fn title_and_progress_delay_accessors() {
        let mut task = memory_task(6, 0);

        assert_eq!(task.title(), "");
        assert_eq!(task.progress_delay_micros(), 1_000_000);

        task.set_title("indexer").set_progress_delay_micros(777);
        assert_eq!(task.title(), "indexer");
        assert_eq!(task.progress_delay_micros(), 777);
    }

    #[test]
    fn configure_applies_validated_settings() {
        let mut task = memory_task(7, 0);

        let config = TaskConfig {
            title: Some("batch".to_string()),
            progress_delay_micros: 2_000,
        };
        task.configure(&config).unwrap();
        assert_eq!(task.title(), "batch");
        assert_eq!(task.progress_delay_micros(), 2_000);

        let invalid = TaskConfig {
            title: None,
            progress_delay_micros: 0,
        };
        assert!(task.configure(&invalid).is_err());
        // Rejected configuration leaves settings untouched
        assert_eq!(task.progress_delay_micros(), 2_000);
    }

    #[test]
    fn definition_reports_progress_capability() {
        assert!(!noop_definition().has_progress());

        let with_progress = TaskDefinition::new(|_| Value::Null).publish_progress(|| {});
        assert!(with_progress.has_progress());
    }

    #[test]
    fn definition_hooks_are_optional_slots() {
        let definition = TaskDefinition::new(|params: Params| {
            json!(params.len())
        })
        .pre_execute(|params| {
            params.set("injected", true);
        })
        .post_execute(|_result| {});

        let debug = format!("{:?}", definition);
        assert!(debug.contains("pre_execute: true"));
        assert!(debug.contains("publish_progress: false"));
    }
}
