//! FlowDriver - runs one flow instance through its definition.
//!
//! # Lifecycle
//! - `run_flow`: Created -> Running, starting at the definition's first step
//! - a step answering with an edge moves the flow on immediately
//! - a step that launched tasks suspends the flow until its callback handler
//!   decides; the decision resumes the flow on a runtime task
//! - `pause`: Running -> Paused, aborting the step's workers
//! - `resume`: reloads the record from the store and drives again
//!
//! # Exclusivity
//! The driver holds a lease from the `LockService` while it advances the flow
//! and gives it back whenever the flow suspends, pauses or completes.
//!
//! # Stale activations
//! Every task launch, decision and pause bumps the runtime epoch. Updates and
//! decisions carry the epoch of the activation that produced them; anything
//! from an older epoch is dropped.
//!
//! # Store failures
//! A step update that cannot be saved fails the active step with the store
//! error. Failed saves elsewhere are returned to the caller.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use super::definition::FlowDefinition;
use crate::domain::{
    FlowError, FlowId, FlowRecord, FlowResult, FlowState, LogEntry, StepLog, StepTransition,
    TaskEvent,
};
use crate::impls::{InMemoryFlowStore, InMemoryLockService};
use crate::ports::{Clock, FlowStore, IdGenerator, Lease, LockService, SystemClock, UlidGenerator};
use crate::step::{CallbackLoop, StepContext, StepLaunch, StepListener, StepUpdate};
use crate::worker::BatchWorker;

/// Wires a [`FlowDriver`] to its collaborators.
///
/// Anything not supplied falls back to the in-memory store and lock service,
/// the system clock and ULID ids.
pub struct FlowDriverBuilder {
    definition: Arc<FlowDefinition>,
    store: Option<Arc<dyn FlowStore>>,
    locks: Option<Arc<dyn LockService>>,
    clock: Option<Arc<dyn Clock>>,
    id_gen: Option<Arc<dyn IdGenerator>>,
}

impl FlowDriverBuilder {
    pub fn store(mut self, store: Arc<dyn FlowStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn locks(mut self, locks: Arc<dyn LockService>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, id_gen: Arc<dyn IdGenerator>) -> Self {
        self.id_gen = Some(id_gen);
        self
    }

    /// Create and persist a new flow instance.
    pub async fn create(self) -> Result<FlowDriver, FlowError> {
        let (definition, store, locks, clock, id_gen) = self.parts();
        let flow_id = id_gen.generate_flow_id();
        let record = FlowRecord::new(flow_id, definition.flow_type(), clock.now());
        store.save(&record).await?;
        info!(flow_id = %flow_id, flow_type = %definition.flow_type(), "flow created");
        Ok(FlowDriver::from_record(definition, store, locks, clock, record))
    }

    /// Attach to a flow already in the store.
    pub async fn load(self, flow_id: FlowId) -> Result<FlowDriver, FlowError> {
        let (definition, store, locks, clock, _) = self.parts();
        let record = store
            .find_by_id(flow_id)
            .await?
            .ok_or(FlowError::NoSuchFlow(flow_id))?;
        if record.flow_type != definition.flow_type() {
            return Err(FlowError::InvalidState(format!(
                "flow {flow_id} is a '{}' flow, not '{}'",
                record.flow_type,
                definition.flow_type()
            )));
        }
        Ok(FlowDriver::from_record(definition, store, locks, clock, record))
    }

    #[allow(clippy::type_complexity)]
    fn parts(
        self,
    ) -> (
        Arc<FlowDefinition>,
        Arc<dyn FlowStore>,
        Arc<dyn LockService>,
        Arc<dyn Clock>,
        Arc<dyn IdGenerator>,
    ) {
        (
            self.definition,
            self.store
                .unwrap_or_else(|| Arc::new(InMemoryFlowStore::new())),
            self.locks
                .unwrap_or_else(|| Arc::new(InMemoryLockService::new())),
            self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            self.id_gen
                .unwrap_or_else(|| Arc::new(UlidGenerator::new(SystemClock))),
        )
    }
}

/// Workers and callback loop of the step the flow is waiting on.
struct ActiveStep {
    step: String,
    batch: AbortHandle,
    callback: AbortHandle,
}

impl ActiveStep {
    fn abort(self) {
        self.batch.abort();
        self.callback.abort();
    }
}

struct Runtime {
    record: FlowRecord,
    epoch: u64,
    lease: Option<Lease>,
    active: Option<ActiveStep>,
    watchdog: Option<AbortHandle>,
}

struct Inner {
    definition: Arc<FlowDefinition>,
    store: Arc<dyn FlowStore>,
    locks: Arc<dyn LockService>,
    clock: Arc<dyn Clock>,
    flow_id: FlowId,
    state: watch::Sender<FlowState>,
    runtime: Mutex<Runtime>,
}

/// Handle to one flow instance. Cheap to clone.
#[derive(Clone)]
pub struct FlowDriver {
    inner: Arc<Inner>,
}

impl fmt::Debug for FlowDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowDriver")
            .field("flow_id", &self.inner.flow_id)
            .field("flow_type", &self.inner.definition.flow_type())
            .field("state", &self.state())
            .finish()
    }
}

impl FlowDriver {
    pub fn builder(definition: Arc<FlowDefinition>) -> FlowDriverBuilder {
        FlowDriverBuilder {
            definition,
            store: None,
            locks: None,
            clock: None,
            id_gen: None,
        }
    }

    fn from_record(
        definition: Arc<FlowDefinition>,
        store: Arc<dyn FlowStore>,
        locks: Arc<dyn LockService>,
        clock: Arc<dyn Clock>,
        record: FlowRecord,
    ) -> Self {
        let (state, _) = watch::channel(record.state);
        Self {
            inner: Arc::new(Inner {
                definition,
                store,
                locks,
                clock,
                flow_id: record.flow_id,
                state,
                runtime: Mutex::new(Runtime {
                    record,
                    epoch: 0,
                    lease: None,
                    active: None,
                    watchdog: None,
                }),
            }),
        }
    }

    pub fn flow_id(&self) -> FlowId {
        self.inner.flow_id
    }

    pub fn definition(&self) -> &Arc<FlowDefinition> {
        &self.inner.definition
    }

    pub fn state(&self) -> FlowState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<FlowState> {
        self.inner.state.subscribe()
    }

    /// Snapshot of the flow record.
    pub async fn record(&self) -> FlowRecord {
        self.inner.runtime.lock().await.record.clone()
    }

    pub async fn progress(&self) -> f64 {
        let rt = self.inner.runtime.lock().await;
        self.inner.definition.progress(&rt.record)
    }

    /// Persisted step logs, oldest first.
    pub async fn step_logs(&self) -> Result<Vec<StepLog>, FlowError> {
        Ok(self.inner.store.find_by_flow_id(self.inner.flow_id).await?)
    }

    pub async fn wait_for_state(&self, state: FlowState) -> Result<(), FlowError> {
        let mut rx = self.subscribe();
        rx.wait_for(|s| *s == state)
            .await
            .map(|_| ())
            .map_err(|_| FlowError::InvalidState("flow driver dropped".to_string()))
    }

    /// Wait until the flow is Paused or Completed.
    pub async fn wait_until_settled(&self) -> Result<FlowState, FlowError> {
        let mut rx = self.subscribe();
        rx.wait_for(|s| s.is_settled())
            .await
            .map(|s| *s)
            .map_err(|_| FlowError::InvalidState("flow driver dropped".to_string()))
    }

    /// Start a Created flow at its first step.
    ///
    /// Returns once the flow settles or suspends on launched tasks; use
    /// [`FlowDriver::wait_until_settled`] to wait for the end.
    pub async fn run_flow(&self) -> Result<(), FlowError> {
        {
            let mut rt = self.inner.runtime.lock().await;
            if rt.record.state != FlowState::Created {
                return Err(FlowError::InvalidState(format!(
                    "flow {} is {:?}, expected Created",
                    self.inner.flow_id, rt.record.state
                )));
            }
            self.acquire_lease(&mut rt).await?;
            rt.record.start(self.inner.definition.first_step());
            info!(
                flow_id = %self.inner.flow_id,
                flow_type = %self.inner.definition.flow_type(),
                step = ?rt.record.current_step,
                "flow started"
            );
            self.arm_watchdog(&mut rt);
            self.persist(&mut rt).await?;
        }
        self.drive().await
    }

    /// Continue a Paused (or failed) flow from the stored record.
    pub async fn resume(&self) -> Result<(), FlowError> {
        {
            let mut rt = self.inner.runtime.lock().await;
            if rt.lease.is_some() || rt.active.is_some() {
                return Err(FlowError::InvalidState(format!(
                    "flow {} is already running",
                    self.inner.flow_id
                )));
            }
            let record = self
                .inner
                .store
                .find_by_id(self.inner.flow_id)
                .await?
                .ok_or(FlowError::NoSuchFlow(self.inner.flow_id))?;
            match record.state {
                FlowState::Created => {
                    return Err(FlowError::InvalidState(format!(
                        "flow {} was never started",
                        self.inner.flow_id
                    )));
                }
                FlowState::Completed if record.result == FlowResult::Success => {
                    return Err(FlowError::InvalidState(format!(
                        "flow {} already completed successfully",
                        self.inner.flow_id
                    )));
                }
                _ => {}
            }

            self.acquire_lease(&mut rt).await?;
            rt.record = record;
            rt.epoch += 1;
            rt.record.set_result(FlowResult::Unknown);
            rt.record.start(self.inner.definition.first_step());
            info!(flow_id = %self.inner.flow_id, step = ?rt.record.current_step, "flow resumed");
            self.arm_watchdog(&mut rt);
            self.persist(&mut rt).await?;
        }
        self.drive().await
    }

    /// Stop driving the flow. Tasks of the active step are aborted and their
    /// late results ignored.
    pub async fn pause(&self) -> Result<(), FlowError> {
        let mut rt = self.inner.runtime.lock().await;
        match rt.record.state {
            FlowState::Running => {}
            FlowState::Paused => return Ok(()),
            other => {
                return Err(FlowError::InvalidState(format!(
                    "cannot pause flow {} in state {other:?}",
                    self.inner.flow_id
                )));
            }
        }

        rt.epoch += 1;
        if let Some(active) = rt.active.take() {
            debug!(flow_id = %self.inner.flow_id, step = %active.step, "aborting active step");
            active.abort();
        }
        rt.record.pause();
        info!(flow_id = %self.inner.flow_id, step = ?rt.record.current_step, "flow paused");
        let saved = self.persist(&mut rt).await;
        self.settle(&mut rt).await;
        saved
    }

    /// Point a flow that is not running at `step`; the next resume starts
    /// there.
    pub async fn set_current_step(&self, step: &str) -> Result<(), FlowError> {
        if !self.inner.definition.has_step(step) {
            return Err(FlowError::StepNotFound(step.to_string()));
        }
        let mut rt = self.inner.runtime.lock().await;
        if rt.record.state == FlowState::Running {
            return Err(FlowError::InvalidState(format!(
                "pause flow {} before moving it",
                self.inner.flow_id
            )));
        }
        info!(flow_id = %self.inner.flow_id, step, "current step set by operator");
        rt.record.set_current_step(step);
        self.persist(&mut rt).await
    }

    /// Run steps until the flow settles or suspends on launched tasks.
    async fn drive(&self) -> Result<(), FlowError> {
        loop {
            let (step_id, snapshot, epoch) = {
                let rt = self.inner.runtime.lock().await;
                if rt.record.state != FlowState::Running || rt.active.is_some() {
                    return Ok(());
                }
                let Some(step_id) = rt.record.current_step.clone() else {
                    return Err(FlowError::InvalidState(format!(
                        "running flow {} has no current step",
                        self.inner.flow_id
                    )));
                };
                (step_id, rt.record.clone(), rt.epoch)
            };

            let mut ctx = StepContext::new(step_id.clone(), snapshot);
            let outcome = match self.inner.definition.step(&step_id) {
                Ok(step) => {
                    debug!(flow_id = %self.inner.flow_id, step = %step_id, "executing step");
                    step.execution.execute(&mut ctx).await
                }
                Err(err) => Err(err),
            };

            let mut rt = self.inner.runtime.lock().await;
            if rt.epoch != epoch || rt.record.state != FlowState::Running {
                debug!(flow_id = %self.inner.flow_id, step = %step_id, "flow changed while step ran, dropping outcome");
                return Ok(());
            }

            match outcome {
                Ok(transition) if transition.is_edge() => {
                    self.apply_edge(&mut rt, &step_id, transition);
                }
                Ok(transition) => {
                    self.log_step(&mut rt, &step_id, transition.log);
                    match ctx.take_launch() {
                        Some(launch) => self.launch(&mut rt, &step_id, launch),
                        None => warn!(
                            flow_id = %self.inner.flow_id,
                            step = %step_id,
                            "step returned NOOP without launching tasks, flow waits for resume"
                        ),
                    }
                    let saved = self.persist(&mut rt).await;
                    self.release_lease(&mut rt).await;
                    return saved;
                }
                Err(err) => self.route_error(&mut rt, &step_id, err),
            }

            self.persist(&mut rt).await?;
            if rt.record.state != FlowState::Running {
                self.settle(&mut rt).await;
                return Ok(());
            }
        }
    }

    /// Start the step's batch and the loop that waits for its decision.
    fn launch(&self, rt: &mut Runtime, step_id: &str, launch: StepLaunch) {
        rt.epoch += 1;
        let epoch = rt.epoch;
        let StepLaunch { batch, handler } = launch;
        info!(
            flow_id = %self.inner.flow_id,
            step = step_id,
            tasks = batch.len(),
            "step launched tasks"
        );
        self.log_step(
            rt,
            step_id,
            vec![LogEntry::new(format!("launched {} task(s)", batch.len()), None)],
        );

        let (events, rx) = mpsc::unbounded_channel();
        let batch = tokio::spawn(BatchWorker::new(batch, events).run());

        let listener: Arc<dyn StepListener> = Arc::new(ActiveStepListener {
            driver: self.clone(),
            epoch,
        });
        let callback_loop = CallbackLoop::new(step_id, handler, listener);
        let callback = tokio::spawn(self.clone().await_decision(
            step_id.to_string(),
            epoch,
            callback_loop,
            rx,
        ));

        rt.active = Some(ActiveStep {
            step: step_id.to_string(),
            batch: batch.abort_handle(),
            callback: callback.abort_handle(),
        });
    }

    /// Boxed so the spawned future does not name `drive`'s own future type.
    fn await_decision(
        self,
        step_id: String,
        epoch: u64,
        callback: CallbackLoop,
        rx: mpsc::UnboundedReceiver<TaskEvent>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            // a closed channel with a live epoch means every task reported
            // and the handler still had no edge
            let outcome = callback.run(rx).await.unwrap_or_else(|| {
                Err(FlowError::InvalidState(format!(
                    "tasks of step '{step_id}' finished without a transition"
                )))
            });
            if let Err(err) = self.on_step_decided(&step_id, epoch, outcome).await {
                error!(flow_id = %self.inner.flow_id, step = %step_id, error = %err, "failed to resume flow");
            }
        })
    }

    async fn on_step_decided(
        &self,
        step_id: &str,
        epoch: u64,
        outcome: Result<StepTransition, FlowError>,
    ) -> Result<(), FlowError> {
        {
            let mut rt = self.inner.runtime.lock().await;
            if rt.epoch != epoch || rt.record.state != FlowState::Running {
                debug!(flow_id = %self.inner.flow_id, step = step_id, "ignoring decision of stale step activation");
                return Ok(());
            }
            // retire the decided activation
            rt.epoch += 1;
            if let Some(active) = rt.active.take() {
                // the callback half is the task running this
                active.batch.abort();
            }
            self.acquire_lease(&mut rt).await?;

            match outcome {
                Ok(transition) => self.apply_edge(&mut rt, step_id, transition),
                Err(err) => self.route_error(&mut rt, step_id, err),
            }
            self.persist(&mut rt).await?;
            if rt.record.state != FlowState::Running {
                self.settle(&mut rt).await;
                return Ok(());
            }
        }
        self.drive().await
    }

    /// Bookkeeping pushed by the active step's callback loop.
    ///
    /// A record that cannot be saved fails the step: its tasks are aborted and
    /// the store error is routed like any other step error.
    async fn record_update(&self, epoch: u64, step_id: &str, update: StepUpdate) {
        let Err(err) = self.save_update(epoch, step_id, update).await else {
            return;
        };
        error!(flow_id = %self.inner.flow_id, step = step_id, error = %err, "failed to persist step update");
        if let Err(err) = self.on_step_decided(step_id, epoch, Err(err)).await {
            error!(flow_id = %self.inner.flow_id, step = step_id, error = %err, "failed to route store error");
        }
    }

    async fn save_update(&self, epoch: u64, step_id: &str, update: StepUpdate) -> Result<(), FlowError> {
        let mut rt = self.inner.runtime.lock().await;
        if rt.epoch != epoch {
            debug!(flow_id = %self.inner.flow_id, step = step_id, "ignoring update of stale step activation");
            return Ok(());
        }
        let logging = self.logging(step_id);
        let now = self.inner.clock.now();
        match update {
            StepUpdate::TaskCreated { task_id } => rt.record.record_task(step_id, task_id),
            StepUpdate::TaskResult { result, log } => {
                let task_id = result.task_id;
                rt.record.save_task_result(step_id, result);
                if logging {
                    rt.record.append_log(step_id, Some(task_id), log, now);
                }
            }
            StepUpdate::Log { task_id, log } => {
                if logging {
                    rt.record.append_log(step_id, task_id, log, now);
                }
            }
        }
        rt.record.touch(now);
        self.inner.store.save(&rt.record).await?;
        Ok(())
    }

    fn apply_edge(&self, rt: &mut Runtime, step_id: &str, transition: StepTransition) {
        let definition = &self.inner.definition;
        if let Some(target) = transition.target_step.as_deref() {
            if !definition.has_step(target) {
                self.route_error(rt, step_id, FlowError::StepNotFound(target.to_string()));
                return;
            }
        }
        if transition.target_step.is_none()
            && !matches!(transition.flow_state, Some(FlowState::Completed | FlowState::Paused))
        {
            let err = FlowError::InvalidState(format!(
                "step '{step_id}' returned an edge with neither a target step nor a final state"
            ));
            self.route_error(rt, step_id, err);
            return;
        }

        let StepTransition {
            target_step,
            flow_state,
            flow_result,
            log,
            ..
        } = transition;

        self.log_step(rt, step_id, log);
        if definition
            .step(step_id)
            .is_ok_and(|s| !s.properties.is_error_step)
        {
            rt.record.mark_step_completed(step_id);
        }
        if let Some(result) = flow_result {
            rt.record.set_result(result);
        }
        if let Some(target) = target_step {
            debug!(flow_id = %self.inner.flow_id, from = step_id, to = %target, "step transition");
            rt.record.advance_to(target);
        }

        match flow_state {
            Some(FlowState::Completed) => {
                let result = match rt.record.result {
                    FlowResult::Unknown => FlowResult::Success,
                    result => result,
                };
                rt.record.complete(result);
                info!(flow_id = %self.inner.flow_id, step = step_id, result = ?result, "flow completed");
            }
            Some(FlowState::Paused) => {
                rt.epoch += 1;
                rt.record.pause();
                info!(flow_id = %self.inner.flow_id, step = step_id, "flow paused by step");
            }
            _ => {}
        }
    }

    /// Route a step error to the step's `on_exception` target, or end the
    /// flow as the definition's properties say.
    fn route_error(&self, rt: &mut Runtime, step_id: &str, err: FlowError) {
        let definition = &self.inner.definition;
        let message = err.to_string();
        let cause = err.cause().map(str::to_string);
        error!(flow_id = %self.inner.flow_id, step = step_id, error = %message, "step failed");

        rt.record.record_error(step_id, message.clone(), cause.clone());
        self.log_step(rt, step_id, vec![LogEntry::new(message, cause)]);
        rt.record.set_result(FlowResult::Failed);

        let on_exception = definition
            .step(step_id)
            .ok()
            .and_then(|s| s.properties.on_exception.as_deref())
            .filter(|target| *target != step_id);
        match on_exception {
            Some(target) => {
                info!(flow_id = %self.inner.flow_id, from = step_id, to = target, "routing error to exception step");
                rt.record.advance_to(target);
            }
            None if definition.properties().kill_non_recoverable => {
                rt.record.complete(FlowResult::Failed);
                info!(flow_id = %self.inner.flow_id, step = step_id, "non-recoverable error, flow completed as Failed");
            }
            None => {
                rt.epoch += 1;
                rt.record.pause();
                info!(flow_id = %self.inner.flow_id, step = step_id, "non-recoverable error, flow paused");
            }
        }
    }

    fn log_step(&self, rt: &mut Runtime, step_id: &str, log: Vec<LogEntry>) {
        if self.logging(step_id) {
            let now = self.inner.clock.now();
            rt.record.append_log(step_id, None, log, now);
        }
    }

    fn logging(&self, step_id: &str) -> bool {
        self.inner
            .definition
            .step(step_id)
            .map_or(true, |s| s.properties.logging)
    }

    fn arm_watchdog(&self, rt: &mut Runtime) {
        if let Some(previous) = rt.watchdog.take() {
            previous.abort();
        }
        let timeout_sec = self.inner.definition.properties().timeout_sec;
        if timeout_sec == 0 {
            return;
        }
        let driver = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(timeout_sec)).await;
            driver.expire(timeout_sec).await;
        });
        rt.watchdog = Some(handle.abort_handle());
    }

    /// Flow deadline reached: abort whatever runs and complete as Timeout.
    async fn expire(&self, timeout_sec: u64) {
        let mut rt = self.inner.runtime.lock().await;
        rt.watchdog = None;
        if rt.record.state != FlowState::Running {
            return;
        }
        warn!(flow_id = %self.inner.flow_id, timeout_sec, "flow timed out");

        rt.epoch += 1;
        if let Some(active) = rt.active.take() {
            active.abort();
        }
        let step = rt.record.current_step.clone().unwrap_or_default();
        rt.record
            .record_error(&step, format!("flow timed out after {timeout_sec} s"), None);
        rt.record.complete(FlowResult::Timeout);
        if let Err(err) = self.persist(&mut rt).await {
            error!(flow_id = %self.inner.flow_id, error = %err, "failed to persist timed out flow");
        }
        self.release_lease(&mut rt).await;
    }

    /// The flow stopped moving: drop the watchdog and the lease.
    async fn settle(&self, rt: &mut Runtime) {
        if let Some(watchdog) = rt.watchdog.take() {
            watchdog.abort();
        }
        self.release_lease(rt).await;
    }

    async fn acquire_lease(&self, rt: &mut Runtime) -> Result<(), FlowError> {
        if rt.lease.is_none() {
            rt.lease = Some(self.inner.locks.acquire(self.inner.flow_id).await?);
        }
        Ok(())
    }

    async fn release_lease(&self, rt: &mut Runtime) {
        if let Some(lease) = rt.lease.take() {
            if let Err(err) = self.inner.locks.release(lease).await {
                warn!(flow_id = %self.inner.flow_id, error = %err, "failed to release flow lease");
            }
        }
    }

    /// Save the record and publish its state.
    async fn persist(&self, rt: &mut Runtime) -> Result<(), FlowError> {
        rt.record.touch(self.inner.clock.now());
        let saved = self.inner.store.save(&rt.record).await;
        self.inner.state.send_replace(rt.record.state);
        saved.map_err(FlowError::from)
    }
}

/// Forwards one step activation's bookkeeping to the driver.
struct ActiveStepListener {
    driver: FlowDriver,
    epoch: u64,
}

#[async_trait]
impl StepListener for ActiveStepListener {
    async fn apply(&self, step: &str, update: StepUpdate) {
        self.driver.record_update(self.epoch, step, update).await;
    }
}
