//! Print job execution engine.
//!
//! A [`PrintJob`] streams one stored G-code program to one device. Exactly one
//! program line is in flight at a time: a line is submitted together with a
//! completion callback, and the next line is only read once that callback has
//! fired and the job is still running.
//!
//! Control calls (`start`, `pause`, `stop`) may come from any thread. Status
//! queries read a published snapshot and never wait on the dispatch path.

pub mod events;
pub mod program;
pub mod sequences;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::JobConfig;
use crate::device::{CommandChannel, PositioningMode};

pub use events::{EventBroadcaster, JobEvent, JobObserver, ObserverError};
pub use program::{ProgramError, ProgramReader, ProgramSource};

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Program(#[from] ProgramError),
    #[error("The printer is gone")]
    DeviceGone,
    #[error("The printer is not connected")]
    DeviceNotConnected,
    #[error("Observer failed: {0}")]
    ObserverFault(#[from] ObserverError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Stopped,
    Running,
    Paused,
    Done,
    Error,
}

impl JobState {
    /// `Done` and `Error` are final; nothing moves a job out of them.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Stopped => "Stopped",
            JobState::Running => "Running",
            JobState::Paused => "Paused",
            JobState::Done => "Done",
            JobState::Error => "Error",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unrecognized job state '{0}'")]
pub struct ParseJobStateError(pub String);

impl FromStr for JobState {
    type Err = ParseJobStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Stopped" => Ok(JobState::Stopped),
            "Running" => Ok(JobState::Running),
            "Paused" => Ok(JobState::Paused),
            "Done" => Ok(JobState::Done),
            "Error" => Ok(JobState::Error),
            other => Err(ParseJobStateError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchPhase {
    /// No line in flight; the loop may read and submit the next one.
    Idle,
    /// A line was submitted and its completion callback has not fired yet.
    AwaitingAck,
}

struct JobCore {
    state: JobState,
    program: ProgramReader<Box<dyn ProgramSource>>,
    phase: DispatchPhase,
    elapsed: Duration,
    run_started: Option<Instant>,
    acknowledged: u64,
    // Only set between pause() and the start() that resumes.
    snapshot: Option<PositioningMode>,
}

impl JobCore {
    fn fold_elapsed(&mut self, now: Instant) {
        if let Some(started) = self.run_started.take() {
            self.elapsed += now.saturating_duration_since(started);
        }
    }
}

/// Copy of the fields status queries need, refreshed on every change.
#[derive(Debug, Clone, Copy)]
struct StatusSnapshot {
    state: JobState,
    acknowledged: u64,
    elapsed: Duration,
    run_started: Option<Instant>,
}

/// One attempt at printing one program on one device.
pub struct PrintJob {
    id: Uuid,
    name: String,
    total: u64,
    device: Weak<dyn CommandChannel>,
    clock: Arc<dyn Clock>,
    config: JobConfig,
    this: Weak<PrintJob>,
    core: Mutex<JobCore>,
    status: RwLock<StatusSnapshot>,
    error_text: Mutex<String>,
    observers: events::Observers,
}

impl PrintJob {
    /// Open the program at `path` for printing on `device`.
    ///
    /// The job keeps only a weak reference to the device.
    pub fn open(
        name: &str,
        path: impl AsRef<Path>,
        device: &Arc<dyn CommandChannel>,
        config: JobConfig,
    ) -> Result<Arc<Self>, JobError> {
        let program = ProgramReader::open(path)?;
        Ok(Self::from_program(name, program, device, config, Arc::new(SystemClock)))
    }

    pub fn from_program<R: ProgramSource + 'static>(
        name: &str,
        program: ProgramReader<R>,
        device: &Arc<dyn CommandChannel>,
        config: JobConfig,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let program = program.boxed();
        let total = program.size();
        let state = JobState::Stopped;
        Arc::new_cyclic(|this| Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            total,
            device: Arc::downgrade(device),
            clock,
            config,
            this: this.clone(),
            core: Mutex::new(JobCore {
                state,
                program,
                phase: DispatchPhase::Idle,
                elapsed: Duration::ZERO,
                run_started: None,
                acknowledged: 0,
                snapshot: None,
            }),
            status: RwLock::new(StatusSnapshot {
                state,
                acknowledged: 0,
                elapsed: Duration::ZERO,
                run_started: None,
            }),
            error_text: Mutex::new(String::new()),
            observers: events::Observers::default(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribe(&self, observer: Arc<dyn JobObserver>) {
        self.observers.subscribe(observer);
    }

    /// Begin a fresh run from `Stopped`, or resume from `Paused`.
    ///
    /// A fresh run rewinds the program and resets the elapsed time. Resuming
    /// first lowers the head and restores the positioning mode captured at
    /// pause. In any other state this does nothing.
    pub fn start(&self) -> Result<(), JobError> {
        let mut core = self.lock_core();
        match core.state {
            JobState::Stopped => {
                core.program.rewind()?;
                core.acknowledged = 0;
                core.elapsed = Duration::ZERO;
                core.snapshot = None;
                tracing::info!(job = %self.name, "Starting print job ({} bytes)", self.total);
            }
            JobState::Paused => {
                let snapshot = core.snapshot.take().unwrap_or_default();
                match self.device.upgrade() {
                    Some(device) => {
                        for command in sequences::resume_sequence(snapshot, self.config.pause_lift_mm) {
                            device.submit(&command, None);
                        }
                    }
                    None => tracing::warn!(job = %self.name, "Printer gone, skipping resume sequence"),
                }
                tracing::info!(job = %self.name, "Resuming print job");
            }
            state => {
                tracing::debug!(job = %self.name, "Ignoring start in state {}", state);
                return Ok(());
            }
        }

        core.state = JobState::Running;
        core.run_started = Some(self.clock.now());
        self.publish(&core);
        // A line from before the pause/stop may still be in flight; its callback continues the loop.
        let dispatch = core.phase == DispatchPhase::Idle;
        drop(core);

        self.notify_state_change(JobState::Running);
        if dispatch {
            self.dispatch_next();
        }
        Ok(())
    }

    /// Pause a running job. An in-flight line still completes, but nothing
    /// further is dispatched until `start` resumes.
    pub fn pause(&self) -> Result<(), JobError> {
        let mut core = self.lock_core();
        if core.state != JobState::Running {
            tracing::debug!(job = %self.name, "Ignoring pause in state {}", core.state);
            return Ok(());
        }
        let device = self.device.upgrade().ok_or(JobError::DeviceGone)?;
        let mode = device.positioning_mode();

        core.fold_elapsed(self.clock.now());
        core.state = JobState::Paused;
        core.snapshot = Some(mode);
        self.publish(&core);
        for command in sequences::pause_sequence(mode, self.config.pause_lift_mm) {
            device.submit(&command, None);
        }
        drop(core);

        tracing::info!(job = %self.name, "Print job paused");
        self.notify_state_change(JobState::Paused);
        Ok(())
    }

    /// Stop a running or paused job and shut the printer down. Does nothing
    /// in any other state.
    pub fn stop(&self) {
        let mut core = self.lock_core();
        match core.state {
            JobState::Running => core.fold_elapsed(self.clock.now()),
            JobState::Paused => {}
            state => {
                tracing::debug!(job = %self.name, "Ignoring stop in state {}", state);
                return;
            }
        }
        core.state = JobState::Stopped;
        core.snapshot = None;
        self.publish(&core);
        match self.device.upgrade() {
            Some(device) => {
                for command in sequences::stop_sequence(self.config.stop_lift_mm) {
                    device.submit(&command, None);
                }
            }
            None => tracing::warn!(job = %self.name, "Printer gone, skipping shutdown sequence"),
        }
        drop(core);

        tracing::info!(job = %self.name, "Print job stopped");
        self.notify_state_change(JobState::Stopped);
    }

    /// Record `message` and move the job into `Error`. Ignored once the job
    /// is `Done` or already in `Error`.
    pub fn set_error(&self, message: impl Into<String>) {
        let mut message = message.into();
        if message.is_empty() {
            message = "Unknown error".to_string();
        }
        {
            let mut core = self.lock_core();
            if core.state.is_terminal() {
                tracing::warn!(job = %self.name, "Ignoring error in state {}: {}", core.state, message);
                return;
            }
            tracing::error!(job = %self.name, "Print job error: {}", message);
            *self.error_text.lock().unwrap_or_else(PoisonError::into_inner) = message.clone();
            core.fold_elapsed(self.clock.now());
            core.state = JobState::Error;
            self.publish(&core);
        }
        if let Err(e) = self.observers.state_changed(JobState::Error, &message) {
            tracing::warn!(job = %self.name, "Observer failed while reporting error: {}", e);
        }
    }

    pub fn state(&self) -> JobState {
        self.read_status().state
    }

    /// Last recorded error; empty unless the job entered `Error`.
    pub fn error_text(&self) -> String {
        self.error_text.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// `(position, total)` in program bytes. `position` is the offset of the
    /// last acknowledged line, or `total` once the job is `Done`.
    pub fn progress(&self) -> (u64, u64) {
        let status = self.read_status();
        let position = if status.state == JobState::Done { self.total } else { status.acknowledged };
        (position, self.total)
    }

    /// Time spent running, including the current run segment.
    pub fn elapsed(&self) -> Duration {
        let status = self.read_status();
        match (status.state, status.run_started) {
            (JobState::Running, Some(started)) => {
                status.elapsed + self.clock.now().saturating_duration_since(started)
            }
            _ => status.elapsed,
        }
    }

    fn dispatch_next(&self) {
        if let Err(e) = self.try_dispatch() {
            self.set_error(e.to_string());
        }
    }

    fn try_dispatch(&self) -> Result<(), JobError> {
        let mut core = self.lock_core();
        if core.state != JobState::Running || core.phase == DispatchPhase::AwaitingAck {
            return Ok(());
        }
        let device = self.connected_device()?;

        match core.program.next_line()? {
            Some(line) => {
                core.phase = DispatchPhase::AwaitingAck;
                let job = self.this.clone();
                device.submit(
                    &line,
                    Some(Box::new(move |reply| {
                        if let Some(job) = job.upgrade() {
                            job.line_acknowledged(reply);
                        }
                    })),
                );
                Ok(())
            }
            None => {
                let reached_end = core.acknowledged != self.total;
                core.fold_elapsed(self.clock.now());
                core.acknowledged = self.total;
                core.state = JobState::Done;
                self.publish(&core);
                drop(core);

                tracing::info!(job = %self.name, "Print job done in {:?}", self.elapsed());
                if reached_end {
                    if let Err(e) = self.observers.progress(self.total) {
                        tracing::warn!(job = %self.name, "Observer failed while reporting final progress: {}", e);
                    }
                }
                self.notify_state_change(JobState::Done);
                Ok(())
            }
        }
    }

    fn connected_device(&self) -> Result<Arc<dyn CommandChannel>, JobError> {
        let device = self.device.upgrade().ok_or(JobError::DeviceGone)?;
        if !device.is_connected() {
            return Err(JobError::DeviceNotConnected);
        }
        Ok(device)
    }

    fn line_acknowledged(&self, reply: Vec<String>) {
        let link = self.connected_device().map(drop);
        let position = {
            let mut core = self.lock_core();
            core.phase = DispatchPhase::Idle;
            // A line completed by a dying link was never acknowledged.
            if let Err(e) = link {
                let running = core.state == JobState::Running;
                drop(core);
                if running {
                    self.set_error(e.to_string());
                } else {
                    tracing::warn!(job = %self.name, "Line completed without acknowledgment: {}", e);
                }
                return;
            }
            core.acknowledged = core.program.position();
            self.publish(&core);
            core.acknowledged
        };
        tracing::trace!(job = %self.name, "Line acknowledged at byte {}: {:?}", position, reply);

        if let Err(e) = self.observers.progress(position) {
            self.set_error(JobError::from(e).to_string());
            return;
        }
        // Only advances if nobody paused or stopped the job meanwhile.
        self.dispatch_next();
    }

    fn notify_state_change(&self, state: JobState) {
        let error = self.error_text();
        if let Err(e) = self.observers.state_changed(state, &error) {
            self.set_error(JobError::from(e).to_string());
        }
    }

    fn publish(&self, core: &JobCore) {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        *status = StatusSnapshot {
            state: core.state,
            acknowledged: core.acknowledged,
            elapsed: core.elapsed,
            run_started: core.run_started,
        };
    }

    fn read_status(&self) -> StatusSnapshot {
        *self.status.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_core(&self) -> MutexGuard<'_, JobCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PrintJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrintJob")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("progress", &self.progress())
            .finish()
    }
}
