// src/printer.rs - A printer and its current print job
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::{Clock, SystemClock};
use crate::config::JobConfig;
use crate::device::CommandChannel;
use crate::print_job::{JobError, JobObserver, JobState, ParseJobStateError, PrintJob, ProgramReader, ProgramSource};

#[derive(Debug, Error)]
pub enum PrinterError {
    #[error("A print job is already running or paused")]
    JobActive,
    #[error("Print job not found")]
    NoJob,
    #[error(transparent)]
    UnknownState(#[from] ParseJobStateError),
    #[error("Cannot request job state {0}")]
    InvalidTarget(JobState),
    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

/// Job status as reported to API clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub id: String,
    pub name: String,
    pub state: JobState,
    pub error: String,
    /// Bytes of the program acknowledged by the printer.
    pub done: u64,
    pub total: u64,
    /// Whole seconds spent running.
    pub elapsed: u64,
}

impl JobReport {
    pub fn from_job(job: &PrintJob) -> Self {
        let (done, total) = job.progress();
        Self {
            id: job.id().to_string(),
            name: job.name().to_string(),
            state: job.state(),
            error: job.error_text(),
            done,
            total,
            elapsed: job.elapsed().as_secs(),
        }
    }
}

/// A connected printer holding at most one print job.
///
/// A new job may only replace the current one once it is no longer running
/// or paused. Observers registered here are attached to every job submitted
/// afterwards.
pub struct Printer {
    name: String,
    device: Arc<dyn CommandChannel>,
    config: JobConfig,
    clock: Arc<dyn Clock>,
    job: Mutex<Option<Arc<PrintJob>>>,
    observers: RwLock<Vec<Arc<dyn JobObserver>>>,
}

impl Printer {
    pub fn new(name: &str, device: Arc<dyn CommandChannel>, config: JobConfig) -> Self {
        Self {
            name: name.to_string(),
            device,
            config,
            clock: Arc::new(SystemClock),
            job: Mutex::new(None),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &Arc<dyn CommandChannel> {
        &self.device
    }

    pub fn subscribe(&self, observer: Arc<dyn JobObserver>) {
        self.observers.write().unwrap_or_else(PoisonError::into_inner).push(observer);
    }

    pub fn current_job(&self) -> Option<Arc<PrintJob>> {
        self.lock_job().clone()
    }

    /// Replace the current job with the program at `path`, starting it unless `start` is false.
    pub fn submit_job(&self, name: &str, path: impl AsRef<Path>, start: bool) -> Result<Arc<PrintJob>, PrinterError> {
        let program = ProgramReader::open(path).map_err(JobError::from)?;
        self.submit_program(name, program, start)
    }

    pub fn submit_program<R: ProgramSource + 'static>(
        &self,
        name: &str,
        program: ProgramReader<R>,
        start: bool,
    ) -> Result<Arc<PrintJob>, PrinterError> {
        let job = {
            let mut slot = self.lock_job();
            if let Some(current) = slot.as_ref() {
                if matches!(current.state(), JobState::Running | JobState::Paused) {
                    tracing::warn!(printer = %self.name, "Rejecting job '{}': '{}' is {}", name, current.name(), current.state());
                    return Err(PrinterError::JobActive);
                }
            }
            let job = PrintJob::from_program(name, program, &self.device, self.config.clone(), self.clock.clone());
            for observer in self.observers.read().unwrap_or_else(PoisonError::into_inner).iter() {
                job.subscribe(observer.clone());
            }
            *slot = Some(job.clone());
            job
        };
        tracing::info!(printer = %self.name, "Submitted print job '{}'", name);

        if start {
            job.start()?;
        }
        Ok(job)
    }

    /// Drive the current job towards `target`. Requests that do not apply to
    /// the job's current state are ignored.
    pub fn modify_job(&self, target: JobState) -> Result<(), PrinterError> {
        let job = self.current_job().ok_or(PrinterError::NoJob)?;
        match target {
            JobState::Stopped => {
                if matches!(job.state(), JobState::Running | JobState::Paused) {
                    job.stop();
                }
            }
            JobState::Paused => {
                if job.state() == JobState::Running {
                    job.pause()?;
                }
            }
            JobState::Running => {
                if job.state() != JobState::Running {
                    job.start()?;
                }
            }
            JobState::Done | JobState::Error => return Err(PrinterError::InvalidTarget(target)),
        }
        Ok(())
    }

    /// Like [`Printer::modify_job`], with the target given by name.
    pub fn modify_job_str(&self, target: &str) -> Result<(), PrinterError> {
        self.modify_job(target.parse()?)
    }

    pub fn job_report(&self) -> Result<JobReport, PrinterError> {
        let job = self.current_job().ok_or(PrinterError::NoJob)?;
        Ok(JobReport::from_job(&job))
    }

    fn lock_job(&self) -> MutexGuard<'_, Option<Arc<PrintJob>>> {
        self.job.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
