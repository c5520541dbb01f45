// Shared test fixtures: a recording printer and a recording observer.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};

use krusty_printjob::print_job::ObserverError;
use krusty_printjob::{CommandChannel, CompletionCallback, JobObserver, JobState, PositioningMode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub command: String,
    /// Submitted with a completion callback, i.e. a dispatched program line.
    pub dispatched: bool,
}

#[derive(Default)]
struct MockState {
    connected: bool,
    mode: PositioningMode,
    sent: Vec<Sent>,
    pending: VecDeque<CompletionCallback>,
    max_pending: usize,
}

/// Printer stand-in that records every command and holds completion
/// callbacks until the test acknowledges them.
pub struct MockDevice {
    state: Mutex<MockState>,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState { connected: true, ..MockState::default() }),
        })
    }

    pub fn channel(self: &Arc<Self>) -> Arc<dyn CommandChannel> {
        self.clone()
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.lock().unwrap().connected = connected;
    }

    pub fn set_positioning(&self, mode: PositioningMode) {
        self.state.lock().unwrap().mode = mode;
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.lock().unwrap().sent.iter().map(|s| s.command.clone()).collect()
    }

    pub fn log(&self) -> Vec<Sent> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn dispatched(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|s| s.dispatched)
            .map(|s| s.command.clone())
            .collect()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    pub fn max_pending(&self) -> usize {
        self.state.lock().unwrap().max_pending
    }

    pub fn take_pending(&self) -> Option<CompletionCallback> {
        self.state.lock().unwrap().pending.pop_front()
    }

    /// Acknowledge the oldest outstanding command. Returns false if none was pending.
    pub fn ack(&self) -> bool {
        match self.take_pending() {
            Some(callback) => {
                callback(vec!["ok".to_string()]);
                true
            }
            None => false,
        }
    }

    /// Acknowledge until nothing is pending; returns the number of acknowledgments.
    pub fn ack_all(&self) -> usize {
        let mut count = 0;
        while self.ack() {
            count += 1;
            assert!(count < 10_000, "program never finished");
        }
        count
    }
}

impl CommandChannel for MockDevice {
    fn submit(&self, command: &str, on_complete: Option<CompletionCallback>) {
        let mut state = self.state.lock().unwrap();
        state.mode.apply(command);
        state.sent.push(Sent { command: command.to_string(), dispatched: on_complete.is_some() });
        if let Some(callback) = on_complete {
            state.pending.push_back(callback);
            state.max_pending = state.max_pending.max(state.pending.len());
        }
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    fn positioning_mode(&self) -> PositioningMode {
        self.state.lock().unwrap().mode
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    State(JobState, String),
    Progress(u64),
}

/// Observer recording everything it is told; can be told to fail.
#[derive(Default)]
pub struct RecordingObserver {
    seen: Mutex<Vec<Seen>>,
    fail_progress: Mutex<Option<(Option<u64>, String)>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_progress_with(&self, message: &str) {
        *self.fail_progress.lock().unwrap() = Some((None, message.to_string()));
    }

    /// Fail only the progress event reporting `position`.
    pub fn fail_progress_at(&self, position: u64, message: &str) {
        *self.fail_progress.lock().unwrap() = Some((Some(position), message.to_string()));
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<JobState> {
        self.seen()
            .into_iter()
            .filter_map(|s| match s {
                Seen::State(state, _) => Some(state),
                Seen::Progress(_) => None,
            })
            .collect()
    }

    pub fn positions(&self) -> Vec<u64> {
        self.seen()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Progress(position) => Some(position),
                Seen::State(..) => None,
            })
            .collect()
    }
}

impl JobObserver for RecordingObserver {
    fn on_state_change(&self, state: JobState, error: &str) -> Result<(), ObserverError> {
        self.seen.lock().unwrap().push(Seen::State(state, error.to_string()));
        Ok(())
    }

    fn on_progress(&self, position: u64) -> Result<(), ObserverError> {
        self.seen.lock().unwrap().push(Seen::Progress(position));
        match self.fail_progress.lock().unwrap().as_ref() {
            Some((at, message)) if at.is_none_or(|at| at == position) => Err(message.as_str().into()),
            _ => Ok(()),
        }
    }
}

pub const PROGRAM: &str = "; sliced by test\n\nG28\nG1 X10 ; move\n   \n; layer 1\nG1 Y20\nM84\n; end\n";

pub const PROGRAM_LINES: [&str; 4] = ["G28", "G1 X10", "G1 Y20", "M84"];

pub fn program_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}
