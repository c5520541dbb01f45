// krusty-printjob: streams stored G-code programs to line-acknowledged printers

pub mod clock;
pub mod config;
pub mod device;
pub mod print_job;
pub mod printer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, JobConfig};
pub use device::{CommandChannel, CompletionCallback, PositioningMode, SerialDevice};
pub use print_job::{EventBroadcaster, JobError, JobEvent, JobObserver, JobState, ObserverError, PrintJob};
pub use printer::{JobReport, Printer, PrinterError};
