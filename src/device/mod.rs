//! Device command channel: the narrow interface the print job engine drives.
//!
//! A device accepts one line of G-code at a time and acknowledges it
//! asynchronously. The engine never waits on the device; it hands each command a
//! completion callback and moves on when that callback fires.

pub mod serial;

pub use serial::{DeviceError, SerialDevice};

/// Invoked once with the raw reply lines when the device acknowledges a command.
pub type CompletionCallback = Box<dyn FnOnce(Vec<String>) + Send + 'static>;

/// Absolute/relative positioning, tracked separately for the axes and the extruder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositioningMode {
    pub axis_absolute: bool,
    pub extruder_absolute: bool,
}

impl Default for PositioningMode {
    /// Firmware power-on state: everything absolute.
    fn default() -> Self {
        Self {
            axis_absolute: true,
            extruder_absolute: true,
        }
    }
}

impl PositioningMode {
    /// Update the mode for a command about to be sent to the device.
    ///
    /// `G90`/`G91` switch the axes and the extruder together, `M82`/`M83` only the extruder.
    pub fn apply(&mut self, command: &str) {
        let code = command
            .split_whitespace()
            .find(|word| !word.starts_with(['N', 'n']))
            .map(|word| word.split('*').next().unwrap_or(word));
        match code.map(str::to_ascii_uppercase).as_deref() {
            Some("G90") => {
                self.axis_absolute = true;
                self.extruder_absolute = true;
            }
            Some("G91") => {
                self.axis_absolute = false;
                self.extruder_absolute = false;
            }
            Some("M82") => self.extruder_absolute = true,
            Some("M83") => self.extruder_absolute = false,
            _ => {}
        }
    }
}

/// Contract between a print job and the device it drives.
///
/// Implementations must never run a completion callback from inside `submit`;
/// the job holds its own lock while submitting.
pub trait CommandChannel: Send + Sync {
    /// Queue one command line. The callback, if any, fires exactly once: after the
    /// device acknowledged the command, or once the device is no longer connected.
    fn submit(&self, command: &str, on_complete: Option<CompletionCallback>);
    fn is_connected(&self) -> bool;
    /// Positioning mode in effect after every command submitted so far.
    fn positioning_mode(&self) -> PositioningMode;
}
