// src/print_job/sequences.rs - Head repositioning sequences for pause, resume and stop
use crate::device::PositioningMode;

/// Withdraw the head before a pause. Any absolute positioning is switched to
/// relative first so the lift is a pure offset.
pub fn pause_sequence(mode: PositioningMode, lift_mm: f64) -> Vec<String> {
    let mut commands = Vec::new();
    if mode.axis_absolute {
        commands.push("G91".to_string());
    }
    commands.push(format!("G0 Z{}", lift_mm));
    commands.push("M117 Job paused".to_string());
    commands
}

/// Lower the head back and restore the positioning mode captured at pause.
///
/// `G90` also puts the extruder back into absolute mode, so `M83` is only
/// needed on top of it for a relative extruder. With relative axes the
/// extruder is already relative after the pause sequence.
pub fn resume_sequence(snapshot: PositioningMode, lift_mm: f64) -> Vec<String> {
    let mut commands = vec![format!("G0 Z-{}", lift_mm)];
    if snapshot.axis_absolute {
        commands.push("G90".to_string());
        if !snapshot.extruder_absolute {
            commands.push("M83".to_string());
        }
    } else if snapshot.extruder_absolute {
        commands.push("M82".to_string());
    }
    commands.push("M117 Job resumed".to_string());
    commands
}

/// Motors off, fan off, heaters off, then lift the head away from the part.
pub fn stop_sequence(lift_mm: f64) -> Vec<String> {
    vec![
        "M18".to_string(),
        "M107".to_string(),
        "M104 S0".to_string(),
        "M140 S0".to_string(),
        "G91".to_string(),
        format!("G0 Z{}", lift_mm),
    ]
}
