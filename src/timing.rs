//! Tempo and swing arithmetic. All times are in seconds.

pub const STEPS_PER_BAR: usize = 16;
const STEPS_PER_BEAT: f64 = 4.0;

pub const DEFAULT_TEMPO: f32 = 120.0;
pub const MIN_TEMPO: f32 = 60.0;
pub const MAX_TEMPO: f32 = 220.0;

/// At full swing, odd steps are delayed by this fraction of a step.
const MAX_SWING_DELAY: f64 = 0.5;

/// Duration of one sixteenth-note step.
pub fn step_interval(tempo: f32) -> f64 {
    60.0 / tempo as f64 / STEPS_PER_BEAT
}

/// Duration of an eighth note, used for tempo-synced delay.
pub fn eighth_interval(tempo: f32) -> f64 {
    step_interval(tempo) * 2.0
}

/// Duration of a whole bar.
pub fn bar_interval(tempo: f32) -> f64 {
    step_interval(tempo) * STEPS_PER_BAR as f64
}

/// Delay that swing adds to a step. Only odd steps are delayed.
pub fn swing_offset(local_step: usize, swing: f32, tempo: f32) -> f64 {
    if local_step % 2 == 1 {
        swing.clamp(0.0, 1.0) as f64 * step_interval(tempo) * MAX_SWING_DELAY
    } else {
        0.0
    }
}

/// Position of an absolute step within its bar.
pub fn local_step(step: u64) -> usize {
    (step % STEPS_PER_BAR as u64) as usize
}

/// Bar containing an absolute step.
pub fn bar_index(step: u64) -> u64 {
    step / STEPS_PER_BAR as u64
}
