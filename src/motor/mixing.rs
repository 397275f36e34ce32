// Differential (tank) drive mixing for the six-wheel base
// Combines throttle and turn into per-side outputs in [-1, 1].

use super::axis::apply_deadzone;
use super::protocol::Direction;

/// Default stick deadzone used by the teleop loop
pub const DEFAULT_DEADZONE: f32 = 0.08;

/// Motor indices driven by the left side of the base
pub const LEFT_MOTORS: [usize; 3] = [0, 1, 2];
/// Motor indices driven by the right side of the base
pub const RIGHT_MOTORS: [usize; 3] = [3, 4, 5];

/// Mix throttle and turn into (left, right).
///
/// Each side is clamped on its own; saturating one side does not rescale the other.
pub fn differential_mix(throttle: f32, turn: f32) -> (f32, f32) {
    let left = (throttle + turn).clamp(-1.0, 1.0);
    let right = (throttle - turn).clamp(-1.0, 1.0);
    (left, right)
}

/// Per-side drive output, each side in [-1.0, 1.0]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DriveCommand {
    pub left: f32,
    pub right: f32,
}

impl DriveCommand {
    pub fn new(left: f32, right: f32) -> Self {
        Self {
            left: left.clamp(-1.0, 1.0),
            right: right.clamp(-1.0, 1.0),
        }
    }

    pub fn stop() -> Self {
        Self::default()
    }

    /// Multiply both sides by `factor` and re-clamp (speed level scaling)
    pub fn scaled(&self, factor: f32) -> Self {
        Self::new(self.left * factor, self.right * factor)
    }

    /// Resolve each side into (direction, magnitude).
    ///
    /// A side at exactly zero reports `Forward` with magnitude 0.0.
    pub fn as_direction_speed(&self) -> ((Direction, f32), (Direction, f32)) {
        (side(self.left), side(self.right))
    }

    /// Expand to the six-motor layout: [left x3, right x3]
    pub fn as_motor_speeds(&self) -> [f32; 6] {
        let mut speeds = [0.0; 6];
        for i in LEFT_MOTORS {
            speeds[i] = self.left;
        }
        for i in RIGHT_MOTORS {
            speeds[i] = self.right;
        }
        speeds
    }
}

fn side(value: f32) -> (Direction, f32) {
    if value < 0.0 {
        (Direction::Backward, value.abs())
    } else {
        (Direction::Forward, value.abs())
    }
}

/// Full pipeline: deadzone on both axes, then mix
pub fn compute_drive(throttle: f32, turn: f32, deadzone: f32) -> DriveCommand {
    let throttle = apply_deadzone(throttle, deadzone);
    let turn = apply_deadzone(turn, deadzone);
    let (left, right) = differential_mix(throttle, turn);
    DriveCommand { left, right }
}
