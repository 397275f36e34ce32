// Stick axis conditioning: raw normalization and deadzone

/// Full-scale magnitude of a signed 16-bit stick axis
pub const RAW_AXIS_MAX: f32 = 32767.0;

/// Map a raw signed 16-bit axis reading to [-1.0, 1.0].
///
/// `invert` flips the sign, for axes that report "forward" as negative
/// (the left stick's vertical axis on most controllers).
pub fn normalize_raw(raw: i32, invert: bool) -> f32 {
    let value = (raw as f32 / RAW_AXIS_MAX).clamp(-1.0, 1.0);
    if invert { -value } else { value }
}

/// Apply a symmetric deadzone to a normalized axis value.
///
/// Values with `|value| < deadzone` become exactly 0.0. Outside the band the
/// magnitude is rescaled linearly so it starts at 0 on the boundary and
/// reaches 1.0 at full deflection, keeping the output continuous.
/// A deadzone of 1.0 or more swallows the whole range.
pub fn apply_deadzone(value: f32, deadzone: f32) -> f32 {
    if value.abs() < deadzone || deadzone >= 1.0 {
        return 0.0;
    }
    let sign = if value > 0.0 { 1.0 } else { -1.0 };
    let adjusted = (value.abs() - deadzone) / (1.0 - deadzone);
    sign * adjusted.clamp(0.0, 1.0)
}
