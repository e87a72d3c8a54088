//! Steering-angle to servo-angle conversion.

/// Maps a signed steering angle (degrees, 0 = straight) onto the bounded
/// servo actuation range. Pure configuration, no shared state; the vehicle
/// bounds are enforced here, not at the transport.
#[derive(Clone, Copy, Debug)]
pub struct AngleConverter {
    center: i32,
    min: i32,
    max: i32,
}

impl AngleConverter {
    pub fn new(center: i32, min: i32, max: i32) -> Self {
        debug_assert!(min <= center && center <= max);
        Self { center, min, max }
    }

    pub fn convert(&self, steering_angle: f64) -> i32 {
        let servo = self.center as f64 + steering_angle;
        (servo.round() as i32).clamp(self.min, self.max)
    }
}

impl Default for AngleConverter {
    fn default() -> Self {
        Self::new(105, 50, 135)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_steering_maps_to_center() {
        let conv = AngleConverter::default();
        assert_eq!(conv.convert(0.0), 105);
    }

    #[test]
    fn steering_offsets_are_applied_around_center() {
        let conv = AngleConverter::default();
        assert_eq!(conv.convert(-15.0), 90);
        assert_eq!(conv.convert(20.0), 125);
    }

    #[test]
    fn servo_angles_are_clamped_to_the_actuation_bounds() {
        let conv = AngleConverter::default();
        assert_eq!(conv.convert(-90.0), 50);
        assert_eq!(conv.convert(90.0), 135);
    }
}
