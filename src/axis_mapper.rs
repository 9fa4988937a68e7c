use anyhow::{ensure, Result};

/**
 * Joystick calibration as reported by the joydev provider. JOY_MAX is one past
 * i16::MAX; it is the value the rig was calibrated against, keep it unless the
 * rig is recalibrated.
 */
pub(crate) const JOY_MIN: i32 = -32768;
pub(crate) const JOY_MAX: i32 = 32768;
pub(crate) const SERVO_MIN: i32 = 0;
pub(crate) const SERVO_MAX: i32 = 180;

/**
 * Linear mapping from a raw joystick axis reading to a servo angle in degrees.
 * Fixed at startup.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AxisCalibration {
    joy_min: i32,
    joy_max: i32,
    servo_min: i32,
    servo_max: i32,
    /**
     * When false, readings outside [joy_min, joy_max] extrapolate past the
     * servo range.
     */
    clamp: bool,
}

impl Default for AxisCalibration {
    fn default() -> Self {
        Self {
            joy_min: JOY_MIN,
            joy_max: JOY_MAX,
            servo_min: SERVO_MIN,
            servo_max: SERVO_MAX,
            clamp: true,
        }
    }
}

impl AxisCalibration {
    pub(crate) fn new(
        joy_min: i32,
        joy_max: i32,
        servo_min: i32,
        servo_max: i32,
        clamp: bool,
    ) -> Result<Self> {
        ensure!(
            joy_max > joy_min,
            "joystick range is empty: min {} max {}",
            joy_min,
            joy_max
        );
        ensure!(
            servo_max >= servo_min,
            "servo range is inverted: min {} max {}",
            servo_min,
            servo_max
        );
        Ok(Self {
            joy_min,
            joy_max,
            servo_min,
            servo_max,
            clamp,
        })
    }

    pub(crate) fn joy_range(&self) -> i128 {
        self.joy_max as i128 - self.joy_min as i128
    }

    pub(crate) fn servo_range(&self) -> i128 {
        self.servo_max as i128 - self.servo_min as i128
    }

    /**
     * servo_min + floor(((x - joy_min) / joy_range) * servo_range), in exact
     * integer arithmetic. i128 holds the product of two full i32 spans.
     */
    pub(crate) fn map(&self, x: i32) -> i32 {
        let offset = (x as i128 - self.joy_min as i128) * self.servo_range();
        let angle = self.servo_min as i128 + offset.div_euclid(self.joy_range());

        let angle = if self.clamp {
            angle.clamp(self.servo_min as i128, self.servo_max as i128)
        } else {
            angle
        };
        angle.clamp(i32::MIN as i128, i32::MAX as i128) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_hit_servo_limits() {
        let calibration = AxisCalibration::default();
        assert_eq!(calibration.map(JOY_MIN), 0);
        assert_eq!(calibration.map(JOY_MAX), 180);
    }

    #[test]
    fn centre_stick_is_ninety_degrees() {
        let calibration = AxisCalibration::default();
        assert_eq!(calibration.map(0), 90);
    }

    #[test]
    fn mapping_is_monotonic_and_in_range() {
        let calibration = AxisCalibration::default();
        let mut previous = calibration.map(JOY_MIN);
        for x in (JOY_MIN..=JOY_MAX).step_by(7) {
            let angle = calibration.map(x);
            assert!(angle >= previous, "map({}) = {} < {}", x, angle, previous);
            assert!((SERVO_MIN..=SERVO_MAX).contains(&angle));
            previous = angle;
        }
        assert!(calibration.map(JOY_MAX) >= previous);
    }

    #[test]
    fn out_of_range_readings_are_clamped() {
        let calibration = AxisCalibration::default();
        assert_eq!(calibration.map(-40000), 0);
        assert_eq!(calibration.map(40000), 180);
        assert_eq!(calibration.map(i32::MIN), 0);
        assert_eq!(calibration.map(i32::MAX), 180);
    }

    #[test]
    fn unclamped_mapping_extrapolates() {
        let calibration =
            AxisCalibration::new(JOY_MIN, JOY_MAX, SERVO_MIN, SERVO_MAX, false).unwrap();
        assert!(calibration.map(-65536) < 0);
        assert!(calibration.map(65536) > 180);
        assert_eq!(calibration.map(JOY_MAX + 65536), 360);
    }

    #[test]
    fn custom_servo_window() {
        let calibration = AxisCalibration::new(0, 1000, 45, 135, true).unwrap();
        assert_eq!(calibration.map(0), 45);
        assert_eq!(calibration.map(500), 90);
        assert_eq!(calibration.map(1000), 135);
        // floor, not round
        assert_eq!(calibration.map(9), 45);
        assert_eq!(calibration.map(12), 46);
    }

    #[test]
    fn exact_multiples_are_not_lost_to_rounding() {
        let calibration = AxisCalibration::new(0, 49, 0, 49, true).unwrap();
        for x in 0..=49 {
            assert_eq!(calibration.map(x), x);
        }

        let calibration = AxisCalibration::new(-300, 300, 0, 180, true).unwrap();
        assert_eq!(calibration.map(-300), 0);
        assert_eq!(calibration.map(-290), 3);
        assert_eq!(calibration.map(0), 90);
        assert_eq!(calibration.map(300), 180);
    }

    #[test]
    fn unclamped_floor_rounds_towards_negative_infinity() {
        let calibration = AxisCalibration::new(0, 10, 0, 1, false).unwrap();
        assert_eq!(calibration.map(-1), -1);
        assert_eq!(calibration.map(-10), -1);
        assert_eq!(calibration.map(-11), -2);
    }

    #[test]
    fn full_i32_spans_do_not_overflow() {
        let calibration = AxisCalibration::new(i32::MIN, i32::MAX, i32::MIN, i32::MAX, true).unwrap();
        assert_eq!(calibration.map(i32::MIN), i32::MIN);
        assert_eq!(calibration.map(i32::MAX), i32::MAX);
    }

    #[test]
    fn rejects_degenerate_ranges() {
        assert!(AxisCalibration::new(10, 10, 0, 180, true).is_err());
        assert!(AxisCalibration::new(10, -10, 0, 180, true).is_err());
        assert!(AxisCalibration::new(-10, 10, 180, 0, true).is_err());
        assert!(AxisCalibration::new(-10, 10, 90, 90, true).is_ok());
    }
}
