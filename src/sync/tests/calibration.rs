use crate::protocol::Timestamp;
use crate::sync::calibration::{Calibration, ClockFit};

#[test]
fn test_identity_adjust() {
    let cal = Calibration::identity();
    let t = Timestamp::from_nanos(123_456);
    assert_eq!(cal.adjust(t), t);
}

#[test]
fn test_anchored_offset() {
    let cal = Calibration::anchored(Timestamp::from_nanos(1_000), Timestamp::from_nanos(100_000));
    assert_eq!(cal.adjust(Timestamp::from_nanos(1_000)).as_nanos(), 100_000);
    assert_eq!(cal.adjust(Timestamp::from_nanos(2_500)).as_nanos(), 101_500);
    // Extrapolation before the anchor.
    assert_eq!(cal.adjust(Timestamp::from_nanos(500)).as_nanos(), 99_500);
}

#[test]
fn test_rate_scaling() {
    let cal = Calibration {
        internal: Timestamp::from_nanos(1_000),
        external: Timestamp::from_nanos(1_000),
        rate_num: 2,
        rate_den: 1,
    };
    // Remote runs twice as fast as local.
    assert_eq!(cal.adjust(Timestamp::from_nanos(1_500)).as_nanos(), 2_000);
}

#[test]
fn test_backwards_extrapolation_saturates_at_zero() {
    let cal = Calibration::anchored(Timestamp::from_nanos(10_000), Timestamp::from_nanos(100));
    assert_eq!(cal.adjust(Timestamp::ZERO).as_nanos(), 0);
}

#[test]
fn test_fit_needs_minimum_window() {
    let mut fit = ClockFit::new();
    for i in 0..3u64 {
        fit.add(
            Timestamp::from_nanos(i * 1_000_000),
            Timestamp::from_nanos(i * 1_000_000 + 500),
        );
    }
    assert!(fit.fit().is_none());

    fit.add(Timestamp::from_nanos(3_000_000), Timestamp::from_nanos(3_000_500));
    assert!(fit.fit().is_some());
}

#[test]
fn test_fit_recovers_unit_slope_and_offset() {
    const OFFSET: u64 = 7_777_000_000;
    let mut fit = ClockFit::new();
    for i in 0..16u64 {
        let local = 1_000_000 + i * 10_000_000;
        fit.add(Timestamp::from_nanos(local), Timestamp::from_nanos(local + OFFSET));
    }
    let (cal, r_squared) = fit.fit().unwrap();

    // A perfectly linear window fits (almost) perfectly.
    assert!(r_squared > 0.999, "r_squared = {r_squared}");

    // Mapping a window point reproduces the line within a nanosecond
    // of rounding in the rational rate.
    let probe = Timestamp::from_nanos(1_000_000 + 8 * 10_000_000);
    let estimated = cal.adjust(probe).as_nanos();
    assert!(estimated.abs_diff(probe.as_nanos() + OFFSET) <= 1);
}

#[test]
fn test_fit_rejects_flat_local_ticks() {
    let mut fit = ClockFit::new();
    for i in 0..8u64 {
        fit.add(Timestamp::from_nanos(42), Timestamp::from_nanos(i * 1_000));
    }
    assert!(fit.fit().is_none());
}

#[test]
fn test_fit_rejects_negative_slope() {
    let mut fit = ClockFit::new();
    for i in 0..8u64 {
        fit.add(
            Timestamp::from_nanos(i * 1_000_000),
            Timestamp::from_nanos((8 - i) * 1_000_000),
        );
    }
    assert!(fit.fit().is_none());
}
