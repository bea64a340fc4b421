use proptest::prelude::*;

use crate::protocol::timestamp::{NANOS_PER_SEC, Timestamp};

#[test]
fn test_ntp_fixed_round_trip_exact_second() {
    let ts = Timestamp::from_nanos(42 * NANOS_PER_SEC);
    assert_eq!(Timestamp::from_ntp_fixed(ts.to_ntp_fixed()), ts);
}

#[test]
fn test_ntp_fixed_round_trip_with_fraction() {
    let ts = Timestamp::from_nanos(1_234_567_891);
    let back = Timestamp::from_ntp_fixed(ts.to_ntp_fixed());
    // One tick (2^-32 s) of error per conversion, under a nanosecond.
    assert!(ts.as_nanos().abs_diff(back.as_nanos()) <= 1);
}

#[test]
fn test_ntp_fixed_none_sentinel() {
    assert_eq!(Timestamp::NONE.to_ntp_fixed(), u64::MAX);
    assert!(Timestamp::from_ntp_fixed(u64::MAX).is_none());
}

#[test]
fn test_midpoint() {
    let a = Timestamp::from_nanos(1000);
    let b = Timestamp::from_nanos(3000);
    assert_eq!(a.midpoint(b), Timestamp::from_nanos(2000));
    // Degenerate span.
    assert_eq!(a.midpoint(a), a);
}

#[test]
fn test_midpoint_no_overflow_near_max() {
    let a = Timestamp::from_nanos(u64::MAX - 10);
    let b = Timestamp::from_nanos(u64::MAX - 2);
    assert_eq!(a.midpoint(b), Timestamp::from_nanos(u64::MAX - 6));
}

#[test]
fn test_diff_nanos_signed() {
    let a = Timestamp::from_nanos(5000);
    let b = Timestamp::from_nanos(7000);
    assert_eq!(b.diff_nanos(a), 2000);
    assert_eq!(a.diff_nanos(b), -2000);
}

#[test]
fn test_saturating_since() {
    let a = Timestamp::from_nanos(5000);
    let b = Timestamp::from_nanos(7000);
    assert_eq!(b.saturating_since(a).as_nanos(), 2000);
    assert_eq!(a.saturating_since(b).as_nanos(), 0);
}

proptest! {
    // Codec law: the 32.32 representation loses at most one
    // nanosecond per conversion for any timestamp whose seconds part
    // fits the 32-bit field.
    #[test]
    fn prop_ntp_fixed_round_trip(nanos in 0u64..(u64::from(u32::MAX) * NANOS_PER_SEC)) {
        let ts = Timestamp::from_nanos(nanos);
        let back = Timestamp::from_ntp_fixed(ts.to_ntp_fixed());
        prop_assert!(nanos.abs_diff(back.as_nanos()) <= 1);
    }
}
