//! Comparator and bucketizer tests.
//!
//! Covers: absolute tolerance on both fields, signed contribution
//! difference, absent-side-as-zero, exact summation per (period, rate).

use chrono::{TimeZone, Utc};
use recon_core::{
    bucket::{bucketize, BucketKey, BucketTotals},
    compare::{compare, is_close, Tolerance},
    money::{CurrencyCode, MonetaryAmount, Rate},
    period::Period,
    source::{AggregateRecord, Grouping, SourceKind},
    ReconError,
};

const EUR: CurrencyCode = CurrencyCode::EUR;

fn eur(minor: i64) -> MonetaryAmount {
    MonetaryAmount::new(minor, EUR)
}

fn totals(remuneration: i64, contribution: i64) -> BucketTotals {
    BucketTotals {
        remuneration: eur(remuneration),
        contribution: eur(contribution),
    }
}

fn key() -> BucketKey {
    BucketKey {
        period: Period::new(2025, 1).unwrap(),
        rate: Rate::from_basis_points(1100),
    }
}

fn record(source: SourceKind, period: (i32, u32), bps: u32, rem: i64, contrib: i64) -> AggregateRecord {
    AggregateRecord {
        entity: "ACME".into(),
        source,
        grouping: match source {
            SourceKind::Internal => Grouping::ByPeriod,
            SourceKind::Portal => Grouping::ByRate,
        },
        period: Period::new(period.0, period.1).unwrap(),
        rate: Rate::from_basis_points(bps),
        remuneration: eur(rem),
        contribution: eur(contrib),
    }
}

fn tol(minor: i64) -> Tolerance {
    Tolerance::new(minor).unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Comparator
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn difference_within_tolerance_is_not_a_divergence() {
    let at = Utc.with_ymd_and_hms(2025, 2, 3, 4, 0, 0).unwrap();
    let result = compare(
        &"ACME".to_string(),
        key(),
        &totals(100_000, 11_000),
        &totals(100_000, 11_049),
        tol(50),
        at,
    )
    .unwrap();
    assert!(result.is_none(), "49 <= 50 must compare equal");
}

#[test]
fn difference_beyond_tolerance_is_a_populated_divergence() {
    let at = Utc.with_ymd_and_hms(2025, 2, 3, 4, 0, 0).unwrap();
    let d = compare(
        &"ACME".to_string(),
        key(),
        &totals(100_000, 11_000),
        &totals(100_000, 11_049),
        tol(10),
        at,
    )
    .unwrap()
    .expect("49 > 10 must diverge");

    assert_eq!(d.contribution_difference, 49);
    assert_eq!(d.id.entity, "ACME");
    assert_eq!(d.id.key(), key());
    assert_eq!(d.internal_remuneration, eur(100_000));
    assert_eq!(d.portal_remuneration, eur(100_000));
    assert_eq!(d.internal_contribution, eur(11_000));
    assert_eq!(d.portal_contribution, eur(11_049));
    assert_eq!(d.detected_at, at);
    assert!(!d.resolved);
}

#[test]
fn remuneration_alone_can_diverge() {
    let d = compare(
        &"ACME".to_string(),
        key(),
        &totals(100_000, 11_000),
        &totals(100_500, 11_000),
        tol(50),
        Utc::now(),
    )
    .unwrap()
    .expect("remuneration off by 500");
    assert_eq!(d.contribution_difference, 0);
}

#[test]
fn difference_is_signed_portal_minus_internal() {
    let d = compare(
        &"ACME".to_string(),
        key(),
        &totals(100_000, 11_100),
        &totals(100_000, 11_000),
        Tolerance::EXACT,
        Utc::now(),
    )
    .unwrap()
    .unwrap();
    assert_eq!(d.contribution_difference, -100);
}

#[test]
fn closeness_boundary_is_inclusive_on_both_sides() {
    for (a, b, t, expected) in [
        (0, 0, 0, true),
        (0, 1, 0, false),
        (100, 150, 50, true),
        (150, 100, 50, true),
        (100, 151, 50, false),
        (-25, 25, 50, true),
        (i64::MIN, i64::MAX, i64::MAX, false),
    ] {
        assert_eq!(
            is_close(&eur(a), &eur(b), tol(t)).unwrap(),
            expected,
            "is_close({a}, {b}, {t})"
        );
    }
}

#[test]
fn negative_tolerance_is_rejected() {
    assert!(matches!(Tolerance::new(-1), Err(ReconError::InvalidConfig(_))));
}

// ─────────────────────────────────────────────────────────────────────────────
// Bucketizer
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn records_sharing_a_key_are_summed_per_side() {
    let records = vec![
        record(SourceKind::Internal, (2025, 1), 1100, 60_000, 6_600),
        record(SourceKind::Internal, (2025, 1), 1100, 40_000, 4_400),
        record(SourceKind::Internal, (2025, 1), 800, 10_000, 800),
        record(SourceKind::Portal, (2025, 1), 1100, 100_000, 11_000),
    ];
    let buckets = bucketize(&records, EUR).unwrap();

    assert_eq!(buckets.internal.len(), 2);
    assert_eq!(buckets.internal[&key()], totals(100_000, 11_000));
    assert_eq!(buckets.portal.len(), 1);
    assert_eq!(buckets.portal[&key()], totals(100_000, 11_000));
    assert_eq!(buckets.keys().len(), 2);
}

#[test]
fn absent_side_pairs_as_zero_and_diverges() {
    let records = vec![record(SourceKind::Internal, (2025, 1), 1100, 100_000, 11_000)];
    let buckets = bucketize(&records, EUR).unwrap();

    let (internal, portal) = buckets.pair(&key(), EUR);
    assert_eq!(internal, totals(100_000, 11_000));
    assert_eq!(portal, BucketTotals::zero(EUR));

    let d = compare(&"ACME".to_string(), key(), &internal, &portal, tol(50), Utc::now())
        .unwrap()
        .expect("missing portal bucket must diverge");
    assert_eq!(d.portal_contribution, eur(0));
    assert_eq!(d.contribution_difference, -11_000);
}

#[test]
fn foreign_currency_record_is_an_error() {
    let mut stray = record(SourceKind::Portal, (2025, 1), 1100, 100, 11);
    stray.remuneration = MonetaryAmount::new(100, CurrencyCode::USD);
    let err = bucketize(&[stray], EUR).unwrap_err();
    assert!(matches!(err, ReconError::CurrencyMismatch { .. }));
}
