//! Divergence store tests.
//!
//! Covers the identity-keyed upsert (insert / no-op / overwrite), the
//! OPEN -> RESOLVED -> OPEN lifecycle, the audit trail, and reads
//! scoped by entity and period range.

use chrono::{Duration, TimeZone, Utc};
use recon_core::{
    divergence::{Divergence, DivergenceId, Transition},
    event::DivergenceEvent,
    money::{CurrencyCode, MonetaryAmount, Rate},
    period::{Period, PeriodRange},
    store::{DivergenceStore, ReconStore},
    ReconError,
};

fn store() -> ReconStore {
    let store = ReconStore::in_memory().expect("open in-memory store");
    store.migrate().expect("migrate");
    store
}

fn eur(minor: i64) -> MonetaryAmount {
    MonetaryAmount::new(minor, CurrencyCode::EUR)
}

fn divergence(entity: &str, month: u32, portal_contribution: i64) -> Divergence {
    Divergence {
        id: DivergenceId {
            entity: entity.into(),
            period: Period::new(2025, month).unwrap(),
            rate: Rate::from_basis_points(1100),
        },
        internal_remuneration: eur(100_000),
        internal_contribution: eur(11_000),
        portal_remuneration: eur(100_000),
        portal_contribution: eur(portal_contribution),
        contribution_difference: portal_contribution - 11_000,
        detected_at: Utc.with_ymd_and_hms(2025, 6, 1, 8, 30, 0).unwrap(),
        resolved: false,
    }
}

#[test]
fn first_upsert_inserts_and_reports_changed() {
    let store = store();
    let d = divergence("ACME", 1, 11_200);

    let upsert = store.upsert_if_changed(&d).unwrap();
    assert!(upsert.was_changed());
    assert_eq!(upsert.transition, Some(Transition::Opened));
    assert_eq!(upsert.stored, d);
    assert_eq!(store.find(&d.id).unwrap(), Some(d));
}

#[test]
fn identical_upsert_twice_reports_unchanged() {
    let store = store();
    let d = divergence("ACME", 1, 11_200);
    store.upsert_if_changed(&d).unwrap();

    let again = store.upsert_if_changed(&d).unwrap();
    assert!(!again.was_changed());
    assert_eq!(store.divergence_count().unwrap(), 1);
    assert_eq!(store.history(&d.id).unwrap().len(), 1);
}

#[test]
fn later_detection_with_same_facts_keeps_original_record() {
    let store = store();
    let d = divergence("ACME", 1, 11_200);
    store.upsert_if_changed(&d).unwrap();

    let mut later = d.clone();
    later.detected_at = d.detected_at + Duration::days(30);
    let upsert = store.upsert_if_changed(&later).unwrap();

    assert!(!upsert.was_changed());
    assert_eq!(upsert.stored.detected_at, d.detected_at);
}

#[test]
fn different_amounts_overwrite_in_place() {
    let store = store();
    store.upsert_if_changed(&divergence("ACME", 1, 11_200)).unwrap();

    let updated = divergence("ACME", 1, 11_900);
    let upsert = store.upsert_if_changed(&updated).unwrap();

    assert_eq!(upsert.transition, Some(Transition::Updated));
    assert_eq!(store.divergence_count().unwrap(), 1);
    let stored = store.find(&updated.id).unwrap().unwrap();
    assert_eq!(stored.contribution_difference, 900);
}

#[test]
fn resolve_then_reopen_is_a_valid_lifecycle() {
    let store = store();
    let open = divergence("ACME", 2, 11_200);
    store.upsert_if_changed(&open).unwrap();

    let mut resolved = divergence("ACME", 2, 11_000);
    resolved.resolved = true;
    let upsert = store.upsert_if_changed(&resolved).unwrap();
    assert_eq!(upsert.transition, Some(Transition::Resolved));
    assert_eq!(store.open_divergence_count().unwrap(), 0);

    let reopened = divergence("ACME", 2, 11_300);
    let upsert = store.upsert_if_changed(&reopened).unwrap();
    assert_eq!(upsert.transition, Some(Transition::Reopened));
    assert_eq!(store.open_divergence_count().unwrap(), 1);

    // Never deleted: one row, full trail.
    assert_eq!(store.divergence_count().unwrap(), 1);
    let trail: Vec<String> = store
        .history(&open.id)
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(trail, vec!["opened", "resolved", "reopened"]);
}

#[test]
fn audit_payload_round_trips_and_carries_run_id() {
    let store = store();
    store
        .upsert_in_run(&divergence("ACME", 3, 11_200), Some("run-1"))
        .unwrap();
    store
        .upsert_in_run(&divergence("ACME", 3, 11_500), Some("run-2"))
        .unwrap();

    let history = store.history(&divergence("ACME", 3, 0).id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].run_id.as_deref(), Some("run-1"));
    assert_eq!(history[1].run_id.as_deref(), Some("run-2"));

    let event: DivergenceEvent = serde_json::from_str(&history[1].payload).unwrap();
    match event {
        DivergenceEvent::Updated {
            previous_difference,
            contribution_difference,
            ..
        } => {
            assert_eq!(previous_difference, 200);
            assert_eq!(contribution_difference, 500);
        }
        other => panic!("expected an update event, got {other:?}"),
    }
}

#[test]
fn open_for_entity_is_scoped_by_entity_range_and_status() {
    let store = store();
    store.upsert_if_changed(&divergence("ACME", 1, 11_200)).unwrap();
    store.upsert_if_changed(&divergence("ACME", 2, 11_200)).unwrap();
    store.upsert_if_changed(&divergence("ACME", 5, 11_200)).unwrap();
    store.upsert_if_changed(&divergence("GLOBEX", 2, 11_200)).unwrap();
    let mut closed = divergence("ACME", 3, 11_000);
    closed.resolved = true;
    store.upsert_if_changed(&closed).unwrap();

    let range = PeriodRange {
        start: Period::new(2025, 1).unwrap(),
        end: Period::new(2025, 5).unwrap(),
    };
    let open = store.open_for_entity("ACME", &range).unwrap();
    let months: Vec<u32> = open.iter().map(|d| d.id.period.month()).collect();
    assert_eq!(months, vec![1, 2]);
}

#[test]
fn unmigrated_store_fails_ping_as_unavailable() {
    let store = ReconStore::in_memory().unwrap();
    assert!(matches!(store.ping(), Err(ReconError::StoreUnavailable(_))));
}

#[test]
fn file_store_is_shared_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("recon.db");
    let first = ReconStore::open(path.to_str().unwrap()).unwrap();
    first.migrate().unwrap();
    let second = first.reopen().unwrap();

    let d = divergence("ACME", 4, 11_200);
    assert!(first.upsert_if_changed(&d).unwrap().was_changed());
    // The second writer sees the row and does not duplicate it.
    assert!(!second.upsert_if_changed(&d).unwrap().was_changed());

    let newer = divergence("ACME", 4, 11_800);
    assert_eq!(
        second.upsert_if_changed(&newer).unwrap().transition,
        Some(Transition::Updated)
    );
    assert_eq!(
        first.find(&d.id).unwrap().unwrap().contribution_difference,
        800
    );
}

#[test]
fn resolving_an_unknown_divergence_writes_nothing() {
    let store = store();
    let mut d = divergence("ACME", 1, 11_000);
    d.resolved = true;

    let upsert = store.upsert_if_changed(&d).unwrap();

    assert!(!upsert.was_changed());
    assert_eq!(store.find(&d.id).unwrap(), None);
    assert_eq!(store.divergence_count().unwrap(), 0);
    assert!(store.history(&d.id).unwrap().is_empty());
}
