//! Fixture file loading tests, against the sample data shipped in data/.

use recon_core::{
    clock::FixedClock,
    compare::Tolerance,
    config::ReconConfig,
    divergence::Transition,
    fixture::{FixtureInternalClient, FixturePortalClient},
    money::CurrencyCode,
    source::{ExternalPortalSource, InternalSystemSource},
    store::ReconStore,
    ReconEngine,
};
use std::sync::Arc;

fn data(file: &str) -> String {
    format!("{}/../data/{file}", env!("CARGO_MANIFEST_DIR"))
}

#[test]
fn sample_config_loads_and_validates() {
    let config = ReconConfig::load(&data("recon.json")).expect("load recon.json");
    assert_eq!(config.currency, CurrencyCode::EUR);
    assert_eq!(config.default_tolerance_minor, 50);
    assert!(config.jitter_seed.is_none());
    assert!(config.portal.max_concurrency < config.internal.max_concurrency);
}

#[test]
fn invalid_config_is_rejected() {
    let mut config = ReconConfig::default_test();
    config.portal.max_concurrency = 0;
    assert!(config.validate().is_err());

    let mut config = ReconConfig::default_test();
    config.internal.retry.attempts = 0;
    assert!(config.validate().is_err());
}

#[test]
fn missing_file_names_the_path() {
    let err = ReconConfig::load("/nonexistent/recon.json").unwrap_err();
    assert!(err.to_string().contains("/nonexistent/recon.json"));
}

#[tokio::test]
async fn sample_data_reconciles_with_partial_success() {
    let internal = FixtureInternalClient::load(&data("internal.json")).expect("internal.json");
    let portal = FixturePortalClient::load(&data("portal.json")).expect("portal.json");
    assert_eq!(internal.entities(), vec!["ACME", "GLOBEX"]);
    assert_eq!(portal.entities(), vec!["ACME"]);

    let store = Arc::new(ReconStore::in_memory().unwrap());
    store.migrate().unwrap();
    let engine = ReconEngine::new(
        ReconConfig::default_test(),
        vec!["ACME".into(), "GLOBEX".into(), "INITECH".into()],
        Arc::new(InternalSystemSource::new(internal)),
        Arc::new(ExternalPortalSource::new(portal)),
        store.clone(),
        Arc::new(FixedClock::at_date(2025, 3, 2).unwrap()),
    )
    .unwrap();

    let report = engine.reconcile(2, Tolerance::new(50).unwrap()).await.unwrap();

    // ACME: January 11% agrees (49 <= 50), January 8% agrees once the
    // internal contribution is derived (25000 x 8% = 2000), February
    // 11% diverges by 720.
    // GLOBEX: internal retried once, portal reports nothing -> diverges.
    // INITECH: portal rejects -> failed.
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].entity, "INITECH");
    assert_eq!(report.count(Transition::Opened), 2);

    let diffs: Vec<(String, i64)> = report
        .divergences()
        .map(|d| (d.id.to_string(), d.contribution_difference))
        .collect();
    assert_eq!(
        diffs,
        vec![
            ("ACME/2025-02/11.00%".to_string(), 720),
            ("GLOBEX/2025-01/11.00%".to_string(), -5_500),
        ]
    );
}
