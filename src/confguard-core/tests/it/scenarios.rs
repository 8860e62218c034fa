//! End-to-end loader behaviour against a scripted central service.

use std::time::Duration;

use base64::Engine;
use chrono::{TimeZone, Utc};
use sha2::{Digest, Sha256};

use confguard_core::cache::{COMMIT_MARKER_FILE, DOCUMENT_FILE, SIGNATURE_FILE};
use confguard_core::bundled::DEFAULT_SIGNATURE_FILE;
use confguard_core::document::parse_meta;
use confguard_core::{ArtifactSource, ConfigError, LoaderState, UpdateOutcome};

use crate::support::{Harness, Served};

fn cached_serial(h: &Harness) -> u64 {
    parse_meta(&h.cache().read().unwrap().document).unwrap().serial
}

/// Point the commit marker at whatever is on disk now, so the cache reads as
/// committed and only signature verification can reject it.
fn rehash_marker(h: &Harness) {
    let dir = &h.config.cache_dir;
    let path = dir.join(COMMIT_MARKER_FILE);
    let mut marker: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    for (field, file) in [("document_sha256", DOCUMENT_FILE), ("signature_sha256", SIGNATURE_FILE)] {
        let bytes = std::fs::read(dir.join(file)).unwrap();
        marker[field] = hex::encode(Sha256::digest(&bytes)).into();
    }
    std::fs::write(&path, serde_json::to_vec(&marker).unwrap()).unwrap();
}

// =============================================================================
// Bootstrap
// =============================================================================

#[tokio::test]
async fn first_run_uses_bundled_default() {
    let h = Harness::new(5);
    h.central.serve_issued(&h.issuer, 5);

    let report = h.loader().init_configuration().await.unwrap();

    assert_eq!(report.document.serial(), 5);
    assert_eq!(report.source, ArtifactSource::Default);
    assert_eq!(report.update, UpdateOutcome::Unchanged);
    assert!(h.cache().exists());
    assert_eq!(h.metadata().accepted_serial(), Some(5));
}

#[tokio::test]
async fn first_run_derives_timestamps_from_issue_date() {
    let h = Harness::new(5);
    h.central.set_offline(true);

    let loader = h.loader();
    let document = loader.load_local().unwrap();

    let issued = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    assert_eq!(document.last_checked_at(), issued);
    assert_eq!(document.last_updated_at(), issued);
    assert_eq!(h.metadata().last_checked_at(), Some(issued));
    assert_eq!(loader.state(), LoaderState::Bootstrapped);
    assert_eq!(h.central.probes(), 0);
}

#[tokio::test]
async fn empty_cache_without_network_keeps_bundled_default() {
    let h = Harness::new(5);
    h.central.set_offline(true);
    let loader = h.loader();

    let err = loader.init_configuration().await.unwrap_err();

    assert!(matches!(err, ConfigError::UpdateCheckFailed(_)));
    assert!(err.is_update_unavailable());
    assert!(!err.is_fatal());
    assert_eq!(loader.current().unwrap().serial(), 5);
    assert_eq!(loader.state(), LoaderState::UpdateSkipped);
    assert_eq!(
        h.metadata().last_checked_at(),
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    );
}

#[tokio::test]
async fn broken_bundled_default_is_fatal() {
    let h = Harness::new(5);
    std::fs::write(h.bundle_dir.join(DEFAULT_SIGNATURE_FILE), b"not a signature").unwrap();
    let loader = h.loader();

    let err = loader.init_configuration().await.unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(err, ConfigError::BundledVerificationFailed { .. }));
    assert!(matches!(loader.current(), Err(ConfigError::NotInitialized)));
    assert_eq!(h.central.probes(), 0);
}

#[tokio::test]
async fn partial_cache_falls_back_to_bundled_default() {
    let h = Harness::new(5);
    h.seed_cache(5, 1);
    std::fs::remove_file(h.config.cache_dir.join(SIGNATURE_FILE)).unwrap();
    assert!(!h.cache().exists());

    let report = h.loader().init_configuration().await.unwrap();

    assert_eq!(report.document.serial(), 5);
    assert_eq!(report.source, ArtifactSource::Default);
    assert!(h.cache().exists());
}

#[test]
fn tampered_cache_falls_back_to_bundled_default() {
    let h = Harness::new(5);
    h.seed_cache(7, 1);
    let path = h.config.cache_dir.join(DOCUMENT_FILE);
    let forged = std::fs::read_to_string(&path)
        .unwrap()
        .replace("\"SERIAL\": 7", "\"SERIAL\": 70");
    std::fs::write(&path, forged).unwrap();
    rehash_marker(&h);
    assert!(h.cache().exists());

    let document = h.loader().load_local().unwrap();

    assert_eq!(document.serial(), 5);
    assert_eq!(document.source(), ArtifactSource::Default);
    assert_eq!(cached_serial(&h), 5);
    assert_eq!(h.metadata().accepted_serial(), Some(7));
    assert_eq!(h.central.probes(), 0);
}

#[test]
fn signed_but_unparsable_cache_falls_back_to_bundled_default() {
    let h = Harness::new(5);
    h.seed_cache(7, 1);
    let garbage = b"not a configuration document";
    std::fs::write(h.config.cache_dir.join(DOCUMENT_FILE), garbage).unwrap();
    std::fs::write(h.config.cache_dir.join(SIGNATURE_FILE), h.issuer.sign(garbage)).unwrap();
    rehash_marker(&h);
    assert!(h.cache().exists());

    let document = h.loader().load_local().unwrap();

    assert_eq!(document.serial(), 5);
    assert_eq!(document.source(), ArtifactSource::Default);
    assert_eq!(cached_serial(&h), 5);
}

#[test]
fn local_load_writes_cache_and_metadata_on_first_run() {
    let h = Harness::new(5);
    h.central.set_offline(true);
    assert!(!h.config.metadata_path.exists());
    assert!(!h.cache().exists());

    h.loader().load_local().unwrap();

    assert!(h.cache().exists());
    assert_eq!(cached_serial(&h), 5);
    let stored = h.metadata().load();
    let issued = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    assert_eq!(stored.accepted_serial, Some(5));
    assert_eq!(stored.last_checked_at, Some(issued));
    assert_eq!(stored.last_updated_at, Some(issued));
    assert_eq!(h.central.probes(), 0);
}

#[tokio::test]
async fn newer_bundled_default_replaces_cache() {
    let h = Harness::with_declared(7, Some(7));
    h.seed_cache(5, 1);

    let report = h.loader().init_configuration().await.unwrap();

    assert_eq!(report.update, UpdateOutcome::NotDue);
    assert_eq!(report.document.serial(), 7);
    assert_eq!(report.source, ArtifactSource::Default);
    assert_eq!(cached_serial(&h), 7);
    assert_eq!(h.metadata().accepted_serial(), Some(7));
}

#[tokio::test]
async fn older_bundled_default_does_not_replace_cache() {
    let h = Harness::with_declared(3, Some(3));
    h.seed_cache(5, 1);

    let report = h.loader().init_configuration().await.unwrap();

    assert_eq!(report.document.serial(), 5);
    assert_eq!(report.source, ArtifactSource::Cache);
}

// =============================================================================
// Staleness and central check
// =============================================================================

#[tokio::test]
async fn recent_check_makes_no_network_call() {
    let h = Harness::new(5);
    h.seed_cache(5, 1);
    h.central.serve_issued(&h.issuer, 6);
    let checked_before = h.metadata().last_checked_at();

    let loader = h.loader();
    let report = loader.init_configuration().await.unwrap();

    assert_eq!(report.update, UpdateOutcome::NotDue);
    assert_eq!(report.document.serial(), 5);
    assert_eq!(report.source, ArtifactSource::Cache);
    assert_eq!(h.central.probes(), 0);
    assert_eq!(h.metadata().last_checked_at(), checked_before);
    assert_eq!(loader.state(), LoaderState::Fresh);
}

#[tokio::test]
async fn stale_check_accepts_newer_document() {
    let h = Harness::new(5);
    h.seed_cache(5, 5);
    let (document, public_key, signature) = h.issuer.issue(6);
    h.central.serve(Served {
        document,
        public_key,
        signature: base64::engine::general_purpose::STANDARD
            .encode(signature)
            .into_bytes(),
    });
    let updated_before = h.metadata().last_updated_at().unwrap();

    let loader = h.loader();
    let report = loader.init_configuration().await.unwrap();

    assert_eq!(report.update, UpdateOutcome::Updated { from: 5, to: 6 });
    assert_eq!(report.document.serial(), 6);
    assert_eq!(report.source, ArtifactSource::Central);
    assert_eq!(cached_serial(&h), 6);

    let metadata = h.metadata().load();
    assert_eq!(metadata.accepted_serial, Some(6));
    assert!(metadata.last_updated_at.unwrap() > updated_before);
    assert_eq!(metadata.last_checked_at, metadata.last_updated_at);
    assert_eq!(loader.state(), LoaderState::Fresh);
}

#[tokio::test]
async fn forged_central_document_is_rejected() {
    let h = Harness::new(5);
    h.seed_cache(5, 5);
    let (document, public_key, signature) = h.issuer.issue(6);
    h.central.serve(Served {
        document: document.replace("tsa.example", "tsa.attacker.example"),
        public_key,
        signature,
    });
    let before = h.metadata().load();

    let report = h.loader().init_configuration().await.unwrap();

    assert_eq!(report.update, UpdateOutcome::RejectedSignature);
    assert_eq!(report.document.serial(), 5);
    assert_eq!(cached_serial(&h), 5);

    let after = h.metadata().load();
    assert!(after.last_checked_at > before.last_checked_at);
    assert_eq!(after.last_updated_at, before.last_updated_at);
    assert_eq!(after.accepted_serial, Some(5));
}

#[tokio::test]
async fn older_central_document_is_discarded() {
    let h = Harness::new(5);
    h.seed_cache(5, 5);
    h.central.serve_issued(&h.issuer, 4);
    let before = h.metadata().load();

    let report = h.loader().init_configuration().await.unwrap();

    assert_eq!(
        report.update,
        UpdateOutcome::RolledBack {
            candidate: 4,
            current: 5
        }
    );
    assert_eq!(report.document.serial(), 5);
    assert_eq!(cached_serial(&h), 5);

    let after = h.metadata().load();
    assert!(after.last_checked_at > before.last_checked_at);
    assert_eq!(after.last_updated_at, before.last_updated_at);
}

#[tokio::test]
async fn candidate_below_accepted_serial_is_discarded() {
    let h = Harness::new(5);
    h.seed_cache(5, 5);
    let mut metadata = h.metadata().load();
    metadata.accepted_serial = Some(8);
    h.metadata().store(&metadata).unwrap();
    h.central.serve_issued(&h.issuer, 6);

    let report = h.loader().init_configuration().await.unwrap();

    assert_eq!(
        report.update,
        UpdateOutcome::RolledBack {
            candidate: 6,
            current: 5
        }
    );
    assert_eq!(h.metadata().accepted_serial(), Some(8));
}

#[tokio::test]
async fn matching_probe_skips_full_fetch() {
    let h = Harness::new(5);
    h.seed_cache(5, 5);
    let (document, public_key, signature) = h.issuer.issue(5);
    h.central.serve(Served {
        document,
        public_key,
        signature: base64::engine::general_purpose::STANDARD
            .encode(signature)
            .into_bytes(),
    });
    let before = h.metadata().load();

    let report = h.loader().init_configuration().await.unwrap();

    assert_eq!(report.update, UpdateOutcome::Unchanged);
    assert_eq!(h.central.probes(), 1);
    assert_eq!(h.central.full_fetches(), 0);
    assert!(report.document.last_checked_at() > before.last_checked_at.unwrap());
    assert_eq!(
        Some(report.document.last_updated_at()),
        before.last_updated_at
    );
}

#[tokio::test]
async fn central_timeout_keeps_document_and_timestamps() {
    let mut h = Harness::new(5);
    h.config.fetch_timeout = Duration::from_millis(100);
    h.seed_cache(5, 5);
    h.central.serve_issued(&h.issuer, 6);
    h.central.set_delay(Duration::from_secs(5));
    let before = h.metadata().load();

    let loader = h.loader();
    let err = loader.init_configuration().await.unwrap_err();

    match err {
        ConfigError::UpdateCheckFailed(inner) => {
            assert!(matches!(*inner, ConfigError::Timeout { .. }));
        },
        other => panic!("Expected UpdateCheckFailed, got {:?}", other),
    }
    assert_eq!(loader.current().unwrap().serial(), 5);
    assert_eq!(h.metadata().load(), before);
}

#[tokio::test]
async fn repeated_init_is_idempotent() {
    let h = Harness::new(5);
    h.seed_cache(5, 5);
    h.central.serve_issued(&h.issuer, 5);
    let loader = h.loader();

    let first = loader.init_configuration().await.unwrap();
    let checked = h.metadata().last_checked_at();
    let second = loader.init_configuration().await.unwrap();

    assert_eq!(first.update, UpdateOutcome::Unchanged);
    assert_eq!(second.update, UpdateOutcome::NotDue);
    assert_eq!(first.document.raw(), second.document.raw());
    assert_eq!(h.metadata().last_checked_at(), checked);
    assert_eq!(h.central.probes(), 1);
}

// =============================================================================
// Forced checks and consumers
// =============================================================================

#[tokio::test]
async fn forced_check_ignores_interval() {
    let h = Harness::new(5);
    h.seed_cache(5, 1);
    h.central.serve_issued(&h.issuer, 6);
    let loader = h.loader();

    let report = loader.init_configuration().await.unwrap();
    assert_eq!(report.update, UpdateOutcome::NotDue);

    let outcome = loader.check_for_update().await.unwrap();
    assert_eq!(outcome, UpdateOutcome::Updated { from: 5, to: 6 });
    assert_eq!(loader.current().unwrap().serial(), 6);
}

#[tokio::test]
async fn forced_check_requires_bootstrap() {
    let h = Harness::new(5);
    let err = h.loader().check_for_update().await.unwrap_err();
    assert!(matches!(err, ConfigError::NotInitialized));
    assert_eq!(h.central.probes(), 0);
}

#[tokio::test]
async fn handle_observes_update() {
    let h = Harness::new(5);
    h.seed_cache(5, 5);
    h.central.serve_issued(&h.issuer, 6);
    let loader = h.loader();
    let handle = loader.handle();
    let mut rx = handle.subscribe();

    assert!(handle.try_current().is_none());
    loader.init_configuration().await.unwrap();

    assert_eq!(handle.current().unwrap().serial(), 6);
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().as_ref().map(|d| d.serial()), Some(6));
}

#[tokio::test]
async fn update_survives_restart() {
    let h = Harness::new(5);
    h.seed_cache(5, 5);
    h.central.serve_issued(&h.issuer, 6);
    h.loader().init_configuration().await.unwrap();

    h.central.set_offline(true);
    let restarted = h.loader();
    let report = restarted.init_configuration().await.unwrap();

    assert_eq!(report.update, UpdateOutcome::NotDue);
    assert_eq!(report.document.serial(), 6);
    assert_eq!(report.source, ArtifactSource::Cache);
}
