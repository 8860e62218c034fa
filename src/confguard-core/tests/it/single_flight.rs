//! Concurrent callers against one cache directory share a single central
//! check.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use confguard_core::document::parse_meta;
use confguard_core::UpdateOutcome;

use crate::support::Harness;

#[tokio::test]
async fn concurrent_inits_issue_one_probe() {
    let h = Harness::new(5);
    h.seed_cache(5, 5);
    h.central.serve_issued(&h.issuer, 6);
    h.central.set_delay(Duration::from_millis(100));

    let a = h.loader();
    let b = h.loader();
    let (ra, rb) = tokio::join!(a.init_configuration(), b.init_configuration());
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(h.central.probes(), 1);
    assert_eq!(h.central.full_fetches(), 1);

    let outcomes = [ra.update, rb.update];
    assert!(outcomes.contains(&UpdateOutcome::Updated { from: 5, to: 6 }));
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, UpdateOutcome::Updated { .. }
            | UpdateOutcome::SatisfiedByConcurrentCheck
            | UpdateOutcome::NotDue)));

    // The waiter adopts the document committed by the other loader.
    assert_eq!(a.current().unwrap().serial(), 6);
    assert_eq!(b.current().unwrap().serial(), 6);
}

#[tokio::test]
async fn concurrent_forced_checks_on_one_loader() {
    let h = Harness::new(5);
    h.seed_cache(5, 1);
    h.central.serve_issued(&h.issuer, 5);
    h.central.set_delay(Duration::from_millis(50));

    let loader = Arc::new(h.loader());
    loader.init_configuration().await.unwrap();

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let loader = Arc::clone(&loader);
            tokio::spawn(async move { loader.check_for_update().await })
        })
        .collect();

    let mut satisfied = 0;
    let mut unchanged = 0;
    for task in tasks {
        match task.await.unwrap().unwrap() {
            UpdateOutcome::Unchanged => unchanged += 1,
            UpdateOutcome::SatisfiedByConcurrentCheck => satisfied += 1,
            other => panic!("Unexpected outcome {:?}", other),
        }
    }

    assert_eq!(unchanged + satisfied, 4);
    assert_eq!(h.central.probes(), unchanged);
    assert!(unchanged >= 1);
    assert!(satisfied >= 1);
}

#[tokio::test]
async fn separate_caches_do_not_share_a_flight() {
    let first = Harness::new(5);
    let second = Harness::new(5);
    for h in [&first, &second] {
        h.seed_cache(5, 5);
        h.central.serve_issued(&h.issuer, 5);
        h.central.set_delay(Duration::from_millis(50));
    }

    let (a, b) = (first.loader(), second.loader());
    let (ra, rb) = tokio::join!(a.init_configuration(), b.init_configuration());

    assert_eq!(ra.unwrap().update, UpdateOutcome::Unchanged);
    assert_eq!(rb.unwrap().update, UpdateOutcome::Unchanged);
    assert_eq!(first.central.probes(), 1);
    assert_eq!(second.central.probes(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bootstrap_during_update_keeps_accepted_serial() {
    let issued = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    for round in 0..40u64 {
        let h = Harness::new(5);
        h.central.serve_issued(&h.issuer, 6);
        h.central.set_delay(Duration::from_millis(10));

        let updater = Arc::new(h.loader());
        updater.load_local().unwrap();
        // The second loader then sees a first run.
        std::fs::remove_file(&h.config.metadata_path).unwrap();

        let check = {
            let updater = Arc::clone(&updater);
            tokio::spawn(async move { updater.check_for_update().await })
        };
        let starter = h.loader();
        let offset = Duration::from_millis((round % 8) * 5);
        let local = tokio::task::spawn_blocking(move || {
            std::thread::sleep(offset);
            starter.load_local().map(|d| d.serial())
        });

        assert_eq!(
            check.await.unwrap().unwrap(),
            UpdateOutcome::Updated { from: 5, to: 6 }
        );
        local.await.unwrap().unwrap();

        let stored = h.metadata().load();
        assert_eq!(stored.accepted_serial, Some(6), "round {}", round);
        assert!(stored.last_updated_at > Some(issued), "round {}", round);
        assert!(stored.last_checked_at > Some(issued), "round {}", round);
        let cached = parse_meta(&h.cache().read().unwrap().document).unwrap();
        assert_eq!(cached.serial, 6, "round {}", round);
    }
}
