//! Property tests for anti-rollback.
//!
//! Whatever sequence of validly signed serials the central service offers,
//! the published and accepted serials never decrease.

use proptest::prelude::*;

use confguard_core::UpdateOutcome;

use crate::support::Harness;

/// Run forced checks for each offered serial; return (published, accepted,
/// outcome) after every step.
fn run_checks(initial: u64, offered: &[u64]) -> Vec<(u64, Option<u64>, UpdateOutcome)> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let h = Harness::new(initial);
        h.seed_cache(initial, 1);
        let loader = h.loader();
        loader.init_configuration().await.unwrap();

        let mut steps = Vec::with_capacity(offered.len());
        for &serial in offered {
            h.central.serve_issued(&h.issuer, serial);
            let outcome = loader.check_for_update().await.unwrap();
            steps.push((
                loader.current().unwrap().serial(),
                h.metadata().accepted_serial(),
                outcome,
            ));
        }
        steps
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 24,
        max_shrink_iters: 100,
        ..ProptestConfig::default()
    })]

    /// Published serial is the running maximum of everything offered.
    #[test]
    fn published_serial_is_running_max(
        initial in 1u64..20,
        offered in prop::collection::vec(0u64..30, 1..8)
    ) {
        let steps = run_checks(initial, &offered);

        let mut max = initial;
        for (&serial, (published, accepted, outcome)) in offered.iter().zip(&steps) {
            let previous = max;
            max = max.max(serial);

            prop_assert_eq!(*published, max);
            prop_assert_eq!(*accepted, Some(max));

            if serial > previous {
                prop_assert_eq!(outcome, &UpdateOutcome::Updated { from: previous, to: serial });
            } else {
                let updated = matches!(outcome, UpdateOutcome::Updated { .. });
                prop_assert!(!updated, "serial {} not above {} was accepted", serial, previous);
            }
        }
    }

    /// Accepted serials never decrease across checks.
    #[test]
    fn accepted_serial_non_decreasing(
        offered in prop::collection::vec(0u64..30, 2..8)
    ) {
        let steps = run_checks(10, &offered);
        let accepted: Vec<u64> = steps.iter().filter_map(|(_, a, _)| *a).collect();

        prop_assert_eq!(accepted.len(), steps.len());
        for pair in accepted.windows(2) {
            prop_assert!(pair[0] <= pair[1]);
        }
    }
}
