//! Property-based invariants for the pure lifecycle engine logic:
//! quantity conservation, serial reconciliation, and the stage status
//! rule.

use fulfillment_core::lifecycle::quantity_ledger::available_quantity;
use fulfillment_core::lifecycle::serial::{parse_serials, validate_serial_count};
use fulfillment_core::lifecycle::{StageCounts, StageStatus};
use proptest::prelude::*;

proptest! {
    /// Property: availability is never negative and never exceeds the total
    #[test]
    fn availability_stays_within_bounds(
        total in 0i32..10_000,
        dispatched in prop::collection::vec(0i32..500, 0..20),
    ) {
        let available = available_quantity(total, &dispatched);
        prop_assert!(available >= 0);
        prop_assert!(available <= total);
    }

    /// Property: a sequence of allocations, each gated by the ledger, can
    /// never over-allocate the line's total quantity
    #[test]
    fn gated_allocations_conserve_quantity(
        total in 1i32..1_000,
        requests in prop::collection::vec(1i32..200, 1..30),
    ) {
        let mut accepted: Vec<i32> = Vec::new();
        for request in requests {
            let available = available_quantity(total, &accepted);
            if request <= available {
                accepted.push(request);
            }
        }
        let allocated: i32 = accepted.iter().sum();
        prop_assert!(allocated <= total);
    }

    /// Property: parsed serial tokens are trimmed and non-empty
    #[test]
    fn parsed_tokens_are_clean(text in ".{0,200}") {
        for token in parse_serials(&text) {
            prop_assert!(!token.is_empty());
            prop_assert_eq!(token.trim(), token.as_str());
            prop_assert!(!token.contains(','));
        }
    }

    /// Property: the reconciler accepts exactly when the distinct token
    /// count equals the dispatched quantity
    #[test]
    fn serial_validation_matches_token_count(
        quantity in 0i32..20,
        tokens in prop::collection::hash_set("[A-Z][A-Z0-9]{1,6}", 0..20),
    ) {
        let tokens: Vec<String> = tokens.into_iter().collect();
        let text = tokens.join(", ");
        let result = validate_serial_count(quantity, &text);
        if tokens.len() == quantity as usize {
            prop_assert_eq!(result.unwrap(), parse_serials(&text));
        } else {
            prop_assert!(result.is_err());
        }
    }

    /// Property: Done requires an empty eligible set and all records done;
    /// an empty stage is Not Started
    #[test]
    fn status_rule_is_consistent(
        eligible in 0i64..50,
        total in 0i64..50,
        completed_gap in 0i64..50,
    ) {
        let completed = (total - completed_gap).max(0);
        let counts = StageCounts { eligible, total, completed };
        match counts.status() {
            StageStatus::NotStarted => prop_assert_eq!(total, 0),
            StageStatus::Done => {
                prop_assert_eq!(eligible, 0);
                prop_assert_eq!(completed, total);
                prop_assert!(total > 0);
            }
            StageStatus::InProgress => {
                prop_assert!(total > 0);
                prop_assert!(eligible > 0 || completed < total);
            }
        }
    }

    /// Property: once a stage is Done, the operations the engine allows
    /// (consuming an eligible item into a record, completing a record)
    /// cannot move it back to Not Started or In-Progress
    #[test]
    fn done_is_monotonic_under_allowed_operations(
        total in 1i64..50,
        ops in prop::collection::vec(prop::bool::ANY, 0..20),
    ) {
        let mut counts = StageCounts { eligible: 0, total, completed: total };
        prop_assert_eq!(counts.status(), StageStatus::Done);

        for consume in ops {
            if consume && counts.eligible > 0 {
                // an eligible item becomes a record
                counts.eligible -= 1;
                counts.total += 1;
            } else if counts.completed < counts.total {
                counts.completed += 1;
            }
            prop_assert_eq!(counts.status(), StageStatus::Done);
        }
    }
}

#[test]
fn quantity_walk_over_a_ten_unit_line() {
    // total 10: dispatch A takes 6, B's request for 5 is rejected, B takes
    // the remaining 4, and a third request for 1 is rejected
    let mut dispatched = Vec::new();
    assert_eq!(available_quantity(10, &dispatched), 10);

    dispatched.push(6);
    assert_eq!(available_quantity(10, &dispatched), 4);
    assert!(5 > available_quantity(10, &dispatched));

    dispatched.push(4);
    assert_eq!(available_quantity(10, &dispatched), 0);
    assert!(1 > available_quantity(10, &dispatched));
}

#[test]
fn serial_count_mismatch_names_both_counts() {
    use fulfillment_core::FulfillmentError;

    let err = validate_serial_count(3, "A1, A2").unwrap_err();
    match err {
        FulfillmentError::SerialCountMismatch { expected, actual } => {
            assert_eq!((expected, actual), (3, 2));
        }
        other => panic!("expected count mismatch, got {other}"),
    }
    assert_eq!(validate_serial_count(3, "A1,A2,A3").unwrap().len(), 3);
}
