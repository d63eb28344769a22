//! Property-based tests for the discrepancy engine.
//!
//! The delta conventions are contractual between operators: a wrong sign or a
//! spurious row in a settlement report is a billing dispute. These tests pin
//! the conventions across generated traffic figures rather than a handful of
//! hand-picked tables.

use proptest::prelude::*;
use roaming_settlement::discrepancy::{self, structural_diff};
use roaming_settlement::document::{
    DataFigure, DirectionFigures, DocumentState, GeneratedResult, Settlement, SettlementBody,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;

// These property tests cover:
//
// 1. Delta sign conventions - the contractual core of the report
// 2. Row omission - silent services must not produce rows
// 3. General rows - always the three bearers, in order
// 4. Perspective mirroring - swapping the operands swaps the columns
// 5. Structural diff - identity and mismatch surfacing
//
// Whole-service wiring (stores, reception) lives in the scenario tests.

/// Finite, non-negative traffic volume. Integers scaled to two decimals keep
/// the arithmetic exact enough for equality assertions.
fn volume_strategy() -> impl Strategy<Value = f64> {
    (0u32..2_000_000).prop_map(|n| f64::from(n) / 100.0)
}

fn data_figures_strategy() -> impl Strategy<Value = Vec<DataFigure>> {
    prop::collection::vec(
        ("[A-Z]{3,6}".prop_map(String::from), volume_strategy())
            .prop_map(|(name, value)| DataFigure { name, value }),
        0..4,
    )
}

fn direction_strategy() -> impl Strategy<Value = DirectionFigures> {
    (
        prop::collection::vec(volume_strategy(), 7),
        volume_strategy(),
        volume_strategy(),
        volume_strategy(),
        data_figures_strategy(),
        volume_strategy(),
    )
        .prop_map(|(moc, mtc, mo, mt, data, access)| {
            let mut figures = DirectionFigures::default();
            figures.voice.moc.back_home = moc[0];
            figures.voice.moc.local = moc[1];
            figures.voice.moc.international = moc[2];
            figures.voice.moc.premium = moc[3];
            figures.voice.moc.satellite = moc[4];
            figures.voice.moc.video_telephony = moc[5];
            figures.voice.moc.special_destinations = moc[6];
            figures.voice.mtc = mtc;
            figures.sms.mo = mo;
            figures.sms.mt = mt;
            figures.data = data;
            figures.access.network_access = access;
            figures
        })
}

fn generated_result_strategy() -> impl Strategy<Value = GeneratedResult> {
    (direction_strategy(), direction_strategy())
        .prop_map(|(inbound, outbound)| GeneratedResult { inbound, outbound })
}

fn settlement(contract_id: &str, owner: &str, result: GeneratedResult) -> Settlement {
    let mut body = SettlementBody::default();
    body.generated_result = Some(result);
    let mut s = Settlement::new(
        format!("stl_{owner}"),
        contract_id.to_string(),
        owner.to_string(),
        "MSP-X".to_string(),
        None,
        body,
    );
    s.state = DocumentState::Sent;
    s
}

/// Shallow JSON object from a generated string->number map.
fn object_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-z]{1,6}".prop_map(String::from), 0u32..1000, 1..6).prop_map(
        |entries: BTreeMap<String, u32>| {
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, json!(v)))
                    .collect(),
            )
        },
    )
}

proptest! {
    /// own == 0 with partner traffic reports +100; partner == 0 with own
    /// traffic reports -100; both silent produces no row at all.
    #[test]
    fn delta_signs_follow_the_convention(result in generated_result_strategy()) {
        let own = settlement("ctr_1", "MSP-A", result.clone());
        let silent = settlement("ctr_1", "MSP-B", GeneratedResult::default());

        let report = discrepancy::settlement_discrepancy(&own, &silent).unwrap();
        for row in &report.home_perspective.details {
            // The partner reported nothing, so every surviving row is ours.
            prop_assert!(row.own_calculation > 0.0);
            prop_assert_eq!(row.partner_calculation, 0.0);
            prop_assert_eq!(row.delta_calculation_percent, -100.0);
        }

        let mirror = discrepancy::settlement_discrepancy(&silent, &own).unwrap();
        for row in &mirror.home_perspective.details {
            prop_assert_eq!(row.own_calculation, 0.0);
            prop_assert!(row.partner_calculation > 0.0);
            prop_assert_eq!(row.delta_calculation_percent, 100.0);
        }
    }

    /// No row ever carries a both-zero pair, and deltas stay finite.
    #[test]
    fn silent_services_are_omitted(
        a in generated_result_strategy(),
        b in generated_result_strategy(),
    ) {
        let own = settlement("ctr_1", "MSP-A", a);
        let partner = settlement("ctr_1", "MSP-B", b);
        let report = discrepancy::settlement_discrepancy(&own, &partner).unwrap();
        for perspective in [&report.home_perspective, &report.partner_perspective] {
            for row in &perspective.details {
                prop_assert!(row.own_calculation != 0.0 || row.partner_calculation != 0.0);
                prop_assert!(row.delta_calculation_percent.is_finite());
            }
        }
    }

    /// The general block is always exactly Voice, SMS, Data, in that order,
    /// with the bearer's unit.
    #[test]
    fn general_rows_are_the_three_bearers(
        a in generated_result_strategy(),
        b in generated_result_strategy(),
    ) {
        let own = settlement("ctr_1", "MSP-A", a);
        let partner = settlement("ctr_1", "MSP-B", b);
        let report = discrepancy::settlement_discrepancy(&own, &partner).unwrap();
        for perspective in [&report.home_perspective, &report.partner_perspective] {
            let bearers: Vec<&str> = perspective
                .general_information
                .iter()
                .map(|r| r.bearer.as_str())
                .collect();
            prop_assert_eq!(bearers, vec!["Voice", "SMS", "Data"]);
            prop_assert_eq!(perspective.general_information[0].unit.as_str(), "min");
            prop_assert_eq!(perspective.general_information[1].unit.as_str(), "#");
            prop_assert_eq!(perspective.general_information[2].unit.as_str(), "MB");
        }
    }

    /// Swapping the two settlements swaps the column values within each
    /// perspective and exchanges the perspectives' service sets.
    #[test]
    fn perspectives_mirror_under_operand_swap(
        a in generated_result_strategy(),
        b in generated_result_strategy(),
    ) {
        let own = settlement("ctr_1", "MSP-A", a);
        let partner = settlement("ctr_1", "MSP-B", b);
        let forward = discrepancy::settlement_discrepancy(&own, &partner).unwrap();
        let backward = discrepancy::settlement_discrepancy(&partner, &own).unwrap();

        // forward.home compares own.inbound vs partner.outbound;
        // backward.partner compares partner.outbound vs own.inbound.
        let fwd = &forward.home_perspective.details;
        let bwd = &backward.partner_perspective.details;
        prop_assert_eq!(fwd.len(), bwd.len());
        for row in fwd {
            let mirrored = bwd
                .iter()
                .find(|r| r.service == row.service)
                .expect("service present in the mirrored perspective");
            prop_assert_eq!(row.own_calculation, mirrored.partner_calculation);
            prop_assert_eq!(row.partner_calculation, mirrored.own_calculation);
        }
    }

    /// A document compared against itself yields an empty difference.
    #[test]
    fn structural_diff_of_identical_objects_is_empty(obj in object_strategy()) {
        prop_assert_eq!(structural_diff(&obj, &obj), json!({}));
    }

    /// Changing one leaf surfaces exactly that key as an own/partner pair.
    #[test]
    fn structural_diff_surfaces_a_single_changed_leaf(
        obj in object_strategy(),
        delta in 1u32..1000,
    ) {
        let Value::Object(map) = &obj else { unreachable!() };
        let key = map.keys().next().cloned().expect("non-empty object");
        let original = map[&key].as_u64().expect("numeric leaf");

        let mut changed = obj.clone();
        changed[&key] = json!(original + u64::from(delta));

        let diff = structural_diff(&obj, &changed);
        prop_assert!(diff.is_object());
        let diff_map = diff.as_object().unwrap();
        prop_assert_eq!(diff_map.len(), 1);
        prop_assert_eq!(
            &diff_map[&key],
            &json!({"own": original, "partner": original + u64::from(delta)})
        );
    }
}
