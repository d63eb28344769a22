//! Discrepancy engine: pure comparison of two parties' independently
//! computed settlement or usage figures.
//!
//! Settlement bodies go through a fixed canonical service-name projection and
//! come back as two symmetric perspectives of percentage deltas. Everything
//! else falls back to a structural diff of the JSON bodies.

use crate::document::{DirectionFigures, Settlement, Usage};
use crate::error::{EngineError, EngineResult};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;

const UNIT_VOICE: &str = "min";
const UNIT_SMS: &str = "#";
const UNIT_DATA: &str = "MB";
const UNIT_ACCESS: &str = "#";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bearer {
    Voice,
    Sms,
    Data,
}

impl Bearer {
    fn label(self) -> &'static str {
        match self {
            Bearer::Voice => "Voice",
            Bearer::Sms => "SMS",
            Bearer::Data => "Data",
        }
    }

    fn unit(self) -> &'static str {
        match self {
            Bearer::Voice => UNIT_VOICE,
            Bearer::Sms => UNIT_SMS,
            Bearer::Data => UNIT_DATA,
        }
    }
}

struct Figure {
    service: String,
    bearer: Bearer,
    unit: &'static str,
    value: f64,
}

fn fixed(service: &str, bearer: Bearer, unit: &'static str, value: f64) -> Figure {
    Figure {
        service: service.to_string(),
        bearer,
        unit,
        value,
    }
}

/// `NB-IOT` is the only data-service spelling that gets fixed up; everything
/// else passes through (GPRS, VoLTE, ...).
fn canonical_data_name(name: &str) -> String {
    if name.eq_ignore_ascii_case("NB-IOT") {
        "NB-IoT".to_string()
    } else {
        name.to_string()
    }
}

/// Flatten one direction's raw figures into the fixed canonical projection.
fn normalize(figures: &DirectionFigures) -> Vec<Figure> {
    let moc = &figures.voice.moc;
    let mut out = vec![
        fixed("MOC Back Home", Bearer::Voice, UNIT_VOICE, moc.back_home),
        fixed("MOC Local", Bearer::Voice, UNIT_VOICE, moc.local),
        fixed("MOC International", Bearer::Voice, UNIT_VOICE, moc.international),
        fixed("MOC Premium", Bearer::Voice, UNIT_VOICE, moc.premium),
        fixed("MOC Satellite", Bearer::Voice, UNIT_VOICE, moc.satellite),
        fixed(
            "MOC Video Telephony",
            Bearer::Voice,
            UNIT_VOICE,
            moc.video_telephony,
        ),
        fixed(
            "MOC Special Destinations",
            Bearer::Voice,
            UNIT_VOICE,
            moc.special_destinations,
        ),
        fixed("MTC", Bearer::Voice, UNIT_VOICE, figures.voice.mtc),
        fixed("SMSMO", Bearer::Sms, UNIT_SMS, figures.sms.mo),
        fixed("SMSMT", Bearer::Sms, UNIT_SMS, figures.sms.mt),
    ];
    for data in &figures.data {
        out.push(Figure {
            service: canonical_data_name(&data.name),
            bearer: Bearer::Data,
            unit: UNIT_DATA,
            value: data.value,
        });
    }
    out.push(fixed(
        "Network Access",
        Bearer::Data,
        UNIT_ACCESS,
        figures.access.network_access,
    ));
    out
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Locked delta convention: percent change when `own != 0`, `100` when only
/// the partner reports traffic, omitted when both sides report nothing.
fn delta_percent(own: f64, partner: f64) -> Option<f64> {
    if own == 0.0 && partner == 0.0 {
        None
    } else if own == 0.0 {
        Some(100.0)
    } else {
        Some(round2(((partner - own) / own) * 100.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneralRow {
    pub bearer: String,
    pub unit: String,
    pub own_calculation: f64,
    pub partner_calculation: f64,
    pub delta_calculation_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailRow {
    pub service: String,
    pub unit: String,
    pub own_calculation: f64,
    pub partner_calculation: f64,
    pub delta_calculation_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Perspective {
    pub general_information: Vec<GeneralRow>,
    pub details: Vec<DetailRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementDiscrepancy {
    pub home_perspective: Perspective,
    pub partner_perspective: Perspective,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericDiscrepancy {
    pub generated_discrepancy: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Discrepancy {
    Settlement(SettlementDiscrepancy),
    Generic(GenericDiscrepancy),
}

/// Build one perspective: `own` figures against the `partner` figures for the
/// same traffic direction.
fn perspective(own: &DirectionFigures, partner: &DirectionFigures) -> Perspective {
    // Union of canonical services, first-seen order (fixed services first,
    // then data names as they appear on either side).
    let mut merged: Vec<(String, Bearer, &'static str, f64, f64)> = Vec::new();
    for figure in normalize(own) {
        match merged.iter_mut().find(|row| row.0 == figure.service) {
            Some(row) => row.3 += figure.value,
            None => merged.push((figure.service, figure.bearer, figure.unit, figure.value, 0.0)),
        }
    }
    for figure in normalize(partner) {
        match merged.iter_mut().find(|row| row.0 == figure.service) {
            Some(row) => row.4 += figure.value,
            None => merged.push((figure.service, figure.bearer, figure.unit, 0.0, figure.value)),
        }
    }

    let details = merged
        .iter()
        .filter_map(|(service, _, unit, own_v, partner_v)| {
            delta_percent(*own_v, *partner_v).map(|delta| DetailRow {
                service: service.clone(),
                unit: unit.to_string(),
                own_calculation: *own_v,
                partner_calculation: *partner_v,
                delta_calculation_percent: delta,
            })
        })
        .collect();

    let general_information = [Bearer::Voice, Bearer::Sms, Bearer::Data]
        .into_iter()
        .map(|bearer| {
            let (own_sum, partner_sum) = merged
                .iter()
                .filter(|row| row.1 == bearer)
                .fold((0.0, 0.0), |(o, p), row| (o + row.3, p + row.4));
            GeneralRow {
                bearer: bearer.label().to_string(),
                unit: bearer.unit().to_string(),
                own_calculation: own_sum,
                partner_calculation: partner_sum,
                delta_calculation_percent: delta_percent(own_sum, partner_sum).unwrap_or(0.0),
            }
        })
        .collect();

    Perspective {
        general_information,
        details,
    }
}

/// Compare two settlements for the same contract.
///
/// `home_perspective` answers "what does the partner claim it sent us":
/// local inbound against partner outbound. `partner_perspective` is the
/// mirror. A partner copy without a usable `generatedResult` compares as all
/// zeros, which surfaces as `-100` deltas wherever we computed traffic.
pub fn settlement_discrepancy(
    local: &Settlement,
    partner: &Settlement,
) -> EngineResult<SettlementDiscrepancy> {
    if local.contract_id != partner.contract_id {
        return Err(EngineError::NotFound);
    }
    let local_result = local.body.generated_result.clone().unwrap_or_default();
    let partner_result = partner.body.generated_result.clone().unwrap_or_default();
    Ok(SettlementDiscrepancy {
        home_perspective: perspective(&local_result.inbound, &partner_result.outbound),
        partner_perspective: perspective(&local_result.outbound, &partner_result.inbound),
    })
}

/// Compare two usages for the same contract: object-level difference
/// reporting, no telecom semantics.
pub fn usage_discrepancy(
    local: &Usage,
    partner: &Usage,
    other_data: Option<Value>,
) -> EngineResult<GenericDiscrepancy> {
    if local.contract_id != partner.contract_id {
        return Err(EngineError::NotFound);
    }
    Ok(GenericDiscrepancy {
        generated_discrepancy: structural_diff(&local.body, &partner.body),
        other_data,
    })
}

/// Dispatcher over document kinds; comparing across kinds is a caller error.
pub enum DiscrepancyInput<'a> {
    Settlement(&'a Settlement),
    Usage(&'a Usage),
}

pub fn compute_discrepancy(
    local: DiscrepancyInput<'_>,
    partner: DiscrepancyInput<'_>,
    other_data: Option<Value>,
) -> EngineResult<Discrepancy> {
    match (local, partner) {
        (DiscrepancyInput::Settlement(l), DiscrepancyInput::Settlement(p)) => {
            Ok(Discrepancy::Settlement(settlement_discrepancy(l, p)?))
        }
        (DiscrepancyInput::Usage(l), DiscrepancyInput::Usage(p)) => {
            Ok(Discrepancy::Generic(usage_discrepancy(l, p, other_data)?))
        }
        _ => Err(EngineError::Validation(
            "cannot compare documents of different types".into(),
        )),
    }
}

/// Recursive object diff: keys whose leaves differ, with both sides' values.
pub fn structural_diff(own: &Value, partner: &Value) -> Value {
    diff(own, partner).unwrap_or_else(|| json!({}))
}

fn diff(own: &Value, partner: &Value) -> Option<Value> {
    match (own, partner) {
        (Value::Object(a), Value::Object(b)) => {
            let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
            let mut out = Map::new();
            for key in keys {
                let left = a.get(key).unwrap_or(&Value::Null);
                let right = b.get(key).unwrap_or(&Value::Null);
                if let Some(child) = diff(left, right) {
                    out.insert(key.clone(), child);
                }
            }
            if out.is_empty() {
                None
            } else {
                Some(Value::Object(out))
            }
        }
        _ if own == partner => None,
        _ => Some(json!({ "own": own, "partner": partner })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DataFigure;

    #[test]
    fn delta_follows_the_locked_convention() {
        assert_eq!(delta_percent(10234.0, 10238.0), Some(0.04));
        assert_eq!(delta_percent(0.0, 234.0), Some(100.0));
        assert_eq!(delta_percent(6780.0, 0.0), Some(-100.0));
        assert_eq!(delta_percent(0.0, 0.0), None);
    }

    #[test]
    fn zero_on_both_sides_drops_the_detail_row() {
        let mut own = DirectionFigures::default();
        let mut partner = DirectionFigures::default();
        own.voice.moc.local = 120.0;
        partner.voice.moc.local = 118.0;

        let view = perspective(&own, &partner);
        assert_eq!(view.details.len(), 1);
        assert_eq!(view.details[0].service, "MOC Local");
        assert_eq!(view.general_information.len(), 3);
    }

    #[test]
    fn data_names_are_canonicalized() {
        let mut own = DirectionFigures::default();
        own.data.push(DataFigure {
            name: "NB-IOT".into(),
            value: 12.5,
        });
        let partner = DirectionFigures::default();

        let view = perspective(&own, &partner);
        let row = view
            .details
            .iter()
            .find(|r| r.service == "NB-IoT")
            .expect("NB-IoT row");
        assert_eq!(row.delta_calculation_percent, -100.0);
    }

    #[test]
    fn structural_diff_reports_both_sides() {
        let own = json!({"traffic": {"voice": 10, "sms": 4}, "period": "2026-07"});
        let partner = json!({"traffic": {"voice": 12, "sms": 4}, "period": "2026-07"});
        let report = structural_diff(&own, &partner);
        assert_eq!(
            report,
            json!({"traffic": {"voice": {"own": 10, "partner": 12}}})
        );
    }
}
