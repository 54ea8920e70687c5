//! Vehicle status polling
//!
//! The status document nests records as
//! `StoredVehicleDataResponse.vehicleData.data[].field[]`; each poll
//! flattens them into one `status id -> value` map per vehicle.

use std::collections::BTreeMap;

use serde_json::Value;
use skoda_session::Session;
use tracing::{debug, warn};

/// One reading. A record without a `value` key is kept with an empty value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusValue {
    pub value: String,
    pub text_id: Option<String>,
}

/// Latest readings of one vehicle, keyed by status id.
pub type VehicleState = BTreeMap<String, StatusValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Updated,
    /// Payload lacked the expected nesting; previous state kept.
    Malformed,
    /// Throttle window active; no request sent.
    Throttled,
}

impl PollOutcome {
    pub fn label(self) -> &'static str {
        match self {
            PollOutcome::Updated => "ok",
            PollOutcome::Malformed => "malformed",
            PollOutcome::Throttled => "throttled",
        }
    }
}

/// Flatten a status document, or `None` if it is not shaped as expected.
pub fn flatten_status(doc: &Value) -> Option<VehicleState> {
    let data = doc
        .pointer("/StoredVehicleDataResponse/vehicleData/data")?
        .as_array()?;

    let mut state = VehicleState::new();
    for field in data
        .iter()
        .filter_map(|d| d.get("field").and_then(Value::as_array))
        .flatten()
    {
        let Some(id) = field.get("id").and_then(Value::as_str) else {
            continue;
        };
        let value = field.get("value").map(scalar).unwrap_or_default();
        let text_id = field
            .get("textId")
            .and_then(Value::as_str)
            .map(str::to_owned);
        state.insert(id.to_string(), StatusValue { value, text_id });
    }
    Some(state)
}

fn scalar(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Per-vehicle state, replaced wholesale by each successful poll.
#[derive(Debug, Default)]
pub struct StatusPoller {
    states: BTreeMap<String, VehicleState>,
}

impl StatusPoller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, vin: &str) -> Option<&VehicleState> {
        self.states.get(vin)
    }

    pub fn states(&self) -> impl Iterator<Item = (&String, &VehicleState)> {
        self.states.iter()
    }

    /// Replace `vin`'s state from a status document. Malformed documents
    /// leave the previous state untouched.
    pub fn apply(&mut self, vin: &str, doc: &Value) -> PollOutcome {
        match flatten_status(doc) {
            Some(state) => {
                debug!(vin, fields = state.len(), "vehicle status updated");
                self.states.insert(vin.to_string(), state);
                PollOutcome::Updated
            }
            None => {
                warn!(vin, "status payload malformed, keeping previous state");
                PollOutcome::Malformed
            }
        }
    }

    /// Fetch and apply `vin`'s status, re-authenticating once on a 401.
    pub async fn poll_vehicle(
        &mut self,
        session: &Session,
        vin: &str,
    ) -> skoda_session::Result<PollOutcome> {
        if session.executor().throttle().is_active() {
            return Ok(PollOutcome::Throttled);
        }
        let doc = session
            .with_reauth(vin, || session.vehicle_status(vin))
            .await?;
        Ok(self.apply(vin, &doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "StoredVehicleDataResponse": {
                "vin": "TMB1",
                "vehicleData": {
                    "data": [
                        {"id": "0x030104FFFF", "field": [
                            {"id": "0x0301040001", "tsCarSentUtc": "2020-09-01T10:00:00Z",
                             "value": "2", "textId": "door_locked"},
                            {"id": "0x0301040002", "value": "3", "textId": "door_closed"}
                        ]},
                        {"id": "0x030102FFFF", "field": [
                            {"id": "0x0301020001", "value": "2912", "unit": "dK"},
                            {"id": "0x0301030007", "textId": "engine_type_unsupported"}
                        ]}
                    ]
                }
            }
        })
    }

    #[test]
    fn flatten_collects_all_fields() {
        let state = flatten_status(&doc()).unwrap();
        assert_eq!(state.len(), 4);
        assert_eq!(
            state["0x0301040001"],
            StatusValue {
                value: "2".into(),
                text_id: Some("door_locked".into())
            }
        );
        assert_eq!(state["0x0301020001"].text_id, None);
    }

    #[test]
    fn record_without_value_is_empty() {
        let state = flatten_status(&doc()).unwrap();
        assert_eq!(state["0x0301030007"].value, "");
    }

    #[test]
    fn numeric_values_become_strings() {
        let doc = json!({"StoredVehicleDataResponse": {"vehicleData": {"data": [
            {"field": [{"id": "0x0301030005", "value": 540}]}
        ]}}});
        assert_eq!(flatten_status(&doc).unwrap()["0x0301030005"].value, "540");
    }

    #[test]
    fn missing_data_is_malformed() {
        let no_data = json!({"StoredVehicleDataResponse": {"vehicleData": {}}});
        assert!(flatten_status(&no_data).is_none());
        assert!(flatten_status(&json!({"error": {"errorCode": "gw.error"}})).is_none());
    }

    #[test]
    fn malformed_payload_keeps_previous_state() {
        let mut poller = StatusPoller::new();
        assert_eq!(poller.apply("TMB1", &doc()), PollOutcome::Updated);
        let before = poller.state("TMB1").cloned();

        let outcome = poller.apply("TMB1", &json!({"StoredVehicleDataResponse": {}}));
        assert_eq!(outcome, PollOutcome::Malformed);
        assert_eq!(poller.state("TMB1").cloned(), before);
    }

    #[test]
    fn successful_poll_replaces_instead_of_merging() {
        let mut poller = StatusPoller::new();
        poller.apply("TMB1", &doc());
        let smaller = json!({"StoredVehicleDataResponse": {"vehicleData": {"data": [
            {"field": [{"id": "0x0301030005", "value": "540"}]}
        ]}}});
        poller.apply("TMB1", &smaller);
        let state = poller.state("TMB1").unwrap();
        assert_eq!(state.len(), 1);
        assert!(state.contains_key("0x0301030005"));
    }
}
