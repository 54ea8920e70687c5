//! Publish pipeline
//!
//! Turns each vehicle's readings into broker messages:
//! - `{namespace}/{vin}_{NAME}/STATE` with the value, or `textId(value)`
//! - a retained discovery config under
//!   `homeassistant/sensor/{namespace}/{vin}_{NAME}/config`, sent once per
//!   status id per run
//!
//! and folds door/lid/window readings into the overall vehicle status.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use tracing::{debug, warn};

use crate::catalog::{self, OverallStatus};
use crate::error::Result;
use crate::metrics;
use crate::poller::VehicleState;

/// Home Assistant discovery prefix.
pub const DISCOVERY_PREFIX: &str = "homeassistant/sensor";

/// Destination for broker messages.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Sink>`).
pub trait Sink: Send + Sync {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        payload: String,
        retain: bool,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Discovery config body.
#[derive(Debug, Serialize)]
struct DiscoveryConfig<'a> {
    state_topic: &'a str,
    unique_id: String,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit_of_measurement: Option<&'a str>,
}

/// Text ids the backend uses for readings the car cannot provide.
fn is_unsupported(text_id: &str) -> bool {
    text_id.contains("unsupported")
        || text_id.contains("not_supported")
        || text_id.contains("invalid")
}

pub struct Publisher {
    namespace: String,
    /// Status ids whose discovery config was published this run.
    configured: HashSet<String>,
}

impl Publisher {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            configured: HashSet::new(),
        }
    }

    pub fn state_topic(&self, vin: &str, name: &str) -> String {
        format!("{}/{vin}_{name}/STATE", self.namespace)
    }

    pub fn discovery_topic(&self, vin: &str, name: &str) -> String {
        format!("{DISCOVERY_PREFIX}/{}/{vin}_{name}/config", self.namespace)
    }

    pub fn configured_count(&self) -> usize {
        self.configured.len()
    }

    /// Publish every catalogued reading of one vehicle and return the
    /// overall status. Publish failures are logged and skipped.
    pub async fn publish_vehicle(
        &mut self,
        sink: &dyn Sink,
        vin: &str,
        state: &VehicleState,
    ) -> OverallStatus {
        let mut overall = OverallStatus::Locked;

        for (status_id, reading) in state {
            let Some(entry) = catalog::lookup(status_id) else {
                continue;
            };
            if reading.value.is_empty() {
                continue;
            }
            if reading.text_id.as_deref().is_some_and(is_unsupported) {
                continue;
            }

            let text_id = match &reading.text_id {
                Some(t) if !t.contains('.') => t.clone(),
                _ => reading.value.clone(),
            };
            let value = entry.transform.apply(&reading.value);
            let topic = self.state_topic(vin, entry.name);

            if !self.configured.contains(status_id) {
                let config = DiscoveryConfig {
                    state_topic: &topic,
                    unique_id: format!("s2m_{vin}_{}", entry.name),
                    name: format!("s2m_{vin}_{}", entry.name),
                    unit_of_measurement: (!entry.unit.is_empty()).then_some(entry.unit),
                };
                let discovery_topic = self.discovery_topic(vin, entry.name);
                match serde_json::to_string(&config) {
                    Ok(body) => match sink.publish(&discovery_topic, body, true).await {
                        Ok(()) => {
                            self.configured.insert(status_id.clone());
                            metrics::record_published("discovery");
                        }
                        Err(e) => {
                            warn!(error = %e, "discovery publish failed, retrying next cycle")
                        }
                    },
                    Err(e) => warn!(error = %e, "discovery config not serializable"),
                }
            }

            let payload = if text_id != value {
                format!("{text_id}({value})")
            } else {
                value
            };
            debug!(vin, name = entry.name, payload = %payload, "publishing state");
            match sink.publish(&topic, payload, false).await {
                Ok(()) => metrics::record_published("state"),
                Err(e) => warn!(error = %e, "state publish failed"),
            }

            overall = catalog::fold_status(overall, entry.name, &text_id);
        }

        overall
    }
}
