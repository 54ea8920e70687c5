//! Vehicle-data endpoints
//!
//! URLs are `$name` templates rendered through the session's `Templater`.
//! Status and status-update calls live under the vehicle's home region,
//! which is looked up once per VIN and cached.

use std::time::{Duration, Instant};

use serde_json::Value;
use skoda_http::Request;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::session::Session;

pub const MSG_BASE: &str = "https://msg.volkswagen.de";
pub const MAL_BASE: &str = "https://mal-1a.prd.ece.vwg-connect.com";

pub const VEHICLES_URL: &str = "$msgbase/fs-car/usermanagement/users/v1/$type/$country/vehicles";
pub const HOME_REGION_URL: &str = "$malbase/api/cs/vds/v1/vehicles/$vin/homeRegion";
pub const STATUS_URL: &str = "$homeregion/fs-car/bs/vsr/v1/$type/$country/vehicles/$vin/status";
pub const STATUS_REQUEST_URL: &str =
    "$homeregion/fs-car/bs/vsr/v1/$type/$country/vehicles/$vin/requests";
pub const CARPORT_URL: &str =
    "$msgbase/fs-car/promoter/portfolio/v1/$type/$country/vehicle/$vin/carportdata";
pub const RIGHTS_URL: &str = "$malbase/api/rolesrights/operationlist/v3/vehicles/$vin";

const RIGHTS_ACCEPT: &str = concat!(
    "application/json, ",
    "application/vnd.vwg.mbb.operationList_v3_0_2+xml, ",
    "application/vnd.vwg.mbb.genericError_v1_0_2+xml",
);

/// Minimum spacing between status-update requests for one vehicle.
pub const STATUS_UPDATE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Base URLs of the two vendor API front doors.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub msg_base: String,
    pub mal_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            msg_base: MSG_BASE.into(),
            mal_base: MAL_BASE.into(),
        }
    }
}

/// VINs from `userVehicles.vehicle` (a list, or a bare string for one car).
pub fn parse_vehicle_list(doc: &Value) -> Result<Vec<String>> {
    let vehicles = doc
        .pointer("/userVehicles/vehicle")
        .ok_or_else(|| Error::Payload("vehicle list missing userVehicles.vehicle".into()))?;
    match vehicles {
        Value::String(vin) => Ok(vec![vin.clone()]),
        Value::Array(items) => Ok(items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect()),
        other => Err(Error::Payload(format!("unexpected vehicle list: {other}"))),
    }
}

/// Map the `homeRegion.baseUri.content` answer to a data base URL.
///
/// The default MAL host serves data from `msg_base`; any other region's
/// `mal-` host is swapped for its `fal-` twin.
pub fn resolve_home_region(doc: &Value, endpoints: &Endpoints) -> Result<String> {
    let uri = doc
        .pointer("/homeRegion/baseUri/content")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Payload("home region missing homeRegion.baseUri.content".into()))?;

    if uri.trim_end_matches('/') == format!("{}/api", endpoints.mal_base) {
        return Ok(endpoints.msg_base.clone());
    }
    let base = uri.split("/api").next().unwrap_or(uri);
    Ok(base.replace("mal-", "fal-"))
}

impl Session {
    fn render(&self, template: &str, extra: &[(&str, &str)]) -> String {
        self.templater().render(template, extra)
    }

    pub async fn list_vehicles(&self) -> Result<Vec<String>> {
        let url = self.render(VEHICLES_URL, &[]);
        let request = self.api_request(Request::get(&url)?).await?;
        let doc: Value = self.executor().json(request).await?;
        let vins = parse_vehicle_list(&doc)?;
        info!(count = vins.len(), "vehicles discovered");
        Ok(vins)
    }

    /// Home-region base URL for `vin`, fetched on first use.
    pub async fn home_region(&self, vin: &str) -> Result<String> {
        if let Some(region) = self.home_regions.read().await.get(vin) {
            return Ok(region.clone());
        }
        let url = self.render(HOME_REGION_URL, &[("vin", vin)]);
        let request = self.api_request(Request::get(&url)?).await?;
        let doc: Value = self.executor().json(request).await?;
        let region = resolve_home_region(&doc, self.endpoints())?;
        debug!(vin, region = %region, "home region resolved");
        self.home_regions
            .write()
            .await
            .insert(vin.to_string(), region.clone());
        Ok(region)
    }

    /// Raw stored-status document for `vin`.
    pub async fn vehicle_status(&self, vin: &str) -> Result<Value> {
        let region = self.home_region(vin).await?;
        let url = self.render(
            STATUS_URL,
            &[("homeregion", region.as_str()), ("vin", vin)],
        );
        let request = self.api_request(Request::get(&url)?).await?;
        Ok(self.executor().json(request).await?)
    }

    /// Carport (vehicle master) data.
    pub async fn vehicle_data(&self, vin: &str) -> Result<Value> {
        let url = self.render(CARPORT_URL, &[("vin", vin)]);
        let request = self
            .api_request(Request::get(&url)?)
            .await?
            .header("x-market", "de_DE");
        Ok(self.executor().json(request).await?)
    }

    /// Operation-list rights.
    pub async fn vehicle_rights(&self, vin: &str) -> Result<Value> {
        let url = self.render(RIGHTS_URL, &[("vin", vin)]);
        let request = self
            .api_request(Request::get(&url)?)
            .await?
            .header("accept", RIGHTS_ACCEPT);
        Ok(self.executor().json(request).await?)
    }

    /// Ask the car to push fresh status. Returns `false` when skipped.
    ///
    /// Skipped while the backend throttle is engaged or while this VIN's
    /// update window is open. A successful request opens the window for
    /// `STATUS_UPDATE_INTERVAL`; status polling is not affected by it.
    pub async fn request_status_update(&self, vin: &str) -> Result<bool> {
        self.request_status_update_at(vin, Instant::now()).await
    }

    pub async fn request_status_update_at(&self, vin: &str, now: Instant) -> Result<bool> {
        let throttle = self.executor().throttle();
        if throttle.is_active_at(now) {
            debug!(vin, remaining = ?throttle.remaining(), "status update suppressed by throttle");
            return Ok(false);
        }
        if let Some(next) = self.update_windows.lock().await.get(vin)
            && now < *next
        {
            debug!(vin, wait = ?next.duration_since(now), "status update requested recently");
            return Ok(false);
        }

        let region = self.home_region(vin).await?;
        let url = self.render(
            STATUS_REQUEST_URL,
            &[("homeregion", region.as_str()), ("vin", vin)],
        );
        let request = self
            .api_request(Request::post(&url)?)
            .await?
            .header("accept-charset", "UTF-8");

        match self.executor().page(request).await {
            Ok(_) => {
                self.update_windows
                    .lock()
                    .await
                    .insert(vin.to_string(), now + STATUS_UPDATE_INTERVAL);
                info!(vin, "status update requested");
                Ok(true)
            }
            Err(e) if e.is_throttled() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vehicle_list_from_array() {
        let doc = json!({"userVehicles": {"vehicle": ["TMB1", "TMB2"]}});
        assert_eq!(parse_vehicle_list(&doc).unwrap(), vec!["TMB1", "TMB2"]);
    }

    #[test]
    fn vehicle_list_from_single_string() {
        let doc = json!({"userVehicles": {"vehicle": "TMB1"}});
        assert_eq!(parse_vehicle_list(&doc).unwrap(), vec!["TMB1"]);
    }

    #[test]
    fn vehicle_list_missing_is_payload_error() {
        assert!(matches!(
            parse_vehicle_list(&json!({"error": "x"})),
            Err(Error::Payload(_))
        ));
    }

    #[test]
    fn default_mal_region_maps_to_msg() {
        let uri = "https://mal-1a.prd.ece.vwg-connect.com/api";
        let doc = json!({"homeRegion": {"baseUri": {"content": uri}}});
        assert_eq!(
            resolve_home_region(&doc, &Endpoints::default()).unwrap(),
            "https://msg.volkswagen.de"
        );
    }

    #[test]
    fn other_region_swaps_mal_for_fal() {
        let uri = "https://mal-3a.prd.eu.dp.vwg-connect.com/api";
        let doc = json!({"homeRegion": {"baseUri": {"content": uri}}});
        assert_eq!(
            resolve_home_region(&doc, &Endpoints::default()).unwrap(),
            "https://fal-3a.prd.eu.dp.vwg-connect.com"
        );
    }

    #[test]
    fn missing_region_is_payload_error() {
        assert!(matches!(
            resolve_home_region(&json!({"homeRegion": {}}), &Endpoints::default()),
            Err(Error::Payload(_))
        ));
    }
}
