//! Configuration types and loading
//!
//! The config is a JSON object. `user`, `password` and `broker` are
//! required; every vendor identifier has a default matching the mobile app.
//! When the file is missing or unusable a sample is written next to it.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use serde::Deserialize;
use skoda_auth::{ClientProfile, Credentials, constants};
use skoda_session::Templater;

/// Contents written to `<config>.sample`.
pub const SAMPLE: &str = r#"{
    "user": "test@example.com",
    "password": "my_very_speciaL_passw0rd",
    "broker": "mqtt.local"
}
"#;

/// Root configuration
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub user: String,
    pub password: Secret<String>,
    /// `host`, `host:port`, `mqtt://host[:port]` or `mqtts://host[:port]`
    pub broker: String,
    #[serde(default = "default_trip_type")]
    pub trip_type: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(rename = "type", default = "default_brand")]
    pub brand: String,
    #[serde(rename = "xappversion", default = "default_app_version")]
    pub app_version: String,
    #[serde(rename = "xappname", default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_x_client_id")]
    pub x_client_id: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    /// First topic segment for state and discovery topics
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Ask each car to push fresh data (at most once per throttle window)
    #[serde(default)]
    pub request_status_updates: bool,
    /// Prometheus exporter listen address; metrics are not exported if unset
    #[serde(default)]
    pub metrics_listen: Option<SocketAddr>,
}

fn default_trip_type() -> String {
    "none".into()
}

fn default_country() -> String {
    "CZ".into()
}

fn default_brand() -> String {
    constants::BRAND.into()
}

fn default_app_version() -> String {
    constants::APP_VERSION.into()
}

fn default_app_name() -> String {
    constants::APP_NAME.into()
}

fn default_x_client_id() -> String {
    constants::X_CLIENT_ID.into()
}

fn default_client_id() -> String {
    constants::CLIENT_ID.into()
}

fn default_locale() -> String {
    constants::LOCALE.into()
}

fn default_namespace() -> String {
    "skoda2mqtt".into()
}

fn default_poll_interval() -> u64 {
    60
}

fn default_refresh_interval() -> u64 {
    20
}

impl Config {
    /// Load and validate the config file.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> common::Result<()> {
        for (key, value) in [
            ("user", self.user.as_str()),
            ("password", self.password.expose().as_str()),
            ("broker", self.broker.as_str()),
            ("namespace", self.namespace.as_str()),
        ] {
            if value.trim().is_empty() {
                return Err(common::Error::Config(format!("{key} must not be empty")));
            }
        }
        if self.poll_interval_secs == 0 || self.refresh_interval_secs == 0 {
            return Err(common::Error::Config(
                "pollIntervalSecs and refreshIntervalSecs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            email: self.user.clone(),
            password: self.password.clone(),
        }
    }

    pub fn client_profile(&self) -> ClientProfile {
        ClientProfile {
            client_id: self.client_id.clone(),
            x_client_id: self.x_client_id.clone(),
            app_name: self.app_name.clone(),
            app_version: self.app_version.clone(),
            brand: self.brand.clone(),
            locale: self.locale.clone(),
            ..ClientProfile::default()
        }
    }

    /// Variables available to `$name` placeholders in vendor URLs.
    pub fn template_vars(&self) -> Templater {
        Templater::new([
            ("country", self.country.as_str()),
            ("type", self.brand.as_str()),
            ("tripType", self.trip_type.as_str()),
            ("xappversion", self.app_version.as_str()),
            ("xappname", self.app_name.as_str()),
            ("xClientId", self.x_client_id.as_str()),
            ("client_id", self.client_id.as_str()),
        ])
    }
}

/// `<config>.sample` beside the config path.
pub fn sample_path(config_path: &Path) -> PathBuf {
    let name = config_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config.json".into());
    config_path.with_file_name(format!("{name}.sample"))
}

/// Write the sample config and return its path.
pub fn write_sample(config_path: &Path) -> common::Result<PathBuf> {
    let path = sample_path(config_path);
    std::fs::write(&path, SAMPLE)?;
    Ok(path)
}
