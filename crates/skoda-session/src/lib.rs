//! Authenticated session against the vendor's vehicle-data API
//!
//! `Session` owns everything the poll loop and the refresh task share:
//! the HTTP executor (cookie jar + throttle), the current tokens and the
//! per-vehicle home-region cache. Handshakes and refreshes are serialized
//! on one lock so neither task can observe half-replaced tokens.

pub mod error;
pub mod refresh;
pub mod session;
pub mod template;
pub mod vehicle;

pub use error::{Error, Result};
pub use refresh::{REFRESH_FRACTION, RefreshOutcome, refresh_cycle, spawn_refresh_task};
pub use session::Session;
pub use template::Templater;
pub use vehicle::{
    Endpoints, STATUS_UPDATE_INTERVAL, parse_vehicle_list, resolve_home_region,
};
