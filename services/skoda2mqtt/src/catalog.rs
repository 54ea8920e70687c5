//! Vendor status catalog
//!
//! Maps status ids (`0x0301040001`...) to a semantic name, a unit and an
//! optional value transform, plus the rules that derive a vehicle's overall
//! open/closed/locked state from its door, lid and window readings.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// Named value conversion applied before publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    None,
    /// Tenths of a Kelvin to degrees Celsius: `(t - 2732) / 10`
    DeciKelvinToCelsius,
}

impl Transform {
    /// Apply to a raw value. Values that do not parse are passed through.
    pub fn apply(self, raw: &str) -> String {
        match self {
            Transform::None => raw.to_string(),
            Transform::DeciKelvinToCelsius => match raw.trim().parse::<i64>() {
                Ok(t) => format_decimal((t - 2732) as f64 / 10.0),
                Err(_) => {
                    tracing::warn!(raw, "temperature value is not an integer, publishing raw");
                    raw.to_string()
                }
            },
        }
    }
}

/// Whole numbers keep one decimal (`18.0`), others print as-is (`18.3`).
fn format_decimal(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: &'static str,
    pub name: &'static str,
    /// Empty when the value has no unit.
    pub unit: &'static str,
    pub transform: Transform,
}

impl CatalogEntry {
    const fn new(id: &'static str, name: &'static str, unit: &'static str) -> Self {
        Self {
            id,
            name,
            unit,
            transform: Transform::None,
        }
    }

    const fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }
}

pub static CATALOG: &[CatalogEntry] = &[
    CatalogEntry::new("0x0203010001", "MAINTENANCE_INTERVAL_DISTANCE_TO_OIL_CHANGE", "km"),
    CatalogEntry::new("0x0203010002", "MAINTENANCE_INTERVAL_TIME_TO_OIL_CHANGE", "days"),
    CatalogEntry::new("0x0203010003", "MAINTENANCE_INTERVAL_DISTANCE_TO_INSPECTION", "km"),
    CatalogEntry::new("0x0203010004", "MAINTENANCE_INTERVAL_TIME_TO_INSPECTION", "days"),
    CatalogEntry::new("0x0203010005", "WARNING_OIL_CHANGE", ""),
    CatalogEntry::new("0x0203010006", "MAINTENANCE_INTERVAL_ALARM_INSPECTION", ""),
    CatalogEntry::new("0x0203010007", "MAINTENANCE_INTERVAL_MONTHLY_MILEAGE", ""),
    CatalogEntry::new("0x02040C0001", "MAINTENANCE_INTERVAL_AD_BLUE_RANGE", ""),
    CatalogEntry::new("0x0204040001", "OIL_LEVEL_AMOUNT_IN_LITERS", "l"),
    CatalogEntry::new("0x0204040002", "OIL_LEVEL_MINIMUM_WARNING", ""),
    CatalogEntry::new("0x0204040003", "OIL_LEVEL_DIPSTICK_PERCENTAGE", "%"),
    CatalogEntry::new("0x0301010001", "LIGHT_STATUS", ""),
    CatalogEntry::new("0x0301030005", "TOTAL_RANGE", "km"),
    CatalogEntry::new("0x030103000A", "FUEL_LEVEL_IN_PERCENTAGE", "%"),
    CatalogEntry::new("0x030103000D", "CNG_LEVEL_IN_PERCENTAGE", "%"),
    CatalogEntry::new("0x0301040001", "LOCK_STATE_LEFT_FRONT_DOOR", ""),
    CatalogEntry::new("0x0301040002", "OPEN_STATE_LEFT_FRONT_DOOR", ""),
    CatalogEntry::new("0x0301040003", "SAFETY_STATE_LEFT_FRONT_DOOR", ""),
    CatalogEntry::new("0x0301040004", "LOCK_STATE_LEFT_REAR_DOOR", ""),
    CatalogEntry::new("0x0301040005", "OPEN_STATE_LEFT_REAR_DOOR", ""),
    CatalogEntry::new("0x0301040006", "SAFETY_STATE_LEFT_REAR_DOOR", ""),
    CatalogEntry::new("0x0301040007", "LOCK_STATE_RIGHT_FRONT_DOOR", ""),
    CatalogEntry::new("0x0301040008", "OPEN_STATE_RIGHT_FRONT_DOOR", ""),
    CatalogEntry::new("0x0301040009", "SAFETY_STATE_RIGHT_FRONT_DOOR", ""),
    CatalogEntry::new("0x030104000A", "LOCK_STATE_RIGHT_REAR_DOOR", ""),
    CatalogEntry::new("0x030104000B", "OPEN_STATE_RIGHT_REAR_DOOR", ""),
    CatalogEntry::new("0x030104000C", "SAFETY_STATE_RIGHT_REAR_DOOR", ""),
    CatalogEntry::new("0x030104000D", "LOCK_STATE_TRUNK_LID", ""),
    CatalogEntry::new("0x030104000E", "OPEN_STATE_TRUNK_LID", ""),
    CatalogEntry::new("0x030104000F", "SAFETY_STATE_TRUNK_LID", ""),
    CatalogEntry::new("0x0301040010", "LOCK_STATE_HOOD", ""),
    CatalogEntry::new("0x0301040011", "OPEN_STATE_HOOD", ""),
    CatalogEntry::new("0x0301040012", "SAFETY_STATE_HOOD", ""),
    CatalogEntry::new("0x0301050001", "STATE_LEFT_FRONT_WINDOW", ""),
    CatalogEntry::new("0x0301050002", "POSITION_LEFT_FRONT_WINDOW", ""),
    CatalogEntry::new("0x0301050003", "STATE_LEFT_REAR_WINDOW", ""),
    CatalogEntry::new("0x0301050004", "POSITION_LEFT_REAR_WINDOW", ""),
    CatalogEntry::new("0x0301050005", "STATE_RIGHT_FRONT_WINDOW", ""),
    CatalogEntry::new("0x0301050006", "POSITION_RIGHT_FRONT_WINDOW", ""),
    CatalogEntry::new("0x0301050007", "STATE_RIGHT_REAR_WINDOW", ""),
    CatalogEntry::new("0x0301050008", "POSITION_RIGHT_REAR_WINDOW", ""),
    CatalogEntry::new("0x0301050009", "STATE_CONVERTIBLE_TOP", ""),
    CatalogEntry::new("0x030105000A", "POSITION_CONVERTIBLE_TOP", ""),
    CatalogEntry::new("0x030105000B", "STATE_SUN_ROOF_MOTOR_COVER", ""),
    CatalogEntry::new("0x030105000C", "POSITION_SUN_ROOF_MOTOR_COVER", ""),
    CatalogEntry::new("0x030105000D", "STATE_SUN_ROOF_REAR_MOTOR_COVER_3", ""),
    CatalogEntry::new("0x030105000E", "POSITION_SUN_ROOF_REAR_MOTOR_COVER_3", ""),
    CatalogEntry::new("0x030105000F", "STATE_SERVICE_FLAP", ""),
    CatalogEntry::new("0x0301050010", "POSITION_SERVICE_FLAP", ""),
    CatalogEntry::new("0x0301050011", "STATE_SPOILER", ""),
    CatalogEntry::new("0x0301050012", "POSITION_SPOILER", ""),
    CatalogEntry::new("0x0101010001", "UTC_TIME_STATUS", ""),
    CatalogEntry::new("0x0101010002", "KILOMETER_STATUS", ""),
    CatalogEntry::new("0x0301030006", "PRIMARY_RANGE", "km"),
    CatalogEntry::new("0x0301030007", "PRIMARY_DRIVE", ""),
    CatalogEntry::new("0x0301030008", "SECONDARY_RANGE", "km"),
    CatalogEntry::new("0x0301030009", "SECONDARY_DRIVE", ""),
    CatalogEntry::new("0x0301030002", "STATE_OF_CHARGE", ""),
    CatalogEntry::new("0x0301020001", "TEMPERATURE_OUTSIDE", "")
        .with_transform(Transform::DeciKelvinToCelsius),
    CatalogEntry::new("0x0301030001", "PARKING_BRAKE", ""),
    CatalogEntry::new("0x0301060001", "TYRE_PRESSURE_LEFT_FRONT_CURRENT_VALUE", ""),
    CatalogEntry::new("0x0301060002", "TYRE_PRESSURE_LEFT_FRONT_DESIRED_VALUE", ""),
    CatalogEntry::new("0x0301060003", "TYRE_PRESSURE_LEFT_REAR_CURRENT_VALUE", ""),
    CatalogEntry::new("0x0301060004", "TYRE_PRESSURE_LEFT_REAR_DESIRED_VALUE", ""),
    CatalogEntry::new("0x0301060005", "TYRE_PRESSURE_RIGHT_FRONT_CURRENT_VALUE", ""),
    CatalogEntry::new("0x0301060006", "TYRE_PRESSURE_RIGHT_FRONT_DESIRED_VALUE", ""),
    CatalogEntry::new("0x0301060007", "TYRE_PRESSURE_RIGHT_REAR_CURRENT_VALUE", ""),
    CatalogEntry::new("0x0301060008", "TYRE_PRESSURE_RIGHT_REAR_DESIRED_VALUE", ""),
    CatalogEntry::new("0x0301060009", "TYRE_PRESSURE_SPARE_TYRE_CURRENT_VALUE", ""),
    CatalogEntry::new("0x030106000A", "TYRE_PRESSURE_SPARE_TYRE_DESIRED_VALUE", ""),
    CatalogEntry::new("0x030106000B", "TYRE_PRESSURE_LEFT_FRONT_TYRE_DIFFERENCE", ""),
    CatalogEntry::new("0x030106000C", "TYRE_PRESSURE_LEFT_REAR_TYRE_DIFFERENCE", ""),
    CatalogEntry::new("0x030106000D", "TYRE_PRESSURE_RIGHT_FRONT_TYRE_DIFFERENCE", ""),
    CatalogEntry::new("0x030106000E", "TYRE_PRESSURE_RIGHT_REAR_TYRE_DIFFERENCE", ""),
    CatalogEntry::new("0x030106000F", "TYRE_PRESSURE_SPARE_TYRE_DIFFERENCE", ""),
];

static INDEX: LazyLock<HashMap<&'static str, &'static CatalogEntry>> =
    LazyLock::new(|| CATALOG.iter().map(|e| (e.id, e)).collect());

pub fn lookup(id: &str) -> Option<&'static CatalogEntry> {
    INDEX.get(id).copied()
}

/// Derived vehicle state. Ordered worst first, so `min` keeps the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OverallStatus {
    Open = 0,
    Closed = 1,
    Locked = 2,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OverallStatus::Open => "open",
            OverallStatus::Closed => "closed",
            OverallStatus::Locked => "locked",
        })
    }
}

/// A name starting with `prefix` and containing `contains` later on is
/// expected to report `expected`; anything else lowers the overall status
/// to `fail`.
#[derive(Debug, Clone, Copy)]
pub struct StatusLimit {
    pub prefix: &'static str,
    pub contains: &'static str,
    pub expected: &'static str,
    pub fail: OverallStatus,
}

impl StatusLimit {
    const fn new(
        prefix: &'static str,
        contains: &'static str,
        expected: &'static str,
        fail: OverallStatus,
    ) -> Self {
        Self {
            prefix,
            contains,
            expected,
            fail,
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        name.strip_prefix(self.prefix)
            .is_some_and(|rest| rest.contains(self.contains))
    }
}

pub const STATUS_LIMITS: &[StatusLimit] = &[
    StatusLimit::new("LOCK_STATE", "DOOR", "door_locked", OverallStatus::Closed),
    StatusLimit::new("OPEN_STATE", "DOOR", "door_closed", OverallStatus::Open),
    StatusLimit::new("OPEN_STATE", "HOOD", "door_closed", OverallStatus::Open),
    StatusLimit::new("OPEN_STATE", "LID", "door_closed", OverallStatus::Open),
    StatusLimit::new("STATE", "WINDOW", "window_closed", OverallStatus::Open),
    StatusLimit::new("STATE", "COVER", "window_closed", OverallStatus::Open),
];

/// Fold one reading into `current`; never raises the level.
pub fn fold_status(current: OverallStatus, name: &str, text_id: &str) -> OverallStatus {
    STATUS_LIMITS
        .iter()
        .filter(|limit| limit.matches(name) && limit.expected != text_id)
        .fold(current, |status, limit| status.min(limit.fail))
}
