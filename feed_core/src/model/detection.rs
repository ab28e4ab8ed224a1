//! # Detection Record
//!
//! One observed vehicle pass-by as the backend publishes it, both on the live
//! WebSocket feed and from `GET /api/vehicles`. Field names on the wire follow
//! the backend (`vehicle_id`, `vehicle_number`, `keyframe_url`, ...); the Rust
//! names describe what the fields mean.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CorrectionError;

/// Location reported when the backend could not attribute a camera/site.
pub const UNKNOWN_LOCATION: &str = "UNKNOWN";

/// Regional plate layout, e.g. `KL11BM2325`, `DL01CA1234`.
static PLATE_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{2}\d{1,2}[A-Z]{1,2}\d{4}$").expect("static plate pattern"));

/// Vehicle classes emitted by the detector. Anything else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VehicleType {
    Car,
    Motorcycle,
    Bus,
    Truck,
    Other(String),
}

impl From<String> for VehicleType {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "car" => VehicleType::Car,
            "motorcycle" => VehicleType::Motorcycle,
            "bus" => VehicleType::Bus,
            "truck" => VehicleType::Truck,
            _ => VehicleType::Other(raw),
        }
    }
}

impl From<VehicleType> for String {
    fn from(kind: VehicleType) -> Self {
        kind.to_string()
    }
}

impl Default for VehicleType {
    fn default() -> Self {
        VehicleType::Other(String::new())
    }
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VehicleType::Car => f.write_str("car"),
            VehicleType::Motorcycle => f.write_str("motorcycle"),
            VehicleType::Bus => f.write_str("bus"),
            VehicleType::Truck => f.write_str("truck"),
            VehicleType::Other(raw) => f.write_str(raw),
        }
    }
}

/// A single vehicle detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Opaque identifier, stable across corrections of the same pass-by.
    #[serde(rename = "vehicle_id")]
    pub id: String,
    /// Recognised plate text; `None` when OCR produced nothing.
    #[serde(rename = "vehicle_number", default, deserialize_with = "blank_as_none")]
    pub plate_text: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub vehicle_type: VehicleType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub color: String,
    /// Display colour hint such as `#1f2a44`.
    #[serde(default, deserialize_with = "blank_as_none")]
    pub color_hex: Option<String>,
    /// Make/model guess from the logo classifier.
    #[serde(default, deserialize_with = "blank_as_none")]
    pub model: Option<String>,
    #[serde(rename = "timestamp", default, with = "capture_time")]
    pub captured_at: Option<DateTime<Utc>>,
    #[serde(rename = "location", default = "unknown_location", deserialize_with = "location_or_unknown")]
    pub source_location: String,
    #[serde(rename = "keyframe_url", default, deserialize_with = "blank_as_none")]
    pub primary_image: Option<String>,
    #[serde(rename = "plate_url", default, deserialize_with = "blank_as_none")]
    pub plate_image: Option<String>,
}

impl Detection {
    /// A bare detection with only an id; the remaining fields take their
    /// "unknown" values.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            plate_text: None,
            vehicle_type: VehicleType::default(),
            color: String::new(),
            color_hex: None,
            model: None,
            captured_at: None,
            source_location: unknown_location(),
            primary_image: None,
            plate_image: None,
        }
    }

    /// Parses one feed message.
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Plate text for display, `"UNKNOWN"` when absent.
    pub fn plate_label(&self) -> &str {
        self.plate_text.as_deref().unwrap_or("UNKNOWN")
    }
}

/// A normalized plate-text correction for one detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlateCorrection {
    #[serde(rename = "vehicle_number")]
    plate_text: String,
}

impl PlateCorrection {
    /// Trims and upper-cases the operator's input. Empty input is rejected.
    pub fn new(raw: &str) -> Result<Self, CorrectionError> {
        let plate_text = raw.trim().to_uppercase();
        if plate_text.is_empty() {
            return Err(CorrectionError::EmptyPlate);
        }
        Ok(Self { plate_text })
    }

    pub fn plate_text(&self) -> &str {
        &self.plate_text
    }

    /// Whether the text matches the regional plate layout. Advisory only.
    pub fn matches_plate_format(&self) -> bool {
        PLATE_FORMAT.is_match(&self.plate_text)
    }

    /// Whether applying this correction would change the detection.
    pub fn changes(&self, detection: &Detection) -> bool {
        detection
            .plate_text
            .as_deref()
            .map(|current| current.to_uppercase() != self.plate_text)
            .unwrap_or(true)
    }
}

fn unknown_location() -> String {
    UNKNOWN_LOCATION.to_string()
}

/// Nullable columns come through as JSON `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn location_or_unknown<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(blank_as_none(deserializer)?.unwrap_or_else(unknown_location))
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.trim().is_empty()))
}

/// Capture timestamps arrive as RFC 3339, or as Python's `str(datetime)`
/// (space separator, no offset), which is taken as UTC.
mod capture_time {
    use super::*;
    use serde::Serializer;

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(&raw.replacen(' ', "T", 1)) {
            return Some(ts.with_timezone(&Utc));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(|s| {
            let parsed = parse(s);
            if parsed.is_none() {
                log::debug!("Ignoring unparseable capture timestamp: {}", s);
            }
            parsed
        }))
    }
}
