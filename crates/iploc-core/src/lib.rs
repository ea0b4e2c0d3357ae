//! Core types and error taxonomy for iploc (offline IPv4 city locator)
//!
//! This crate provides the foundational types shared by the index builder,
//! the lookup engine and the front ends:
//! - [`LocationRecord`] - a location id and its display string
//! - [`GeoPoint`] - the two coordinate columns carried by a range
//! - [`RangeMatch`] - what a successful range resolution yields
//! - [`Location`] - a fully resolved answer for one queried IP
//! - [`IplocError`] - error taxonomy
//!
//! ```
//! use iploc_core::LocationRecord;
//!
//! let record = LocationRecord::from_parts("1001", "Aurich", "DE", "Lower Saxony");
//! assert_eq!(record.display, "Aurich (DE-Lower Saxony)");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A location entry as stored in the Location Store
///
/// The display string is pre-formatted at build time as
/// `<city> (<country-iso>-<region>)`.
///
/// # Examples
///
/// ```
/// use iploc_core::LocationRecord;
///
/// let record = LocationRecord::from_parts("5375480", "Mountain View", "US", "California");
/// assert_eq!(record.to_string(), "Mountain View (US-California)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationRecord {
    /// Opaque location identifier, unique within one build
    pub id: String,
    /// Formatted `City (CC-Region)` string
    pub display: String,
}

impl LocationRecord {
    /// Assemble a record from the raw dataset columns
    pub fn from_parts(id: &str, city: &str, country_iso: &str, region: &str) -> Self {
        Self {
            id: id.to_string(),
            display: format!("{} ({}-{})", city, country_iso, region),
        }
    }
}

impl fmt::Display for LocationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

/// Coordinate pair attached to a range entry
///
/// Either half may be absent: the public datasets leave coordinates empty for
/// some blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in decimal degrees
    pub latitude: Option<f64>,
    /// Longitude in decimal degrees
    pub longitude: Option<f64>,
}

impl GeoPoint {
    pub fn new(latitude: Option<f64>, longitude: Option<f64>) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Coordinates in dataset column order, as rendered in `geoLoc`
    pub fn as_pair(&self) -> [Option<f64>; 2] {
        [self.latitude, self.longitude]
    }
}

/// Result of resolving an IP against the Range Store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeMatch {
    /// Key of the matching range, e.g. `::ffff:62.227.4.0/24`
    pub cidr: String,
    /// Reference into the Location Store (not guaranteed to exist)
    pub location_id: String,
    /// Coordinates stored with the range
    pub coords: GeoPoint,
}

/// A fully resolved answer: range match joined with its location display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// The IP exactly as it was queried
    pub ip: String,
    pub location_id: String,
    /// `City (CC-Region)`
    pub city: String,
    pub coords: GeoPoint,
}

/// Error types for iploc operations
#[derive(Error, Debug)]
pub enum IplocError {
    /// Unparseable IP address (recovered as "no result" by the engine)
    #[error("Invalid IP address: {0}")]
    InvalidIp(String),

    /// The persisted index cannot be opened, read or written
    #[error("Storage error: {0}")]
    Storage(String),

    /// Dataset files missing or not matching the expected schema
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Result type alias for iploc operations
pub type Result<T> = std::result::Result<T, IplocError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_record_display() {
        let record = LocationRecord::from_parts("1001", "Aurich", "DE", "Lower Saxony");
        assert_eq!(record.id, "1001");
        assert_eq!(record.display, "Aurich (DE-Lower Saxony)");
        assert_eq!(format!("{}", record), "Aurich (DE-Lower Saxony)");
    }

    #[test]
    fn test_location_record_empty_columns() {
        // Country-level rows have no city or region
        let record = LocationRecord::from_parts("2921044", "", "DE", "");
        assert_eq!(record.display, " (DE-)");
    }

    #[test]
    fn test_geo_point_pair_order() {
        let point = GeoPoint::new(Some(53.47), Some(7.48));
        assert_eq!(point.as_pair(), [Some(53.47), Some(7.48)]);
        assert_eq!(GeoPoint::default().as_pair(), [None, None]);
    }

    #[test]
    fn test_range_match_serialization() {
        let m = RangeMatch {
            cidr: "::ffff:62.227.4.0/24".to_string(),
            location_id: "1001".to_string(),
            coords: GeoPoint::new(Some(53.47), None),
        };

        let json = serde_json::to_string(&m).expect("serialization failed");
        assert!(json.contains("\"location_id\":\"1001\""));
        assert!(json.contains("53.47"));
        assert!(json.contains("\"longitude\":null"));
    }

    #[test]
    fn test_location_deserialization() {
        let json = r#"{"ip":"62.227.4.198","location_id":"1001","city":"Aurich (DE-Lower Saxony)","coords":{"latitude":53.47,"longitude":7.48}}"#;
        let loc: Location = serde_json::from_str(json).expect("deserialization failed");

        assert_eq!(loc.ip, "62.227.4.198");
        assert_eq!(loc.city, "Aurich (DE-Lower Saxony)");
        assert_eq!(loc.coords.longitude, Some(7.48));
    }

    #[test]
    fn test_error_display() {
        let err = IplocError::InvalidIp("not-an-ip".to_string());
        assert_eq!(format!("{}", err), "Invalid IP address: not-an-ip");

        let err = IplocError::Dataset("missing GeoLite2-City-Blocks.csv".to_string());
        assert_eq!(
            format!("{}", err),
            "Dataset error: missing GeoLite2-City-Blocks.csv"
        );
    }

    #[test]
    fn test_result_type() {
        fn returns_result() -> Result<LocationRecord> {
            Ok(LocationRecord::from_parts("1", "A", "B", "C"))
        }

        let result = returns_result();
        assert!(result.is_ok());
        assert_eq!(result.unwrap().display, "A (B-C)");
    }
}
