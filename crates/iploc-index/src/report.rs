//! Rendering of batch lookup results

use iploc_core::Location;
use serde_json::json;

/// Result of [`crate::LookupEngine::locate_many`]
///
/// Keeps one entry per distinct queried address in first-seen order, misses
/// included. The renderers emit hits only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupReport {
    entries: Vec<(String, Option<Location>)>,
}

impl LookupReport {
    pub(crate) fn push(&mut self, ip: &str, location: Option<Location>) {
        self.entries.push((ip.to_string(), location));
    }

    pub fn entries(&self) -> &[(String, Option<Location>)] {
        &self.entries
    }

    /// Resolved entries only
    pub fn hits(&self) -> impl Iterator<Item = &Location> {
        self.entries.iter().filter_map(|(_, location)| location.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `ip: City (CC-Region)` per hit, each followed by a tab
    pub fn to_plain(&self) -> String {
        self.hits()
            .map(|location| format!("{}: {}\t", location.ip, location.city))
            .collect()
    }

    /// `{"ip":{"city":"…","geoLoc":[lat,lon]},…}` in entry order
    pub fn to_json(&self) -> String {
        let members: Vec<String> = self
            .hits()
            .map(|location| {
                let body = json!({
                    "city": location.city,
                    "geoLoc": location.coords.as_pair(),
                });
                format!("{}:{}", json!(location.ip), body)
            })
            .collect();
        format!("{{{}}}", members.join(","))
    }

    /// JSON wrapped as `callback(json)`
    pub fn to_jsonp(&self, callback: &str) -> String {
        format!("{}({})", callback, self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iploc_core::GeoPoint;

    fn report() -> LookupReport {
        let mut report = LookupReport::default();
        report.push(
            "62.227.4.198",
            Some(Location {
                ip: "62.227.4.198".to_string(),
                location_id: "1001".to_string(),
                city: "Aurich (DE-Lower Saxony)".to_string(),
                coords: GeoPoint::new(Some(53.47), Some(7.48)),
            }),
        );
        report.push("10.0.0.1", None);
        report.push(
            "66.249.70.90",
            Some(Location {
                ip: "66.249.70.90".to_string(),
                location_id: "5375480".to_string(),
                city: "Mountain View (US-California)".to_string(),
                coords: GeoPoint::new(Some(37.386), None),
            }),
        );
        report
    }

    #[test]
    fn test_plain() {
        assert_eq!(
            report().to_plain(),
            "62.227.4.198: Aurich (DE-Lower Saxony)\t66.249.70.90: Mountain View (US-California)\t"
        );
    }

    #[test]
    fn test_json() {
        let json = report().to_json();
        assert_eq!(
            json,
            r#"{"62.227.4.198":{"city":"Aurich (DE-Lower Saxony)","geoLoc":[53.47,7.48]},"66.249.70.90":{"city":"Mountain View (US-California)","geoLoc":[37.386,null]}}"#
        );
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["62.227.4.198"]["geoLoc"][1], 7.48);
    }

    #[test]
    fn test_jsonp_and_empty() {
        assert_eq!(LookupReport::default().to_json(), "{}");
        assert_eq!(LookupReport::default().to_jsonp("iploc"), "iploc({})");
        assert!(report().to_jsonp("cb").starts_with("cb({\"62.227.4.198\""));
        assert_eq!(report().len(), 3);
        assert_eq!(report().hits().count(), 2);
    }
}
