//! Versioned encoding of range values

use crate::{Result, StorageError};
use iploc_core::{GeoPoint, RangeMatch};
use serde::{Deserialize, Serialize};

const RECORD_V1: u8 = 1;

/// Value stored under each CIDR key of a bucket
///
/// Encoded as a version byte followed by a `bincode` body, so auxiliary
/// columns may contain any character, commas included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeRecord {
    pub location_id: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Remaining dataset columns, in source order
    pub extra: Vec<String>,
}

impl RangeRecord {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = vec![RECORD_V1];
        bincode::serialize_into(&mut buf, self)?;
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        match bytes.split_first() {
            Some((&RECORD_V1, body)) => Ok(bincode::deserialize(body)?),
            Some((version, _)) => Err(StorageError::Corrupt(format!(
                "unknown range record version {}",
                version
            ))),
            None => Err(StorageError::Corrupt("empty range record".to_string())),
        }
    }

    pub fn coords(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    /// Pair this record with the key it was found under
    pub fn into_match(self, cidr: String) -> RangeMatch {
        RangeMatch {
            coords: self.coords(),
            cidr,
            location_id: self.location_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RangeRecord {
        RangeRecord {
            location_id: "1001".to_string(),
            latitude: Some(53.47),
            longitude: Some(7.48),
            extra: vec!["2921044".to_string(), "".to_string(), "Aurich, Ostfriesland".to_string()],
        }
    }

    #[test]
    fn test_encode_starts_with_version() {
        let bytes = sample().encode().unwrap();
        assert_eq!(bytes[0], RECORD_V1);
        assert_eq!(RangeRecord::decode(&bytes).unwrap(), sample());
    }

    #[test]
    fn test_delimiters_survive_in_extra_columns() {
        let decoded = RangeRecord::decode(&sample().encode().unwrap()).unwrap();
        assert_eq!(decoded.extra[2], "Aurich, Ostfriesland");
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let mut bytes = sample().encode().unwrap();
        bytes[0] = 7;
        assert!(matches!(
            RangeRecord::decode(&bytes),
            Err(StorageError::Corrupt(_))
        ));
        assert!(RangeRecord::decode(&[]).is_err());
        assert!(RangeRecord::decode(&[RECORD_V1, 3]).is_err());
    }

    #[test]
    fn test_into_match() {
        let m = sample().into_match("::ffff:62.227.4.0/24".to_string());
        assert_eq!(m.location_id, "1001");
        assert_eq!(m.coords.as_pair(), [Some(53.47), Some(7.48)]);
        assert_eq!(m.cidr, "::ffff:62.227.4.0/24");
    }
}
