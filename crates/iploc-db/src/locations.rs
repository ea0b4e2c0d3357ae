//! Location Store: location id -> display string

use crate::{ReadTxn, Result, StorageError, WriteTxn, FILTER_KEY, NS_LOCATIONS};
use iploc_bloom::BloomFilter;
use iploc_core::LocationRecord;

/// Buffer a location record
pub fn put_location(txn: &mut WriteTxn<'_>, record: &LocationRecord) -> Result<()> {
    txn.put(NS_LOCATIONS, record.id.as_bytes(), record.display.as_bytes())
}

/// Display string of a location id
pub fn get_display(txn: &ReadTxn<'_>, id: &str) -> Result<Option<String>> {
    txn.get(NS_LOCATIONS, id.as_bytes())?
        .map(|bytes| {
            String::from_utf8(bytes)
                .map_err(|e| StorageError::Corrupt(format!("location {}: {}", id, e)))
        })
        .transpose()
}

/// Buffer the serialized `locationsSeen` filter
pub fn put_seen_filter(txn: &mut WriteTxn<'_>, filter: &BloomFilter) -> Result<()> {
    txn.put(NS_LOCATIONS, FILTER_KEY, &filter.to_bytes())
}

/// Load the persisted `locationsSeen` filter
pub fn seen_filter(txn: &ReadTxn<'_>) -> Result<Option<BloomFilter>> {
    txn.get(NS_LOCATIONS, FILTER_KEY)?
        .map(|bytes| BloomFilter::from_bytes(&bytes).map_err(StorageError::from))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use tempfile::TempDir;

    #[test]
    fn test_location_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = Store::create(temp.path().join("index")).unwrap();

        let mut txn = store.begin_write();
        put_location(
            &mut txn,
            &LocationRecord::from_parts("1001", "Aurich", "DE", "Lower Saxony"),
        )
        .unwrap();
        txn.commit().unwrap();

        let read = store.begin_read();
        assert_eq!(
            get_display(&read, "1001").unwrap().as_deref(),
            Some("Aurich (DE-Lower Saxony)")
        );
        assert_eq!(get_display(&read, "1002").unwrap(), None);
    }

    #[test]
    fn test_seen_filter_persisted() {
        let temp = TempDir::new().unwrap();
        let store = Store::create(temp.path().join("index")).unwrap();
        assert!(seen_filter(&store.begin_read()).unwrap().is_none());

        let mut filter = BloomFilter::new(100, 0.001);
        filter.add(b"1001");

        let mut txn = store.begin_write();
        put_seen_filter(&mut txn, &filter).unwrap();
        txn.commit().unwrap();

        let loaded = seen_filter(&store.begin_read()).unwrap().unwrap();
        assert!(loaded.has(b"1001"));
    }
}
