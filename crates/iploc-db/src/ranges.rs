//! Range Store: 256 buckets of CIDR key -> [`RangeRecord`]

use crate::{
    Cursor, RangeRecord, ReadTxn, Result, StorageError, WriteTxn, FILTER_KEY, NS_IP_BLOOM,
};
use iploc_bloom::BloomFilter;

/// Namespace name of a bucket
pub fn bucket_namespace(bucket: u8) -> String {
    format!("bucket_{}", bucket)
}

/// Create a bucket namespace if it does not exist yet
///
/// Takes effect immediately, even if `txn` is later dropped.
pub fn ensure_bucket(txn: &WriteTxn<'_>, bucket: u8) -> Result<()> {
    txn.create_namespace_if_absent(&bucket_namespace(bucket))
}

/// Buffer a range under its CIDR key text
pub fn put_range(
    txn: &mut WriteTxn<'_>,
    bucket: u8,
    cidr_key: &str,
    record: &RangeRecord,
) -> Result<()> {
    txn.put(&bucket_namespace(bucket), cidr_key.as_bytes(), &record.encode()?)
}

/// Cursor over one bucket, or `None` when no range ever landed in it
pub fn bucket_cursor<'t>(txn: &'t ReadTxn<'_>, bucket: u8) -> Option<Cursor<'t>> {
    txn.cursor(&bucket_namespace(bucket))
}

/// Buffer the serialized `ipPrefixSeen` filter
pub fn put_prefix_filter(txn: &mut WriteTxn<'_>, filter: &BloomFilter) -> Result<()> {
    txn.put(NS_IP_BLOOM, FILTER_KEY, &filter.to_bytes())
}

/// Load the persisted `ipPrefixSeen` filter
pub fn prefix_filter(txn: &ReadTxn<'_>) -> Result<Option<BloomFilter>> {
    txn.get(NS_IP_BLOOM, FILTER_KEY)?
        .map(|bytes| BloomFilter::from_bytes(&bytes).map_err(StorageError::from))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use tempfile::TempDir;

    #[test]
    fn test_bucket_namespace() {
        assert_eq!(bucket_namespace(0), "bucket_0");
        assert_eq!(bucket_namespace(255), "bucket_255");
    }

    #[test]
    fn test_put_range_and_scan() {
        let temp = TempDir::new().unwrap();
        let store = Store::create(temp.path().join("index")).unwrap();
        let record = RangeRecord {
            location_id: "1001".to_string(),
            latitude: Some(53.47),
            longitude: Some(7.48),
            extra: Vec::new(),
        };

        let mut txn = store.begin_write();
        ensure_bucket(&txn, 62).unwrap();
        put_range(&mut txn, 62, "::ffff:62.227.4.0/24", &record).unwrap();
        txn.commit().unwrap();

        let read = store.begin_read();
        assert!(bucket_cursor(&read, 63).is_none());

        let mut cursor = bucket_cursor(&read, 62).unwrap();
        let (key, value) = cursor.seek(b"::ffff:62.227.").unwrap().unwrap();
        assert_eq!(key, b"::ffff:62.227.4.0/24");
        assert_eq!(RangeRecord::decode(value).unwrap(), record);
    }

    #[test]
    fn test_put_range_without_bucket_fails() {
        let temp = TempDir::new().unwrap();
        let store = Store::create(temp.path().join("index")).unwrap();

        let record = RangeRecord {
            location_id: "1".to_string(),
            latitude: None,
            longitude: None,
            extra: Vec::new(),
        };
        let mut txn = store.begin_write();
        assert!(put_range(&mut txn, 9, "::ffff:9.0.0.0/8", &record).is_err());
    }

    #[test]
    fn test_prefix_filter_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = Store::create(temp.path().join("index")).unwrap();

        let mut filter = BloomFilter::new(1000, 0.001);
        filter.add(b"::ffff:62.227.4.");
        filter.add(b"::ffff:62.227.");

        let mut txn = store.begin_write();
        put_prefix_filter(&mut txn, &filter).unwrap();
        txn.commit().unwrap();

        let loaded = prefix_filter(&store.begin_read()).unwrap().unwrap();
        assert_eq!(loaded, filter);
    }
}
