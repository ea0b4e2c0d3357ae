//! Tiered range resolution over the persisted index

use crate::config::{FilterSizing, IndexConfig};
use crate::report::LookupReport;
use crate::Result;
use iploc_bloom::BloomFilter;
use iploc_cidr::{bucket_of, parse_query, MappedCidr, QueryPrefixes};
use iploc_core::{Location, RangeMatch};
use iploc_db::{locations, ranges, Cursor, RangeRecord, ReadTxn, StorageError, Store};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Read side of a completed index
///
/// Both persisted filters are loaded once on open and never change
/// afterwards, so one engine can serve any number of threads.
pub struct LookupEngine {
    store: Arc<Store>,
    prefixes: BloomFilter,
    locations_seen: BloomFilter,
    visited: FilterSizing,
}

impl LookupEngine {
    /// Load the filters of a built index
    ///
    /// Fails with [`StorageError::NotReady`] when a filter is absent, i.e.
    /// the build never completed.
    pub fn open(store: Arc<Store>, config: &IndexConfig) -> Result<Self> {
        let (prefixes, locations_seen) = {
            let txn = store.begin_read();
            let prefixes = ranges::prefix_filter(&txn)?
                .ok_or_else(|| StorageError::NotReady("ipBloom filter missing".to_string()))?;
            let locations_seen = locations::seen_filter(&txn)?
                .ok_or_else(|| StorageError::NotReady("locations filter missing".to_string()))?;
            (prefixes, locations_seen)
        };

        info!(
            path = %store.path().display(),
            prefixes = prefixes.len(),
            locations = locations_seen.len(),
            "Lookup engine ready"
        );

        Ok(Self {
            store,
            prefixes,
            locations_seen,
            visited: config.visited_filter,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Find the range containing `ip`
    ///
    /// `Ok(None)` for unparseable input and for addresses no range covers.
    pub fn resolve(&self, ip: &str) -> Result<Option<RangeMatch>> {
        let txn = self.store.begin_read();
        self.resolve_in(&txn, ip)
    }

    /// Resolve `ip` and join its location display string
    pub fn locate(&self, ip: &str) -> Result<Option<Location>> {
        let txn = self.store.begin_read();
        self.locate_in(&txn, ip)
    }

    /// Locate a list of addresses within one snapshot
    ///
    /// Repeated addresses are looked up once; entries keep first-seen order.
    /// A storage error on one address is logged and recorded as a miss for
    /// that address only.
    pub fn locate_many<S: AsRef<str>>(&self, ips: &[S]) -> Result<LookupReport> {
        let txn = self.store.begin_read();
        let mut seen = HashSet::with_capacity(ips.len());
        let mut report = LookupReport::default();

        for ip in ips.iter().map(AsRef::as_ref) {
            if !seen.insert(ip) {
                continue;
            }
            let location = match self.locate_in(&txn, ip) {
                Ok(location) => location,
                Err(err) => {
                    warn!(ip, error = %err, "Lookup failed");
                    None
                }
            };
            report.push(ip, location);
        }
        Ok(report)
    }

    fn locate_in(&self, txn: &ReadTxn<'_>, ip: &str) -> Result<Option<Location>> {
        let Some(found) = self.resolve_in(txn, ip)? else {
            return Ok(None);
        };

        if !self.locations_seen.has(found.location_id.as_bytes()) {
            debug!(ip, location_id = %found.location_id, "Range points at unknown location");
            return Ok(None);
        }
        let Some(city) = locations::get_display(txn, &found.location_id)? else {
            debug!(ip, location_id = %found.location_id, "Range points at unknown location");
            return Ok(None);
        };

        Ok(Some(Location {
            ip: ip.to_string(),
            location_id: found.location_id,
            city,
            coords: found.coords,
        }))
    }

    fn resolve_in(&self, txn: &ReadTxn<'_>, ip: &str) -> Result<Option<RangeMatch>> {
        let Some(addr) = parse_query(ip) else {
            debug!(ip, "Not an IPv4 address");
            return Ok(None);
        };
        let Some(mut cursor) = ranges::bucket_cursor(txn, bucket_of(addr)) else {
            return Ok(None);
        };

        let scopes = QueryPrefixes::of(addr);
        let mut visited = BloomFilter::new(self.visited.expected_items, self.visited.fp_rate);

        for prefix in [&scopes.prefix3, &scopes.prefix2] {
            if !self.prefixes.has(prefix.as_bytes()) {
                continue;
            }
            if let Some(found) = scan(&mut cursor, Some(prefix.as_str()), addr, &mut visited)? {
                return Ok(Some(found));
            }
        }
        scan(&mut cursor, None, addr, &mut visited)
    }
}

/// Walk keys in order, from `scope` while they share it or over the whole
/// bucket when `scope` is `None`, returning the first containing range
fn scan(
    cursor: &mut Cursor<'_>,
    scope: Option<&str>,
    addr: Ipv4Addr,
    visited: &mut BloomFilter,
) -> Result<Option<RangeMatch>> {
    let mut entry = match scope {
        Some(prefix) => cursor.seek(prefix.as_bytes())?,
        None => cursor.first()?,
    };

    while let Some((key, value)) = entry {
        if scope.map_or(false, |prefix| !key.starts_with(prefix.as_bytes())) {
            break;
        }

        if !visited.has(key) {
            let text = std::str::from_utf8(key)
                .map_err(|_| StorageError::Corrupt(format!("non-UTF-8 range key {:?}", key)))?;
            let cidr = MappedCidr::parse(text)
                .map_err(|e| StorageError::Corrupt(format!("range key {}: {}", text, e)))?;

            if cidr.contains(addr) {
                let record = RangeRecord::decode(value)?;
                return Ok(Some(record.into_match(text.to_string())));
            }
            visited.add(key);
        }

        entry = cursor.next()?;
    }
    Ok(None)
}
