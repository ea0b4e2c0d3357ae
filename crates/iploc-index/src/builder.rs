//! Two-pass index build from the dataset CSV files

use crate::config::IndexConfig;
use crate::dataset::DatasetFiles;
use crate::schema::NetworkForm;
use crate::{IndexError, Result};
use iploc_bloom::BloomFilter;
use iploc_cidr::{is_mapped_network, map_plain_network, MappedCidr, QueryPrefixes};
use iploc_db::{locations, ranges, StorageError, Store, FILTER_KEY};
use csv::StringRecord;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Counters reported by a completed build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    /// Location records written
    pub locations: u64,
    /// Location rows dropped because their id was (or looked) already seen
    pub duplicate_locations: u64,
    /// Range records written
    pub ranges: u64,
    /// Blocks rows whose network is not IPv4-mapped
    pub skipped_rows: u64,
    /// Rows of either table missing a column or holding an unparseable network
    pub malformed_rows: u64,
    /// Distinct buckets holding at least one range
    pub buckets: usize,
    pub elapsed_ms: u64,
}

/// Builds the Location Store, Range Store and both persisted filters
pub struct IndexBuilder {
    config: IndexConfig,
}

impl IndexBuilder {
    pub fn new(config: IndexConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Build into an empty store from dataset files
    pub fn build(&self, store: &Store, files: &DatasetFiles) -> Result<BuildStats> {
        let locations = open(&files.locations)?;
        let blocks = open(&files.blocks)?;
        info!(
            locations = %files.locations.display(),
            blocks = %files.blocks.display(),
            "Building index"
        );
        self.build_from_readers(store, locations, blocks)
    }

    /// Build into an empty store from any two CSV sources
    pub fn build_from_readers<L: Read, B: Read>(
        &self,
        store: &Store,
        locations: L,
        blocks: B,
    ) -> Result<BuildStats> {
        {
            let txn = store.begin_read();
            if locations::seen_filter(&txn)?.is_some() || ranges::prefix_filter(&txn)?.is_some() {
                return Err(StorageError::AlreadyExists(store.path().to_path_buf()).into());
            }
        }

        let started = Instant::now();
        let mut stats = BuildStats::default();
        self.load_locations(store, locations, &mut stats)?;
        self.load_ranges(store, blocks, &mut stats)?;
        stats.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            locations = stats.locations,
            ranges = stats.ranges,
            skipped = stats.skipped_rows,
            buckets = stats.buckets,
            elapsed_ms = stats.elapsed_ms,
            "Index build complete"
        );
        Ok(stats)
    }

    /// Replace the index at `target` with a fresh build
    ///
    /// The build runs in a sibling staging directory; `target` is only
    /// swapped once it has succeeded.
    pub fn rebuild<P: AsRef<Path>>(&self, target: P, files: &DatasetFiles) -> Result<BuildStats> {
        let target = target.as_ref();
        let staging = sibling(target, "staging")?;
        if staging.exists() {
            debug!(path = %staging.display(), "Removing stale staging directory");
            fs::remove_dir_all(&staging)?;
        }

        let built = Store::create(&staging)
            .map_err(IndexError::from)
            .and_then(|store| self.build(&store, files));
        let stats = match built {
            Ok(stats) => stats,
            Err(err) => {
                if let Err(cleanup) = fs::remove_dir_all(&staging) {
                    warn!(path = %staging.display(), error = %cleanup, "Could not remove staging directory");
                }
                return Err(err);
            }
        };

        swap_in(&staging, target)?;
        info!(path = %target.display(), "Index replaced");
        Ok(stats)
    }

    fn load_locations<R: Read>(&self, store: &Store, source: R, stats: &mut BuildStats) -> Result<()> {
        let schema = &self.config.schema.locations;
        let sizing = self.config.locations_filter;
        let mut seen = BloomFilter::new(sizing.expected_items, sizing.fp_rate);
        let mut reader = csv_reader(source);
        let mut txn = store.begin_write();

        let mut malformed = 0u64;

        for row in reader.records() {
            let Some(row) = usable(row)? else {
                malformed += 1;
                continue;
            };
            let record = match schema.record(&row) {
                Ok(record) => record,
                Err(err) => {
                    warn!(error = %err, "Skipping malformed location row");
                    malformed += 1;
                    continue;
                }
            };
            let id = record.id.as_bytes();

            if id == FILTER_KEY {
                warn!(id = %record.id, "Location id collides with the filter key, skipping");
                continue;
            }
            if seen.has(id) {
                stats.duplicate_locations += 1;
                continue;
            }

            locations::put_location(&mut txn, &record)?;
            seen.add(id);
            stats.locations += 1;
        }

        stats.malformed_rows += malformed;
        if stats.locations == 0 && malformed > 0 {
            return Err(IndexError::Dataset(format!(
                "none of {} location rows matches the configured schema",
                malformed
            )));
        }

        locations::put_seen_filter(&mut txn, &seen)?;
        txn.commit()?;

        info!(
            locations = stats.locations,
            duplicates = stats.duplicate_locations,
            "Location Store written"
        );
        Ok(())
    }

    fn load_ranges<R: Read>(&self, store: &Store, source: R, stats: &mut BuildStats) -> Result<()> {
        let schema = &self.config.schema;
        let sizing = self.config.prefix_filter;
        let mut prefixes = BloomFilter::new(sizing.expected_items, sizing.fp_rate);
        let mut buckets = [false; 256];
        let mut reader = csv_reader(source);
        let mut txn = store.begin_write();

        let mut malformed = 0u64;

        for row in reader.records() {
            let Some(row) = usable(row)? else {
                malformed += 1;
                continue;
            };
            let block = match schema.blocks.split(&row) {
                Ok(block) => block,
                Err(err) => {
                    warn!(error = %err, "Skipping malformed blocks row");
                    malformed += 1;
                    continue;
                }
            };

            let Some(network) = normalize(&block.network, schema.network_form) else {
                debug!(network = %block.network, "Skipping non-mapped network");
                stats.skipped_rows += 1;
                continue;
            };
            let cidr = match MappedCidr::parse(&network) {
                Ok(cidr) => cidr,
                Err(err) => {
                    let line = row.position().map_or(0, |pos| pos.line());
                    warn!(line, network = %network, error = %err, "Skipping unparseable network");
                    malformed += 1;
                    continue;
                }
            };

            let key = cidr.to_string();
            let bucket = cidr.bucket();
            if !buckets[bucket as usize] {
                ranges::ensure_bucket(&txn, bucket)?;
                buckets[bucket as usize] = true;
            }
            ranges::put_range(&mut txn, bucket, &key, &block.record)?;

            if let Some(scopes) = QueryPrefixes::of_network(&key) {
                prefixes.add(scopes.prefix3.as_bytes());
                prefixes.add(scopes.prefix2.as_bytes());
            }
            stats.ranges += 1;
        }

        stats.malformed_rows += malformed;
        if stats.ranges == 0 && malformed > 0 {
            return Err(IndexError::Dataset(format!(
                "none of {} blocks rows matches the configured schema",
                malformed
            )));
        }
        if stats.ranges == 0 && stats.skipped_rows > 0 {
            return Err(IndexError::Dataset(format!(
                "none of {} blocks rows holds an IPv4-mapped network; \
                 plain IPv4 networks need NetworkForm::MapPlainIpv4 (--map-plain-ipv4)",
                stats.skipped_rows
            )));
        }

        ranges::put_prefix_filter(&mut txn, &prefixes)?;
        txn.commit()?;

        stats.buckets = buckets.iter().filter(|used| **used).count();
        info!(
            ranges = stats.ranges,
            skipped = stats.skipped_rows,
            buckets = stats.buckets,
            filter_bytes = prefixes.size_bytes(),
            "Range Store written"
        );
        Ok(())
    }
}

/// Move `staging` to `target`, retiring any index already there
///
/// If the final rename fails the retired index is moved back.
fn swap_in(staging: &Path, target: &Path) -> Result<()> {
    if !target.exists() {
        fs::rename(staging, target)?;
        return Ok(());
    }

    let retired = sibling(target, "old")?;
    if retired.exists() {
        fs::remove_dir_all(&retired)?;
    }
    fs::rename(target, &retired)?;

    if let Err(err) = fs::rename(staging, target) {
        if let Err(restore) = fs::rename(&retired, target) {
            warn!(
                path = %retired.display(),
                error = %restore,
                "Could not restore previous index"
            );
        }
        return Err(err.into());
    }
    fs::remove_dir_all(&retired)?;
    Ok(())
}

fn normalize(network: &str, form: NetworkForm) -> Option<String> {
    if is_mapped_network(network) {
        return Some(network.to_string());
    }
    match form {
        NetworkForm::MappedOnly => None,
        NetworkForm::MapPlainIpv4 => map_plain_network(network),
    }
}

/// Pass a row through, or `None` for a row that is not valid UTF-8
///
/// Any other CSV error is an I/O or framing failure and aborts the build.
fn usable(row: csv::Result<StringRecord>) -> Result<Option<StringRecord>> {
    match row {
        Ok(row) => Ok(Some(row)),
        Err(err) if matches!(err.kind(), csv::ErrorKind::Utf8 { .. }) => {
            warn!(error = %err, "Skipping row with invalid UTF-8");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => IndexError::MissingFile(path.to_path_buf()),
        _ => IndexError::Io(e),
    })
}

fn csv_reader<R: Read>(source: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(source)
}

fn sibling(target: &Path, suffix: &str) -> Result<PathBuf> {
    let name = target.file_name().ok_or_else(|| {
        IndexError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("index path has no file name: {}", target.display()),
        ))
    })?;
    let mut name = name.to_os_string();
    name.push(".");
    name.push(suffix);
    Ok(target.with_file_name(name))
}
