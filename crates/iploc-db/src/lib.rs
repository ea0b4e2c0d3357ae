//! RocksDB storage for the iploc index
//!
//! One RocksDB directory holds every namespace of an index, each namespace
//! being a column family with byte-lexicographic key order.
//!
//! # Architecture
//!
//! - **locations**: location id -> `City (CC-Region)`, plus the serialized
//!   `locationsSeen` filter under [`FILTER_KEY`]
//! - **ipBloom**: the serialized `ipPrefixSeen` filter under [`FILTER_KEY`]
//! - **bucket_0 .. bucket_255**: CIDR key text -> encoded [`RangeRecord`],
//!   partitioned by the first octet of the range
//!
//! # Transactions
//!
//! - [`ReadTxn`] reads through a RocksDB snapshot. Any number may be open at
//!   once and none of them waits on a writer.
//! - [`WriteTxn`] holds the store's writer lock and buffers puts in a
//!   `WriteBatch` that is applied atomically on [`WriteTxn::commit`].
//!
//! # Examples
//!
//! ```no_run
//! use iploc_db::{Store, NS_LOCATIONS};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::create("./data/iplocs.db")?;
//!
//! let mut txn = store.begin_write();
//! txn.put(NS_LOCATIONS, b"1001", b"Aurich (DE-Lower Saxony)")?;
//! txn.commit()?;
//!
//! let read = store.begin_read();
//! assert!(read.get(NS_LOCATIONS, b"1001")?.is_some());
//! # Ok(())
//! # }
//! ```

use parking_lot::{Mutex, MutexGuard};
use rocksdb::{
    BlockBasedOptions, BoundColumnFamily, DBCompressionType, DBRawIteratorWithThreadMode,
    DBWithThreadMode, MultiThreaded, Options, SnapshotWithThreadMode, WriteBatch,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub mod locations;
pub mod ranges;
mod record;

pub use record::RangeRecord;

/// Location Store namespace
pub const NS_LOCATIONS: &str = "locations";
/// Namespace holding the persisted prefix filter
pub const NS_IP_BLOOM: &str = "ipBloom";
/// Well-known key of a serialized filter inside its namespace
pub const FILTER_KEY: &[u8] = b"bloom";

type Db = DBWithThreadMode<MultiThreaded>;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database operation failed
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A namespace the operation needs does not exist
    #[error("Namespace not found: {0}")]
    MissingNamespace(String),

    /// Refusing to build over existing data
    #[error("Store already exists and is not empty: {0}")]
    AlreadyExists(PathBuf),

    /// Persisted bytes could not be decoded
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    /// The index was never completed
    #[error("Index not ready: {0}")]
    NotReady(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        StorageError::DatabaseError(err.to_string())
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Corrupt(err.to_string())
    }
}

impl From<iploc_bloom::BloomError> for StorageError {
    fn from(err: iploc_bloom::BloomError) -> Self {
        StorageError::Corrupt(err.to_string())
    }
}

impl From<StorageError> for iploc_core::IplocError {
    fn from(err: StorageError) -> Self {
        iploc_core::IplocError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// A persisted iploc index
pub struct Store {
    db: Db,
    path: PathBuf,
    writer: Mutex<()>,
}

impl Store {
    /// Create a new, empty store
    ///
    /// Fails if `path` already holds files: a build always starts from empty
    /// namespaces.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() && std::fs::read_dir(path)?.next().is_some() {
            return Err(StorageError::AlreadyExists(path.to_path_buf()));
        }

        let mut opts = Self::options();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = Db::open_cf(&opts, path, [NS_LOCATIONS, NS_IP_BLOOM])?;
        debug!(path = %path.display(), "created store");

        Ok(Self {
            db,
            path: path.to_path_buf(),
            writer: Mutex::new(()),
        })
    }

    /// Open an existing store with every namespace found on disk
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let opts = Self::options();

        let names = Db::list_cf(&opts, path)?;
        let db = Db::open_cf(&opts, path, &names)?;
        debug!(path = %path.display(), namespaces = names.len(), "opened store");

        Ok(Self {
            db,
            path: path.to_path_buf(),
            writer: Mutex::new(()),
        })
    }

    /// Directory backing this store
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check whether a namespace exists
    pub fn has_namespace(&self, name: &str) -> bool {
        self.db.cf_handle(name).is_some()
    }

    /// Create a namespace unless it already exists
    pub fn create_namespace_if_absent(&self, name: &str) -> Result<()> {
        if self.has_namespace(name) {
            return Ok(());
        }
        self.db.create_cf(name, &Self::options())?;
        debug!(namespace = name, "created namespace");
        Ok(())
    }

    /// Begin a snapshot read
    pub fn begin_read(&self) -> ReadTxn<'_> {
        ReadTxn {
            store: self,
            snapshot: self.db.snapshot(),
        }
    }

    /// Begin a write, waiting for any other writer to finish first
    pub fn begin_write(&self) -> WriteTxn<'_> {
        WriteTxn {
            store: self,
            batch: WriteBatch::default(),
            puts: 0,
            _guard: self.writer.lock(),
        }
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<String> {
        Ok(self.db.property_value("rocksdb.stats")?.unwrap_or_default())
    }

    /// Get column family handle
    fn cf(&self, name: &str) -> Option<Arc<BoundColumnFamily<'_>>> {
        self.db.cf_handle(name)
    }

    fn options() -> Options {
        let mut opts = Options::default();

        // Keys are short ASCII; LZ4 keeps bucket scans cheap to decompress
        opts.set_compression_type(DBCompressionType::Lz4);

        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_block_cache(&rocksdb::Cache::new_lru_cache(64 * 1024 * 1024));
        opts.set_block_based_table_factory(&block_opts);

        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts
    }
}

/// Read-only view of the store at one point in time
pub struct ReadTxn<'a> {
    store: &'a Store,
    snapshot: SnapshotWithThreadMode<'a, Db>,
}

impl<'a> ReadTxn<'a> {
    /// Point read; a missing namespace reads as a missing key
    pub fn get(&self, namespace: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.store.cf(namespace) {
            Some(cf) => Ok(self.snapshot.get_cf(&cf, key)?),
            None => Ok(None),
        }
    }

    /// Cursor over a namespace, or `None` if the namespace does not exist
    pub fn cursor(&self, namespace: &str) -> Option<Cursor<'_>> {
        let cf = self.store.cf(namespace)?;
        Some(Cursor {
            iter: self.snapshot.raw_iterator_cf(&cf),
        })
    }
}

/// Ordered cursor over one namespace
///
/// Every positioning call returns the entry it lands on, or `None` once the
/// cursor runs past the last key.
pub struct Cursor<'a> {
    iter: DBRawIteratorWithThreadMode<'a, Db>,
}

impl<'a> Cursor<'a> {
    /// Position at the first key >= `prefix`
    pub fn seek(&mut self, prefix: &[u8]) -> Result<Option<(&[u8], &[u8])>> {
        self.iter.seek(prefix);
        self.entry()
    }

    /// Position at the first key of the namespace
    pub fn first(&mut self) -> Result<Option<(&[u8], &[u8])>> {
        self.iter.seek_to_first();
        self.entry()
    }

    /// Advance to the next key
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<(&[u8], &[u8])>> {
        if self.iter.valid() {
            self.iter.next();
        }
        self.entry()
    }

    fn entry(&self) -> Result<Option<(&[u8], &[u8])>> {
        if self.iter.valid() {
            return Ok(self.iter.key().zip(self.iter.value()));
        }
        self.iter.status()?;
        Ok(None)
    }
}

/// Buffered write holding the store's single-writer lock
///
/// Nothing is visible to readers until [`WriteTxn::commit`]; dropping the
/// transaction discards its writes.
pub struct WriteTxn<'a> {
    store: &'a Store,
    batch: WriteBatch,
    puts: usize,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> WriteTxn<'a> {
    /// Buffer a put into an existing namespace
    pub fn put(&mut self, namespace: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self
            .store
            .cf(namespace)
            .ok_or_else(|| StorageError::MissingNamespace(namespace.to_string()))?;
        self.batch.put_cf(&cf, key, value);
        self.puts += 1;
        Ok(())
    }

    /// Create a namespace unless it already exists
    ///
    /// Namespace creation takes effect immediately, independent of commit.
    pub fn create_namespace_if_absent(&self, name: &str) -> Result<()> {
        self.store.create_namespace_if_absent(name)
    }

    /// Apply every buffered put atomically
    pub fn commit(self) -> Result<()> {
        let WriteTxn {
            store, batch, puts, ..
        } = self;
        store.db.write(batch)?;
        debug!(puts, "committed write transaction");
        Ok(())
    }
}
