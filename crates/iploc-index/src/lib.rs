//! Index builder and lookup engine for iploc
//!
//! Turns the two GeoLite2 City CSV files into a persisted index and answers
//! IPv4 → city queries against it.
//!
//! # Build
//!
//! Two passes over the dataset, each one write transaction:
//! 1. locations CSV → Location Store, deduplicated through `locationsSeen`
//! 2. blocks CSV → bucketed Range Store, feeding every 2- and 3-octet key
//!    prefix into `ipPrefixSeen`
//!
//! # Lookup
//!
//! Inside the query's bucket the engine scans, in order, the keys sharing the
//! query's 3-octet prefix, then its 2-octet prefix, then the whole bucket.
//! The prefix filter skips scopes that hold no key at all, and a per-lookup
//! `visitedKeys` filter keeps a key from being tested twice. The first range
//! in key order containing the address wins.
//!
//! # Examples
//!
//! ```no_run
//! use iploc_db::Store;
//! use iploc_index::{DatasetFiles, IndexBuilder, IndexConfig, LookupEngine};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IndexConfig::default();
//! let files = DatasetFiles::locate("./data")?;
//! IndexBuilder::new(config.clone()).rebuild("./iplocs.db", &files)?;
//!
//! let store = Arc::new(Store::open("./iplocs.db")?);
//! let engine = LookupEngine::open(store, &config)?;
//! if let Some(location) = engine.locate("77.22.56.119")? {
//!     println!("{}", location.city);
//! }
//! # Ok(())
//! # }
//! ```

use iploc_core::IplocError;
use iploc_db::StorageError;
use std::path::PathBuf;
use thiserror::Error;

mod builder;
mod config;
mod dataset;
mod engine;
mod report;
mod schema;

pub use builder::{BuildStats, IndexBuilder};
pub use config::{FilterSizing, IndexConfig};
pub use dataset::DatasetFiles;
pub use engine::LookupEngine;
pub use report::LookupReport;
pub use schema::{BlockField, BlocksSchema, DatasetSchema, LocationField, LocationsSchema, NetworkForm};

/// Errors raised while building or querying an index
#[derive(Error, Debug)]
pub enum IndexError {
    /// Dataset file absent
    #[error("Dataset file not found: {0}")]
    MissingFile(PathBuf),

    /// Dataset contents do not match the configured schema
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// CSV framing or read error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Persisted store failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IndexError> for IplocError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Storage(e) => e.into(),
            IndexError::Io(e) => IplocError::Io(e),
            other => IplocError::Dataset(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
