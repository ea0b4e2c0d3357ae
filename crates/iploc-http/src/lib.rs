//! HTTP front end for iploc
//!
//! Serves lookups over plain HTTP:
//! - `GET /` or `/index.html` - info page with a sample lookup
//! - `GET /health` - liveness
//! - `GET /{ips}` - `ip: City (CC-Region)\t` per hit, as `text/plain`
//! - `GET /json/{ips}` - JSON object keyed by IP, CORS-enabled
//! - `GET /{callback}/{ips}` - the JSON wrapped as `callback(...)`
//!
//! `{ips}` is a comma-separated list. Unresolvable entries are left out of
//! every rendering.
//!
//! # Examples
//!
//! ```no_run
//! use iploc_db::Store;
//! use iploc_http::{HttpConfig, HttpServerHandle};
//! use iploc_index::{IndexConfig, LookupEngine};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(Store::open("./iplocs.db")?);
//! let engine = Arc::new(LookupEngine::open(store, &IndexConfig::default())?);
//!
//! actix_web::rt::System::new().block_on(async move {
//!     HttpServerHandle::new(engine, HttpConfig::default()).run().await
//! })?;
//! # Ok(())
//! # }
//! ```

use actix_web::{web, App, HttpServer};
use iploc_index::LookupEngine;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

mod handlers;

pub use handlers::{is_valid_callback, routes};

/// Address used when none is configured
pub const DEFAULT_ADDR: &str = "0.0.0.0:9000";

/// HTTP server errors
#[derive(Error, Debug)]
pub enum HttpError {
    /// Listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Server terminated abnormally
    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HttpError>;

/// Listener settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub addr: String,
    /// Worker threads accepting connections
    pub workers: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            workers: num_cpus::get(),
        }
    }
}

/// HTTP front end bound to one lookup engine
pub struct HttpServerHandle {
    engine: Arc<LookupEngine>,
    config: HttpConfig,
}

impl HttpServerHandle {
    pub fn new(engine: Arc<LookupEngine>, config: HttpConfig) -> Self {
        Self { engine, config }
    }

    /// Bind and serve until the process receives a shutdown signal
    ///
    /// Must be driven by an actix system, e.g. `actix_web::rt::System`.
    pub async fn run(self) -> Result<()> {
        let data = web::Data::from(self.engine);
        let addr = self.config.addr;

        let server = HttpServer::new(move || App::new().app_data(data.clone()).configure(routes))
            .workers(self.config.workers.max(1))
            .bind(addr.as_str())
            .map_err(|source| HttpError::Bind {
                addr: addr.clone(),
                source,
            })?;

        info!(addr = %addr, workers = self.config.workers, "HTTP server listening");
        server.run().await?;
        info!("HTTP server stopped");
        Ok(())
    }
}
