use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use std::io::{self, BufRead, BufReader};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use iploc_core::Location;
use iploc_db::{locations, Store};
use iploc_http::{HttpConfig, HttpServerHandle, DEFAULT_ADDR};
use iploc_index::{
    BuildStats, DatasetFiles, DatasetSchema, IndexBuilder, IndexConfig, LookupEngine, NetworkForm,
};

mod batch;

use batch::BatchProcessor;

/// Offline IPv4 to city locator over the GeoLite2 City dataset
#[derive(Parser)]
#[command(name = "iploc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value = "human", global = true)]
    output: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Index directory
    #[arg(long, env = "IPLOC_DB", default_value = "./iplocs.db", global = true)]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the index from the dataset CSV files
    Build(BuildArgs),
    /// Locate a comma-separated list of IP addresses
    Lookup(LookupArgs),
    /// Locate one address per line from a file or stdin
    Batch(BatchArgs),
    /// Serve lookups over HTTP
    Serve(ServeArgs),
    /// Resolve a.b.0.d .. a.b.255.d and report timings
    Sweep(SweepArgs),
}

#[derive(Parser)]
struct BuildArgs {
    /// Directory holding the unpacked GeoLite2 City CSV files
    #[arg(long, env = "IPLOC_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Column layout of the dataset
    #[arg(long, value_enum, default_value = "current")]
    schema: SchemaPreset,

    /// Also index plain a.b.c.d/N networks
    #[arg(long)]
    map_plain_ipv4: bool,
}

#[derive(Parser)]
struct LookupArgs {
    /// IP address or comma-separated list of addresses
    #[arg(value_name = "IPS")]
    ips: String,
}

#[derive(Parser)]
struct BatchArgs {
    /// Input file (use '-' for stdin)
    #[arg(short, long, value_name = "FILE")]
    file: Option<String>,

    /// Number of worker threads (default: CPU count)
    #[arg(short, long)]
    workers: Option<usize>,
}

#[derive(Parser)]
struct ServeArgs {
    /// Listen address
    #[arg(short, long, env = "IPLOC_ADDR", default_value = DEFAULT_ADDR)]
    addr: String,

    /// Number of HTTP workers (default: CPU count)
    #[arg(short, long)]
    workers: Option<usize>,
}

#[derive(Parser)]
struct SweepArgs {
    /// Address whose third octet is swept
    #[arg(long, default_value = "77.22.56.119")]
    base: String,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output (pretty-printed)
    Json,
    /// JSON output (compact)
    JsonCompact,
    /// CSV output
    Csv,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SchemaPreset {
    /// GeoLite2 City CSV as currently distributed
    Current,
    /// 2014 layout with a separate prefix-length column
    Legacy,
}

#[derive(Debug, Serialize)]
struct LookupRow {
    ip: String,
    found: bool,
    city: Option<String>,
    location_id: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    error: Option<String>,
}

impl LookupRow {
    fn new(ip: &str, location: Option<&Location>) -> Self {
        Self {
            ip: ip.to_string(),
            found: location.is_some(),
            city: location.map(|l| l.city.clone()),
            location_id: location.map(|l| l.location_id.clone()),
            latitude: location.and_then(|l| l.coords.latitude),
            longitude: location.and_then(|l| l.coords.longitude),
            error: None,
        }
    }

    fn failed(ip: &str, error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::new(ip, None)
        }
    }
}

const VERBOSE_FILTER: &str = "info,iploc=debug,iploc_core=debug,iploc_cidr=debug,\
iploc_bloom=debug,iploc_db=debug,iploc_index=debug,iploc_http=debug";

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli) {
        error!("{:#}", err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Build(args) => handle_build(args, &cli.db, cli.output)?,
        Commands::Lookup(args) => handle_lookup(args, &cli.db, cli.output)?,
        Commands::Batch(args) => handle_batch(args, &cli.db, cli.output)?,
        Commands::Serve(args) => handle_serve(args, &cli.db)?,
        Commands::Sweep(args) => handle_sweep(args, &cli.db)?,
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { VERBOSE_FILTER } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(io::stderr)
        .init();
}

fn open_engine(db: &Path) -> Result<Arc<LookupEngine>> {
    let store = Store::open(db).with_context(|| format!("opening index {}", db.display()))?;
    let engine = LookupEngine::open(Arc::new(store), &IndexConfig::default())
        .with_context(|| format!("loading filters of {}", db.display()))?;
    Ok(Arc::new(engine))
}

fn handle_build(args: BuildArgs, db: &Path, format: OutputFormat) -> Result<()> {
    let files = DatasetFiles::locate(&args.data_dir)
        .with_context(|| format!("locating dataset in {}", args.data_dir.display()))?;

    let mut schema = match args.schema {
        SchemaPreset::Current => DatasetSchema::current(),
        SchemaPreset::Legacy => DatasetSchema::legacy(),
    };
    if args.map_plain_ipv4 {
        schema = schema.with_network_form(NetworkForm::MapPlainIpv4);
    }

    info!(db = %db.display(), "Rebuilding index");
    let stats = IndexBuilder::new(IndexConfig::default().with_schema(schema)).rebuild(db, &files)?;
    print_stats(&stats, format)
}

fn handle_lookup(args: LookupArgs, db: &Path, format: OutputFormat) -> Result<()> {
    let engine = open_engine(db)?;
    let ips: Vec<&str> = args.ips.split(',').collect();
    let report = engine.locate_many(ips.as_slice())?;

    let rows: Vec<LookupRow> = report
        .entries()
        .iter()
        .map(|(ip, location)| LookupRow::new(ip, location.as_ref()))
        .collect();
    print_rows(&rows, format)
}

fn handle_batch(args: BatchArgs, db: &Path, format: OutputFormat) -> Result<()> {
    let inputs = read_inputs(args.file.as_deref())?;
    let engine = open_engine(db)?;
    let processor = BatchProcessor::new(engine, args.workers)?;
    info!(inputs = inputs.len(), workers = processor.thread_count(), "Batch lookup");

    let started = Instant::now();
    let rows: Vec<LookupRow> = processor
        .process(inputs)
        .into_iter()
        .map(|entry| match entry.result {
            Ok(location) => LookupRow::new(&entry.input, location.as_ref()),
            Err(e) => LookupRow::failed(&entry.input, e),
        })
        .collect();
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "Batch complete");

    print_rows(&rows, format)
}

fn handle_serve(args: ServeArgs, db: &Path) -> Result<()> {
    let engine = open_engine(db)?;
    let config = HttpConfig {
        addr: args.addr,
        workers: args.workers.unwrap_or_else(num_cpus::get),
    };

    actix_web::rt::System::new().block_on(HttpServerHandle::new(engine, config).run())?;
    Ok(())
}

fn handle_sweep(args: SweepArgs, db: &Path) -> Result<()> {
    let base: Ipv4Addr = match args.base.parse() {
        Ok(ip) => ip,
        Err(_) => bail!("--base must be a dotted IPv4 address, got {:?}", args.base),
    };
    let [a, b, _, d] = base.octets();

    let started = Instant::now();
    let engine = open_engine(db)?;
    println!(
        "{} filters loaded in {:.3} s",
        "›".blue(),
        started.elapsed().as_secs_f64()
    );

    let mut resolve_ns = 0u128;
    let mut display_ns = 0u128;
    let mut hits = 0u32;

    for c in 0..=255u8 {
        let ip = format!("{}.{}.{}.{}", a, b, c, d);

        let t0 = Instant::now();
        let found = engine.resolve(&ip)?;
        resolve_ns += t0.elapsed().as_nanos();

        let Some(found) = found else { continue };
        let t1 = Instant::now();
        let city = locations::get_display(&engine.store().begin_read(), &found.location_id)?;
        display_ns += t1.elapsed().as_nanos();
        hits += 1;

        let [lat, lon] = found.coords.as_pair();
        println!(
            "{:>15}  {}  {} {}",
            ip,
            city.as_deref().unwrap_or("-"),
            lat.map_or_else(|| "-".to_string(), |v| v.to_string()),
            lon.map_or_else(|| "-".to_string(), |v| v.to_string()),
        );
    }

    println!("{}", "─".repeat(50).dimmed());
    println!("{:>15}: {} ns/op", "resolve".bold(), resolve_ns / 256);
    if hits > 0 {
        println!("{:>15}: {} ns/op", "display".bold(), display_ns / u128::from(hits));
    }
    println!("{:>15}: {}/256", "hits".bold(), hits);
    Ok(())
}

fn read_inputs(file: Option<&str>) -> Result<Vec<String>> {
    let reader: Box<dyn BufRead> = match file {
        None | Some("-") => Box::new(BufReader::new(io::stdin())),
        Some(path) => Box::new(BufReader::new(
            std::fs::File::open(path).with_context(|| format!("opening {}", path))?,
        )),
    };

    let mut inputs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() && !line.starts_with('#') {
            inputs.push(line.to_string());
        }
    }
    Ok(inputs)
}

fn print_stats(stats: &BuildStats, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(stats)?),
        OutputFormat::JsonCompact => println!("{}", serde_json::to_string(stats)?),
        OutputFormat::Csv => {
            let mut wtr = csv::Writer::from_writer(io::stdout());
            wtr.serialize(stats)?;
            wtr.flush()?;
        }
        OutputFormat::Human => {
            println!();
            println!("{}", "Index Build".bold().cyan());
            println!("{}", "─".repeat(50).dimmed());
            println!("{:>15}: {}", "Locations".bold(), stats.locations);
            println!("{:>15}: {}", "Duplicates".bold(), stats.duplicate_locations);
            println!("{:>15}: {}", "Ranges".bold(), stats.ranges.to_string().green());
            println!("{:>15}: {}", "Skipped".bold(), stats.skipped_rows);
            println!("{:>15}: {}", "Malformed".bold(), stats.malformed_rows);
            println!("{:>15}: {}", "Buckets".bold(), stats.buckets);
            println!("{:>15}: {} ms", "Elapsed".bold(), stats.elapsed_ms);
            println!();
        }
    }
    Ok(())
}

fn print_rows(rows: &[LookupRow], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Human => print_human(rows),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(rows)?),
        OutputFormat::JsonCompact => println!("{}", serde_json::to_string(rows)?),
        OutputFormat::Csv => print_csv(rows)?,
    }
    Ok(())
}

fn print_human(rows: &[LookupRow]) {
    for row in rows {
        match (&row.city, &row.error) {
            (Some(city), _) => println!("{:>15}: {}", row.ip.bold(), city.green()),
            (None, Some(error)) => println!("{:>15}: {}", row.ip.bold(), error.red()),
            (None, None) => println!("{:>15}: {}", row.ip.bold(), "-".dimmed()),
        }
    }
}

fn print_csv(rows: &[LookupRow]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(io::stdout());
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}
