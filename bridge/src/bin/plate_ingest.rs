//! NDJSON → SQLite ingest CLI.
//!
//! One-shot: `plate-ingest logs/bridge_20250801.ndjson --db logs/bridge.db`
//! Follow:   `plate-ingest --follow --logs logs --prefix bridge`

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use plate_bridge::ingest::{ensure_db, follow, ingest_file};

#[derive(Parser, Debug)]
#[command(name = "plate-ingest", about = "Ingest NDJSON event logs into a local SQLite DB")]
struct Args {
    /// Path to an NDJSON file (one-shot mode)
    log: Option<PathBuf>,
    /// SQLite DB path
    #[arg(long, default_value = "logs/bridge.db")]
    db: PathBuf,
    /// Filter by session_id
    #[arg(long)]
    session: Option<String>,
    /// Max lines to ingest from the file
    #[arg(long)]
    limit: Option<usize>,
    /// Tail the current daily file instead of a one-shot ingest
    #[arg(long)]
    follow: bool,
    /// Logs directory (follow mode)
    #[arg(long, default_value = "logs")]
    logs: PathBuf,
    /// NDJSON file prefix (follow mode)
    #[arg(long, default_value = "bridge")]
    prefix: String,
    /// Polling interval for new data, milliseconds (follow mode)
    #[arg(long, default_value_t = 200)]
    poll_ms: u64,
    /// Read the current daily file from the beginning instead of the end
    #[arg(long)]
    from_start: bool,
}

static STOP: AtomicBool = AtomicBool::new(false);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "plate_bridge=info".into()),
        )
        .init();

    let args = Args::parse();
    let conn = ensure_db(&args.db)?;

    if args.follow {
        println!("Following {}/{}_*.ndjson into {}", args.logs.display(), args.prefix, args.db.display());
        follow(
            &conn,
            &args.logs,
            &args.prefix,
            Duration::from_millis(args.poll_ms.max(10)),
            args.from_start,
            &STOP,
        )?;
        return Ok(());
    }

    let log = args.log.context("a log file is required unless --follow is given")?;
    let started = Instant::now();
    let n = ingest_file(&conn, &log, args.session.as_deref(), args.limit)?;
    println!(
        "Ingested {n} records from {} into {} in {:.2}s",
        log.display(),
        args.db.display(),
        started.elapsed().as_secs_f64()
    );
    Ok(())
}
