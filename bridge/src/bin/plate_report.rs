//! Timing correlation report CLI.
//!
//! Reads the events DB, pairs T0 records with plate hits inside the lag
//! window, writes the CSV and prints a short summary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rusqlite::Connection;

use plate_bridge::correlate::{generate_matches, summarize, write_csv};

#[derive(Parser, Debug)]
#[command(name = "plate-report", about = "Timing correlation report between T0 and HIT events")]
struct Args {
    /// SQLite DB path
    #[arg(long, default_value = "logs/bridge.db")]
    db: PathBuf,
    /// Filter by session_id
    #[arg(long)]
    session: Option<String>,
    /// Maximum allowed lag between T0 and HIT, milliseconds
    #[arg(long, default_value_t = 500.0)]
    max_lag_ms: f64,
    /// Output CSV path
    #[arg(long, default_value = "reports/timing_correlation.csv")]
    out: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let conn = Connection::open(&args.db).with_context(|| format!("opening {}", args.db.display()))?;

    let matches = generate_matches(&conn, args.session.as_deref(), args.max_lag_ms)?;
    write_csv(&matches, &args.out)?;
    let summary = summarize(&matches);

    println!("Wrote {} matched pairs to {}", summary.matches, args.out.display());
    println!("Sessions with matches: {}", summary.sessions);
    if summary.matches > 0 {
        println!("Mean offset: {:.2} ms (std: {:.2} ms)", summary.mean_ms, summary.stddev_ms);
    } else {
        println!("No matches found with the given criteria.");
    }
    Ok(())
}
