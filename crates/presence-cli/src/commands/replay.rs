use std::path::PathBuf;

use chrono::{Local, NaiveDateTime, TimeZone, Utc};
use clap::Args;
use presence_core::{format_duration, replay, Config, DetectionScript, StopReason};

#[derive(Args)]
pub struct ReplayArgs {
    /// Script file with `<offset_secs> <present|absent|error|lost>` lines
    script: PathBuf,
    /// Database file (defaults to the configured one)
    #[arg(long)]
    db: Option<PathBuf>,
    /// Local start time of the replay, "YYYY-MM-DD HH:MM:SS" (defaults to now)
    #[arg(long)]
    at: Option<String>,
    /// Print the full report as JSON
    #[arg(long)]
    json: bool,
}

pub fn run(args: ReplayArgs) -> Result<(), Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(&args.script)
        .map_err(|e| format!("cannot read {}: {e}", args.script.display()))?;
    let script = DetectionScript::parse(&text)?;

    let origin = match args.at.as_deref() {
        Some(raw) => {
            let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map_err(|e| format!("invalid --at '{raw}': {e}"))?;
            Local
                .from_local_datetime(&naive)
                .earliest()
                .ok_or_else(|| format!("--at '{raw}' does not exist in local time"))?
                .with_timezone(&Utc)
        }
        None => Utc::now(),
    };

    let config = Config::load()?;
    let db = super::open_database(args.db)?;
    let report = replay(script, &db, &config, origin)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Sessions saved: {}", report.sessions_saved);
    println!("Time present:   {}", format_duration(report.saved_secs));
    println!("Detection runs: {}", report.detections);
    if report.stop_reason == StopReason::StreamLost {
        println!("Stream lost at {:.2}s", report.stopped_at_secs);
    }
    Ok(())
}
