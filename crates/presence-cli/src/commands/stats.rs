use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use clap::{Args, Subcommand};
use presence_core::format_duration;

#[derive(Subcommand)]
pub enum StatsAction {
    /// Today's totals
    Today {
        #[command(flatten)]
        opts: Output,
    },
    /// Totals over a date range
    Range {
        #[command(flatten)]
        range: DateRange,
        #[command(flatten)]
        opts: Output,
    },
    /// Presence by hour of day over a date range
    Hourly {
        #[command(flatten)]
        range: DateRange,
        #[command(flatten)]
        opts: Output,
    },
    /// Presence per day over a date range
    Daily {
        #[command(flatten)]
        range: DateRange,
        #[command(flatten)]
        opts: Output,
    },
}

/// Inclusive local date range; both ends default to today.
#[derive(Args)]
pub struct DateRange {
    /// First day (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<NaiveDate>,
    /// Last day (YYYY-MM-DD)
    #[arg(long)]
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn resolve(&self) -> (NaiveDate, NaiveDate) {
        let today = Local::now().date_naive();
        (self.from.unwrap_or(today), self.to.unwrap_or(today))
    }
}

#[derive(Args)]
pub struct Output {
    /// Database file (defaults to the configured one)
    #[arg(long)]
    pub db: Option<PathBuf>,
    /// Print JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(action: StatsAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        StatsAction::Today { opts } => {
            let today = Local::now().date_naive();
            summary(today, today, opts)
        }
        StatsAction::Range { range, opts } => {
            let (from, to) = range.resolve();
            summary(from, to, opts)
        }
        StatsAction::Hourly { range, opts } => {
            let (from, to) = range.resolve();
            let db = super::open_database(opts.db)?;
            let hours = db.hourly_totals(from, to)?;
            if opts.json {
                println!("{}", serde_json::to_string_pretty(&hours)?);
            } else {
                for h in hours.iter().filter(|h| h.total_secs > 0.0) {
                    println!("{:02}:00  {}", h.hour, format_duration(h.total_secs));
                }
            }
            Ok(())
        }
        StatsAction::Daily { range, opts } => {
            let (from, to) = range.resolve();
            let db = super::open_database(opts.db)?;
            let days = db.daily_totals(from, to)?;
            if opts.json {
                println!("{}", serde_json::to_string_pretty(&days)?);
            } else {
                for d in &days {
                    println!("{}  {:>4} sessions  {}", d.day, d.sessions, format_duration(d.total_secs));
                }
            }
            Ok(())
        }
    }
}

fn summary(from: NaiveDate, to: NaiveDate, opts: Output) -> Result<(), Box<dyn std::error::Error>> {
    let db = super::open_database(opts.db)?;
    let summary = db.summary(from, to)?;
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    println!("{from} .. {to}");
    println!("Total presence:   {}", format_duration(summary.total_secs));
    println!("Sessions:         {}", summary.total_sessions);
    println!("Average session:  {}", format_duration(summary.average_secs));
    println!("Longest session:  {}", format_duration(summary.longest_secs));
    Ok(())
}
