use std::io::Write;
use std::path::PathBuf;

use clap::Subcommand;
use presence_core::format_duration;
use presence_core::storage::database::TIMESTAMP_FORMAT;
use presence_core::storage::SessionRecord;

use super::stats::{DateRange, Output};

#[derive(Subcommand)]
pub enum SessionsAction {
    /// List sessions in a date range
    List {
        #[command(flatten)]
        range: DateRange,
        #[command(flatten)]
        opts: Output,
    },
    /// Export sessions in a date range as CSV
    Export {
        #[command(flatten)]
        range: DateRange,
        /// Database file (defaults to the configured one)
        #[arg(long)]
        db: Option<PathBuf>,
        /// Output file (defaults to stdout)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

pub fn run(action: SessionsAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        SessionsAction::List { range, opts } => {
            let (from, to) = range.resolve();
            let db = super::open_database(opts.db)?;
            let records = db.sessions_between(from, to)?;
            if opts.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("no sessions");
            } else {
                for r in &records {
                    println!(
                        "{:>5}  {}  {}  {}",
                        r.id,
                        r.start_time.format("%Y-%m-%d %H:%M:%S"),
                        r.end_time.format("%H:%M:%S"),
                        format_duration(r.duration_secs)
                    );
                }
            }
        }
        SessionsAction::Export { range, db, output } => {
            let (from, to) = range.resolve();
            let db = super::open_database(db)?;
            let records = db.sessions_between(from, to)?;
            match output {
                Some(path) => {
                    let mut file = std::fs::File::create(&path)?;
                    write_csv(&mut file, &records)?;
                    eprintln!("exported {} sessions to {}", records.len(), path.display());
                }
                None => write_csv(&mut std::io::stdout().lock(), &records)?,
            }
        }
    }
    Ok(())
}

fn write_csv(out: &mut impl Write, records: &[SessionRecord]) -> std::io::Result<()> {
    writeln!(out, "id,start_time,end_time,duration")?;
    for r in records {
        writeln!(
            out,
            "{},{},{},{:.3}",
            r.id,
            r.start_time.format(TIMESTAMP_FORMAT),
            r.end_time.format(TIMESTAMP_FORMAT),
            r.duration_secs
        )?;
    }
    Ok(())
}
