pub mod config;
pub mod replay;
pub mod sessions;
pub mod stats;

use std::path::PathBuf;

use presence_core::Database;
use tracing::debug;

/// Open the database named by `--db`, or the configured one.
pub fn open_database(db: Option<PathBuf>) -> Result<Database, Box<dyn std::error::Error>> {
    let db = match db {
        Some(path) => Database::open_at(path)?,
        None => Database::open()?,
    };
    if let Some(path) = db.path() {
        debug!(path = %path.display(), "opened presence database");
    }
    Ok(db)
}
