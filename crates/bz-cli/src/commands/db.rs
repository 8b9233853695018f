//! Database maintenance commands.

use anyhow::{Context, Result};
use bz_storage::SqliteRecordStore;

use super::{load_runtime_config, RuntimeConfig};

/// Record counts per table and the change log size.
pub async fn stats(config_path: &str) -> Result<()> {
    let runtime = load_runtime_config(config_path)?;
    let Some(db_path) = existing_database(&runtime) else {
        return Ok(());
    };

    let store = SqliteRecordStore::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    let counts = store.table_counts().context("failed to count records")?;
    let changes = store.changelog_len().context("failed to read change log")?;

    println!("database: {}", db_path.display());
    println!("  size: {}", format_size(std::fs::metadata(&db_path)?.len()));
    println!();
    if counts.is_empty() {
        println!("no records");
    } else {
        let width = counts.iter().map(|(table, _)| table.len()).max().unwrap_or(0);
        let mut total = 0;
        for (table, count) in &counts {
            println!("  {table:<width$}  {count}");
            total += count;
        }
        println!("  {:<width$}  {total}", "total");
    }
    println!();
    println!("change log entries: {changes}");

    Ok(())
}

/// Check database integrity.
pub async fn check(config_path: &str) -> Result<()> {
    let runtime = load_runtime_config(config_path)?;
    let Some(db_path) = existing_database(&runtime) else {
        return Ok(());
    };

    println!("Checking database integrity...");
    let conn = rusqlite::Connection::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    let result: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;

    if result == "ok" {
        println!("Database integrity: OK");
        Ok(())
    } else {
        println!("Database integrity issues found:");
        println!("{result}");
        Err(anyhow::anyhow!("integrity check failed"))
    }
}

fn existing_database(runtime: &RuntimeConfig) -> Option<std::path::PathBuf> {
    if runtime.is_in_memory() {
        println!("data_dir is in-memory; nothing is stored on disk");
        return None;
    }
    let db_path = runtime.database_path();
    if !db_path.exists() {
        println!("Database not found: {}", db_path.display());
        return None;
    }
    Some(db_path)
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
