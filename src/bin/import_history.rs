// Small dev utility: import a historical fermentation file into a SQLite database.
//
// Usage:
//   cargo run --bin import_history -- <db_path> <file> [tenant_id] [annotated_out]
//
// Import settings are read from the config_kv table of the target database.
// Set LOG_FORMAT=json for structured log lines.

use std::error::Error;
use std::path::PathBuf;

use wine_history_import::db::{init_schema, open_sqlite_connection};
use wine_history_import::{logging, ConfigManager, ImportJobManager, ImportOrchestrator, ImportSource};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    match std::env::var("LOG_FORMAT") {
        Ok(format) if format.eq_ignore_ascii_case("json") => logging::init_json(),
        _ => logging::init(),
    }

    let mut args = std::env::args().skip(1);
    let db_path = args.next().ok_or("missing <db_path>")?;
    let file = PathBuf::from(args.next().ok_or("missing <file>")?);
    let tenant_id = args.next().unwrap_or_else(|| "default".to_string());
    let annotated_out = args.next().map(PathBuf::from);

    {
        let conn = open_sqlite_connection(&db_path)?;
        init_schema(&conn)?;
    }

    let config = ConfigManager::new(&db_path)?;
    let orchestrator = ImportOrchestrator::from_config_reader(db_path.as_str(), &config)?;
    let manager = ImportJobManager::new(orchestrator);

    let job_id = manager.start_import(ImportSource::File(file), &tenant_id)?;
    let status = manager.wait(&job_id).await?;
    let report = manager.get_report(&job_id).ok_or("report not available")?;

    println!("job_id={}", job_id);
    println!("state={}", status.state);
    println!(
        "units={} committed={} rejected={} warnings={} skipped={}",
        report.total_units,
        report.committed_count,
        report.rejected_count,
        report.warning_count,
        report.skipped_unit_keys.len()
    );
    if let Some(fatal) = &report.fatal {
        println!("fatal: {}: {}", fatal.field, fatal.message);
    }

    if let Some(path) = annotated_out {
        let bytes = manager.get_annotated_output(&job_id).unwrap_or_default();
        std::fs::write(&path, bytes)?;
        println!("annotated={}", path.display());
    }

    Ok(())
}
