use std::path::PathBuf;
use std::process::ExitCode;

use room_scanner::config::{init_logging, AppConfig};
use room_scanner::{open_library, Result};

/// Open the library, report what it holds, and tidy storage.
///
/// Usage: room-scanner [config.json]
#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);

    let config = match config_path {
        Some(path) => AppConfig::load(&path),
        None => Ok(AppConfig::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.log_filter);

    match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Library maintenance failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &AppConfig) -> Result<()> {
    let library = open_library(config)?;

    let overview = library.overview().await?;
    println!(
        "{} scans in {} folders",
        overview.total_scans,
        overview.folders.len()
    );
    for (folder, count) in &overview.folders {
        println!("  {} ({})", folder.name, count);
    }
    println!("  unfiled ({})", overview.unfiled);

    let report = library.verify().await?;
    for scan in &report.missing_models {
        println!("missing model: {} ({})", scan.name, scan.model_ref);
    }
    if report.thumbnails_cleared > 0 {
        println!("cleared {} missing thumbnails", report.thumbnails_cleared);
    }

    let removed = library.sweep_orphans().await?;
    if !removed.is_empty() {
        println!("removed {} orphaned files", removed.len());
    }

    Ok(())
}
