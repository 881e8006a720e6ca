mod api;
mod cli;
mod config;
mod database;
mod error;
mod jobs;
mod recurrence;
mod runner;
mod runs;
mod scheduler;
mod schema;
mod server;

use std::time::Instant;

use chrono::Local;
use cli::Cli;
use config::{Config, CONFIG};
use directories::ProjectDirs;
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, Naming};
use log::{error, info};

fn main() {
    let project_dirs = ProjectDirs::from("", "", "scrapepulse")
        .expect("Could not determine project directories");

    let config = match Config::load(&project_dirs) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };
    CONFIG.set(config).expect("Config already set!");

    setup_logging(&project_dirs);

    // Mark the start time and log a timestamped message
    let start = Instant::now();
    let now = Local::now();
    info!("scrapepulse starting at {}", now.format("%Y-%m-%d %H:%M:%S"));

    let result = Cli::handle_command_line(&project_dirs);

    let duration = start.elapsed();

    match result {
        Ok(()) => {
            info!("scrapepulse exited cleanly after {:.2?}", duration);
        }
        Err(err) => {
            error!("scrapepulse exited with error after {:.2?}", duration);
            error!("{:?}", err);
            eprintln!("{}", err);
            std::process::exit(1);
        }
    }
}

pub fn setup_logging(project_dirs: &ProjectDirs) {
    let config = CONFIG.get().expect("Config not initialized");
    let log_levels = format!("scrapepulse={}", config.logging.level);

    let log_dir = project_dirs.data_local_dir().join("logs");

    Logger::try_with_str(log_levels)
        .unwrap()
        .log_to_file(FileSpec::default().directory(log_dir))
        .duplicate_to_stderr(Duplicate::Info)
        .rotate(
            Criterion::Size(u64::MAX),  // Effectively disables size-based rotation
            Naming::TimestampsDirect,   // Logs directly to a timestamped file
            Cleanup::KeepLogFiles(100), // Keep 100 most recent log files
        )
        .start()
        .unwrap();
}
