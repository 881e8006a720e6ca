use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use log::info;

use std::path::PathBuf;

use crate::api::AppState;
use crate::config::CONFIG;
use crate::database::Database;
use crate::error::ScrapePulseError;
use crate::runner::JobRunner;
use crate::scheduler::Scheduler;
use crate::server::WebServer;

/// CLI for scrapepulse: scheduled scraping jobs against a remote scraping API.
#[derive(Parser)]
#[command(
    name = "scrapepulse",
    version,
    about = "Scheduled web-scraping automation service"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands in scrapepulse.
#[derive(Subcommand)]
pub enum Command {
    /// Open the database (running migrations), start the scheduler, and serve
    /// the management API until interrupted.
    Serve {
        /// Bind host. Overrides the configured server.host.
        #[arg(long)]
        host: Option<String>,

        /// Bind port. Overrides the configured server.port.
        #[arg(long)]
        port: Option<u16>,

        /// Directory where the database is stored. Overrides the configured
        /// database.dir; the file is always named "scrapepulse.db".
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

impl Cli {
    pub fn handle_command_line(project_dirs: &ProjectDirs) -> Result<(), ScrapePulseError> {
        let cli = Cli::parse();

        match cli.command {
            Command::Serve {
                host,
                port,
                db_path,
            } => {
                let config = CONFIG.get().expect("Config not initialized");
                let host = host.unwrap_or_else(|| config.server.host.clone());
                let port = port.unwrap_or(config.server.port);
                let db_dir = db_path.unwrap_or_else(|| config.database_dir(project_dirs));

                let runtime = tokio::runtime::Runtime::new()?;
                runtime.block_on(Self::serve(host, port, db_dir))
            }
        }
    }

    async fn serve(host: String, port: u16, db_dir: PathBuf) -> Result<(), ScrapePulseError> {
        let db = Database::new(Some(db_dir))?;

        let scheduler = Scheduler::new(db.clone(), JobRunner::new());
        let registered = scheduler.start().await?;
        info!("{registered} scheduled job(s) registered at startup");

        let state = AppState {
            db,
            scheduler: scheduler.clone(),
        };
        let server = WebServer::new(host, port, state);

        tokio::select! {
            result = server.start() => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                scheduler.stop().await;
                Ok(())
            }
        }
    }
}
