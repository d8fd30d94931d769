mod cli;
mod logger;

use crate::cli::{Cli, Commands};
use crate::logger::LOGGER;
use clap::Parser;
use log::{LevelFilter, info};
use std::sync::Arc;
use vesper_server::pipeline::DirectoryPipeline;
use vesper_server::server::{Server, ServerConfig};
use vesper_shared::VesperResult;

#[tokio::main]
async fn main() -> VesperResult {
    let cli = Cli::parse();

    // Map verbosity count (-v, -vv) to log levels
    let log_level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(log_level))
        .expect("Failed to set logger");

    match cli.command {
        Commands::Dev {
            host,
            port,
            root,
            static_dir,
            watch,
        } => {
            let mut config = ServerConfig::new()
                .with_host(host)
                .with_port(port.as_str())
                .with_exit_signals(true);

            if let Some(dir) = static_dir {
                config = config.with_static_root(dir);
            }
            for path in watch {
                config = config.with_watch_path(path);
            }

            info!(target: "server", "initializing...");

            let pipeline = Arc::new(DirectoryPipeline::new(&root)?);
            let server = Server::new(config, pipeline);

            server.start().await?;
            info!(target: "server", "watching {} for changes...", root.display());

            // Parks here; the signal handler exits the process on Ctrl-C.
            server.wait_until_stopped().await;
            Ok(())
        }
    }
}
