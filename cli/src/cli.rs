use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "Vesper")]
#[command(about = "Development server with live browser sync")]
#[command(long_about = "Vesper: a dev server that serves build output from memory \
and keeps connected browsers in sync")]
#[command(version)]
#[command(author)]
#[command(styles = get_styles())]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the development server
    Dev {
        /// Host address to bind the server to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to run the server on (a number or "auto")
        #[arg(short, long, default_value = "8080")]
        port: String,

        /// Directory served as the build output
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Directory for paths the build output does not cover
        #[arg(long = "static")]
        static_dir: Option<PathBuf>,

        /// Extra paths to watch; changes trigger a client reload
        #[arg(long = "watch")]
        watch: Vec<PathBuf>,
    },
}

fn get_styles() -> Styles {
    Styles::styled()
        .usage(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .header(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Cyan.on_default())
        .invalid(AnsiColor::Red.on_default() | Effects::BOLD)
        .error(AnsiColor::Red.on_default() | Effects::BOLD)
        .valid(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::White.on_default())
}
