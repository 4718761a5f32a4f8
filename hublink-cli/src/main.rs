//! CLI for downloading and running MicroPython programs on hubs.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod compile;
mod run;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hublink", version, about = "Run MicroPython programs on hubs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download a script to a hub, run it and attach to its console.
    Run(Box<run::RunArgs>),

    /// Compile a script and print the MPY blob.
    Compile(compile::CompileArgs),

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

/// Output format for compiled programs.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    /// C byte array, 8 bytes per line.
    #[default]
    CArray,
    /// Machine-readable JSON.
    Json,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    // Exit here rather than returning: the runtime would otherwise wait for
    // a stdin read that never completes.
    let code = match Cli::parse().dispatch().await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("hublink: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

impl Cli {
    async fn dispatch(self) -> Result<()> {
        match self.command {
            Command::Run(args) => args.run().await,
            Command::Compile(args) => args.run().await,
            Command::Completion { shell } => {
                clap_complete::generate(
                    shell,
                    &mut Self::command(),
                    "hublink",
                    &mut std::io::stdout(),
                );
                Ok(())
            }
        }
    }
}
