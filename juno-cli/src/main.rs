//! Command line client that joins a juno host as a module.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod commands;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "juno-module", version, about = "Talk to a juno host as a module")]
struct Cli {
    #[command(flatten)]
    connect: commands::ConnectArgs,

    /// Log filter used when RUST_LOG is unset (e.g. `debug`, `juno=trace`).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Call a function on another module and print its response.
    Call(commands::CallArgs),

    /// Fire a hook.
    Trigger {
        /// Hook name.
        hook: String,
    },

    /// Subscribe to hooks and print each one as it fires.
    Listen {
        /// Hook names.
        #[arg(required = true, num_args = 1..)]
        hooks: Vec<String>,
    },

    /// Declare functions that answer with their own arguments, and serve
    /// calls until interrupted.
    Echo {
        /// Function names.
        #[arg(required = true, num_args = 1..)]
        functions: Vec<String>,
    },

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_logging(&cli.log_level) {
        eprintln!("juno-module: {e:#}");
        std::process::exit(2);
    }
    if let Err(e) = cli.dispatch().await {
        eprintln!("juno-module: {e:#}");
        std::process::exit(1);
    }
}

/// Installs a stderr subscriber filtered by `RUST_LOG`, or `fallback`.
fn init_logging(fallback: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .with_context(|| format!("invalid log filter `{fallback}`"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

impl Cli {
    async fn dispatch(self) -> Result<()> {
        match self.command {
            Command::Call(args) => commands::call(&self.connect, args).await,
            Command::Trigger { hook } => commands::trigger(&self.connect, &hook).await,
            Command::Listen { hooks } => commands::listen(&self.connect, &hooks).await,
            Command::Echo { functions } => commands::echo(&self.connect, &functions).await,
            Command::Completion { shell } => {
                clap_complete::generate(
                    shell,
                    &mut Self::command(),
                    "juno-module",
                    &mut std::io::stdout(),
                );
                Ok(())
            }
        }
    }
}
