use clap::{Parser, Subcommand};
use quarry_core::Claims;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "quarry", version, about = "Quarry CLI: database tools from YAML")]
struct Cli {
    /// Path to the toolbox configuration file.
    #[arg(long, short = 'c', global = true, env = "QUARRY_CONFIG", default_value = "tools.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build every source and tool in the configuration and report the result.
    Check,

    /// Tool introspection (list/describe)
    Tools {
        #[command(subcommand)]
        cmd: ToolsCommand,
    },

    /// Invoke one tool and print its result as JSON.
    Invoke {
        /// Tool name.
        tool: String,

        /// Tool input as a JSON object, e.g. '{"id": 3}'.
        #[arg(long, short = 'p')]
        params: Option<String>,

        /// Verified auth service with its claims, e.g. svcA='{"email":"a@b.c"}'. Repeatable.
        #[arg(long = "auth", value_parser = commands::invoke::parse_auth)]
        auth: Vec<(String, Claims)>,

        /// Caller credential for per-caller sources (`Bearer <token>` or a bare token).
        #[arg(long, env = "QUARRY_CREDENTIAL", hide_env_values = true)]
        credential: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ToolsCommand {
    /// List tools, optionally restricted to one toolset.
    List {
        #[arg(long)]
        toolset: Option<String>,
    },

    /// Print a tool's manifest as JSON.
    Describe {
        /// Tool name.
        tool: String,

        /// Print the tool-protocol manifest (JSON Schema input) instead.
        #[arg(long, default_value_t = false)]
        protocol: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Check => commands::check::run(&cli.config).await?,

        Command::Tools { cmd } => match cmd {
            ToolsCommand::List { toolset } => {
                commands::tools::list(&cli.config, toolset.as_deref()).await?
            }
            ToolsCommand::Describe { tool, protocol } => {
                commands::tools::describe(&cli.config, &tool, protocol).await?
            }
        },

        Command::Invoke {
            tool,
            params,
            auth,
            credential,
        } => {
            let args = commands::invoke::InvokeArgs {
                tool: &tool,
                params: params.as_deref(),
                auth,
                credential: credential.as_deref(),
            };
            let status = commands::invoke::run(&cli.config, args).await?;
            return Ok(ExitCode::from(status));
        }
    }

    Ok(ExitCode::SUCCESS)
}
