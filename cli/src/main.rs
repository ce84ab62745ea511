use clap::{Parser, Subcommand};

mod commands;
mod util;

use commands::admission::{AdmitArgs, ResetArgs, StatsArgs};
use commands::security::{AlertCommands, BlockCommands, EvaluateArgs};
use util::Target;

#[derive(Parser)]
#[command(name = "gatekeep", version, about = "Gatekeep CLI: admission checks, threat evaluation and alert triage")]
struct Cli {
    /// API base URL
    #[arg(long, env = "GATEKEEP_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Bearer token for admin operations
    #[arg(long, env = "GATEKEEP_ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,

    /// Print compact JSON
    #[arg(long, global = true)]
    raw: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Ask whether a subject may perform an action
    Admit(AdmitArgs),
    /// Run a request through the threat rules
    Evaluate(EvaluateArgs),
    /// Quota and behavior snapshot for a subject and action
    Stats(StatsArgs),
    /// Drop all quota state of a subject (admin)
    Reset(ResetArgs),
    /// List the active rule set
    Rules,
    /// Alert operations
    Alerts {
        #[command(subcommand)]
        command: AlertCommands,
    },
    /// Block operations
    Block {
        #[command(subcommand)]
        command: BlockCommands,
    },
    /// Aggregate request metrics
    Metrics,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let target = Target {
        api_url: cli.api_url.trim_end_matches('/'),
        admin_token: cli.admin_token.as_deref(),
        raw: cli.raw,
    };

    let code = match cli.command {
        Commands::Health => commands::health::run(&target).await,
        Commands::Admit(args) => commands::admission::admit(&target, args).await,
        Commands::Evaluate(args) => commands::security::evaluate(&target, args).await,
        Commands::Stats(args) => commands::admission::stats(&target, args).await,
        Commands::Reset(args) => commands::admission::reset(&target, args).await,
        Commands::Rules => commands::security::rules(&target).await,
        Commands::Alerts { command } => commands::security::alerts(&target, command).await,
        Commands::Block { command } => commands::security::block(&target, command).await,
        Commands::Metrics => commands::metrics::run(&target).await,
    };

    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn evaluate_accepts_repeated_headers() {
        let cli = Cli::try_parse_from([
            "gatekeep",
            "evaluate",
            "--subject",
            "u1",
            "--header",
            "referer=https://a.example",
            "--header",
            "x-client=ios",
            "--raw",
        ])
        .expect("arguments should parse");
        assert!(cli.raw);
        assert!(matches!(cli.command, Commands::Evaluate(_)));
    }
}
