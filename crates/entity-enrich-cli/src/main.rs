use clap::{Parser, Subcommand};

mod commands;
mod output;
mod wiring;

use commands::{batch, run};

/// Business-entity enrichment pipeline CLI.
#[derive(Parser)]
#[command(name = "enrich")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Crawl, classify, extract, score, and gate business entity data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enrich a single entity
    Run(run::RunArgs),

    /// Enrich every entity in a CSV file, flushing writes once at the end
    Batch(batch::BatchArgs),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run(args) => run::run(args).await,
        Commands::Batch(args) => batch::run(args).await,
    };

    let code = match code {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{e}"));
            if e.to_string().contains("configuration error") {
                2
            } else {
                1
            }
        }
    };

    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clap_parses_known_subcommands() {
        let cli = Cli::try_parse_from(["enrich", "run", "https://acme.com"]).expect("parse run");
        assert!(matches!(cli.command, Commands::Run(_)));

        let cli = Cli::try_parse_from(["enrich", "batch", "entities.csv"]).expect("parse batch");
        assert!(matches!(cli.command, Commands::Batch(_)));
    }

    #[test]
    fn clap_enforces_required_args() {
        assert!(Cli::try_parse_from(["enrich", "run"]).is_err());
        assert!(Cli::try_parse_from(["enrich", "batch"]).is_err());
    }
}
