use clap::Parser;
use codewatch::cli::{commands, Cli, Commands};
use codewatch::config::{default_data_dir, Settings};
use codewatch::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to load configuration: {e}"))?;

    // The long-lived daemon logs to a rolling file as well as stderr; every
    // other subcommand is short-lived and stderr-only.
    let _guard = match &cli.command {
        Commands::Serve { .. } => logging::init_with_file(&settings.logging, &default_data_dir().join("logs")),
        _ => {
            logging::init(&settings.logging);
            None
        }
    };

    match cli.command {
        Commands::Init { force } => commands::init(&settings, cli.config.as_deref(), force),
        Commands::Serve { roots, http } => commands::serve(settings, roots, http).await,
        Commands::ScanOnce { roots, timeout_secs } => commands::scan_once(settings, roots, timeout_secs),
        Commands::Rescan { roots, timeout_secs } => commands::scan_once(settings, roots, timeout_secs),
        Commands::Search { query, limit, offset, regex } => {
            commands::search(&settings, cli.json, &query, limit, offset, regex)
        }
        Commands::SearchSymbols { query, limit, offset } => {
            commands::search_symbols(&settings, cli.json, &query, limit, offset)
        }
        Commands::ListFiles { repo, limit, offset } => {
            commands::list_files(&settings, cli.json, repo.as_deref(), limit, offset)
        }
        Commands::ReadFile { key } => commands::read_file(&settings, &key),
        Commands::ReadSymbol { name } => commands::read_symbol(&settings, &name),
        Commands::GetCallers { name } => commands::relations(&settings, &name, false),
        Commands::GetImplementations { name } => commands::relations(&settings, &name, true),
        Commands::CallGraph { name, depth } => commands::call_graph(&settings, &name, depth),
        Commands::RepoCandidates { limit } => commands::repo_candidates(&settings, limit),
        Commands::Status => commands::status(&settings),
        Commands::Doctor { limit } => commands::doctor(&settings, limit),
        Commands::IndexFile { path } => commands::index_file(&settings, &path),
    }
}
