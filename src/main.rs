use clap::Parser;
use tracing_subscriber::EnvFilter;

mod app;
mod bookmarks;
mod cli;
mod config;
mod semantic;
mod storage;
#[cfg(test)]
mod tests;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_logging();

    let args = cli::Args::parse();

    let paths = app::AppPaths::resolve(args.base_path, args.bookmarks)?;
    log::debug!("resolved application paths: {paths:?}");
    let app = app::App::new(paths)?;

    match args.command {
        cli::Command::Search {
            query,
            top_k,
            lexical,
            scores,
        } => cli::handle_search(&app, query, top_k, lexical, scores),
        cli::Command::Embed { force } => cli::handle_embed(&app, force),
        cli::Command::Similarity { a, b } => cli::handle_similarity(&app, &a, &b),
        cli::Command::Init {} => cli::handle_init(&app),
    }
}
