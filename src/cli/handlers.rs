use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

use crate::app::App;
use crate::semantic::{fallback_search, SearchStrategy};

pub fn handle_search(
    app: &App,
    query: String,
    top_k: Option<usize>,
    lexical: bool,
    scores: bool,
) -> Result<()> {
    let top_k = top_k.unwrap_or(app.config.semantic_search.top_k);
    let bmarks = app.load_bookmarks()?;

    if lexical {
        let results = fallback_search(&query, &bmarks, top_k);
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    let outcome = app.engine.search_hits(&query, &bmarks, top_k);

    if outcome.strategy == SearchStrategy::Lexical {
        log::warn!("embedding model unavailable, results are substring matches");
    }

    if scores {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&outcome.into_bookmarks())?);
    }

    Ok(())
}

pub fn handle_embed(app: &App, force: bool) -> Result<()> {
    let bmarks = app.load_bookmarks()?;
    let total = bmarks.len();

    let pending: Vec<_> = if force {
        bmarks
    } else {
        bmarks
            .into_iter()
            .filter(|b| b.cached_embedding().is_none())
            .collect()
    };

    if pending.is_empty() {
        println!("All {total} bookmarks are already embedded");
        return Ok(());
    }

    if !app.engine.initialize() {
        bail!("embedding model is not available, check semantic_search in config.yaml");
    }

    let pb = ProgressBar::new(pending.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} [{elapsed_precise}] {msg}")?,
    );

    let embedded = app
        .engine
        .batch_embed_with_progress(&pending, |processed, _| pb.set_position(processed as u64));

    pb.finish_and_clear();

    println!(
        "{} embedded, {} failed, {} already cached",
        embedded.len(),
        pending.len() - embedded.len(),
        total - pending.len()
    );

    Ok(())
}

pub fn handle_similarity(app: &App, a: &str, b: &str) -> Result<()> {
    let emb_a = app.engine.embed(a)?;
    let emb_b = app.engine.embed(b)?;
    let similarity = app.engine.cosine_similarity(&emb_a, &emb_b)?;

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "similarity": similarity }))?
    );

    Ok(())
}

pub fn handle_init(app: &App) -> Result<()> {
    if !app.config.semantic_search.enabled {
        println!("Semantic search is disabled; searches use substring matching");
        return Ok(());
    }

    if app.engine.initialize() {
        println!("Model '{}' is ready", app.config.semantic_search.model);
        Ok(())
    } else {
        bail!(
            "failed to load model '{}'; searches will use substring matching",
            app.config.semantic_search.model
        )
    }
}
