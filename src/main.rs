use amem::cli::{Cli, Commands, ConfigAction};
use amem::concepts::ConceptTree;
use amem::config::Config;
use amem::retrieval::{Filters, SearchOptions};
use amem::storage::{StorageManager, Usefulness};
use amem::workspace::WorkspaceRegistry;
use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Extensions indexed when `--extensions` is not given
const DEFAULT_EXTENSIONS: &[&str] = &[
    "md", "markdown", "txt", "rst", "adoc", "rs", "py", "js", "ts", "tsx", "go", "java", "kt",
    "c", "h", "cpp", "hpp", "cs", "rb", "sh", "toml", "yaml", "yml", "json", "html", "sql",
];

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Index {
            workspace,
            path,
            concepts,
            no_recursive,
            extensions,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_index(&config, &workspace, &path, &concepts, !no_recursive, &extensions)?;
        }
        Commands::Search {
            workspace,
            query,
            k,
            explain,
            baseline,
            no_concepts,
            recency,
            no_mmr,
            filters,
            json,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            let mut options = SearchOptions::new(k).with_filters(Filters::parse_all(&filters)?);
            if baseline {
                options = options.baseline();
            }
            if no_concepts {
                options = options.without_concepts();
            }
            if recency {
                options = options.with_recency();
            }
            if no_mmr {
                options = options.with_mmr(false);
            }
            if explain {
                options = options.explain();
            }
            cmd_search(&config, &workspace, &query, &options, json)?;
        }
        Commands::Feedback {
            workspace,
            query,
            source,
            usefulness,
            dwell,
            rank,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_feedback(&config, &workspace, &query, &source, usefulness, dwell, rank)?;
        }
        Commands::Stats { workspace, json } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_stats(&config, &workspace, json)?;
        }
        Commands::Workspaces => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_workspaces(&config)?;
        }
        Commands::ConceptPath { workspace, text } => {
            let config = load_config(cli.config, cli.profile)?;
            let (_, mut registry) = open_registry(&config)?;
            println!("{}", registry.open(&workspace)?.concept_path(&text));
        }
        Commands::Concepts { workspace, json } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_concepts(&config, &workspace, json)?;
        }
        Commands::Snapshot { workspace, output } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_snapshot(&config, &workspace, output)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "amem=debug" } else { "amem=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> anyhow::Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::debug!("Config file not found, using defaults. Run 'amem config init' to create one.");
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        return Ok(config);
    }

    let config = match profile {
        Some(profile) => Config::load_with_profile(&path, &profile)?,
        None => Config::load(&path)?,
    };
    Ok(config)
}

fn open_registry(config: &Config) -> anyhow::Result<(Arc<StorageManager>, WorkspaceRegistry)> {
    let data_dir = config.data_dir()?;
    let storage = Arc::new(
        StorageManager::new(data_dir.clone(), config.storage.compression_threshold)
            .with_context(|| format!("Failed to open storage at {}", data_dir.display()))?,
    );
    let provider = config.embedding.build()?;
    let registry = WorkspaceRegistry::new(config.engine(), Arc::new(provider), storage.clone());
    Ok((storage, registry))
}

fn cmd_index(
    config: &Config,
    workspace: &str,
    root: &Path,
    concepts: &[String],
    recursive: bool,
    extensions: &[String],
) -> anyhow::Result<()> {
    if !root.exists() {
        bail!("Path does not exist: {}", root.display());
    }

    let max_bytes = config.max_file_bytes()?;
    let extensions: Vec<String> = if extensions.is_empty() {
        DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
    } else {
        extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect()
    };

    let (_, mut registry) = open_registry(config)?;
    let ws = registry.open(workspace)?;

    let walker = WalkDir::new(root).max_depth(if recursive { usize::MAX } else { 1 });
    let (mut files, mut chunks, mut skipped) = (0usize, 0usize, 0usize);

    for entry in walker.into_iter().filter_entry(|e| e.depth() == 0 || !is_hidden(e.path())) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry: {}", e);
                skipped += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let wanted = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.contains(&e.to_ascii_lowercase()));
        if !wanted && entry.depth() > 0 {
            continue;
        }

        let metadata = entry.metadata()?;
        if metadata.len() > max_bytes {
            tracing::warn!("Skipping {} ({} bytes exceeds max_file_size)", path.display(), metadata.len());
            skipped += 1;
            continue;
        }

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path.display(), e);
                skipped += 1;
                continue;
            }
        };
        let freshness = metadata.modified().ok().map(DateTime::<Utc>::from);

        let ids = ws.add(&path.display().to_string(), &text, concepts, freshness)?;
        files += 1;
        chunks += ids.len();
    }

    println!("✓ Indexed {} files into '{}'", files, workspace);
    println!("  Chunks: {}", chunks);
    if skipped > 0 {
        println!("  Skipped: {}", skipped);
    }
    println!("  Index size: {} chunks", ws.index().len());

    Ok(())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

fn cmd_search(
    config: &Config,
    workspace: &str,
    query: &str,
    options: &SearchOptions,
    json: bool,
) -> anyhow::Result<()> {
    let (_, mut registry) = open_registry(config)?;
    let hits = registry.open(workspace)?.search(query, options)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results for '{}'", query);
        return Ok(());
    }

    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{:>2}. [{:.3}] {} (tokens {}..{})",
            rank + 1,
            hit.score,
            hit.metadata.source().url,
            hit.metadata.chunk.start,
            hit.metadata.chunk.end
        );
        if let Some(b) = &hit.explanation {
            println!(
                "    S_sem={:.3} W_learned={:.3} C_concept={:.3} R_recency={:.3}",
                b.semantic, b.learned, b.concept, b.recency
            );
        }
        println!("    {}", hit.snippet(160));
    }

    Ok(())
}

fn cmd_feedback(
    config: &Config,
    workspace: &str,
    query: &str,
    source: &str,
    usefulness: Usefulness,
    dwell_ms: u64,
    click_rank: u32,
) -> anyhow::Result<()> {
    let (_, mut registry) = open_registry(config)?;
    registry
        .open(workspace)?
        .feedback(query, source, usefulness, dwell_ms, click_rank)?;

    println!("✓ Recorded '{}' feedback for {}", usefulness, source);
    Ok(())
}

fn cmd_stats(config: &Config, workspace: &str, json: bool) -> anyhow::Result<()> {
    let (_, mut registry) = open_registry(config)?;
    let stats = registry.open(workspace)?.stats()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Workspace: {}", stats.workspace);
    println!("=========={}", "=".repeat(stats.workspace.len()));
    println!("  Embedding space: {}", stats.fingerprint);
    println!("  Items: {}", stats.feedback.total_items);
    println!("  Chunks: {}", stats.chunks);
    println!(
        "  Concepts: {} (depth {}, {} tagged sources)",
        stats.concepts, stats.concept_depth, stats.tagged_sources
    );
    println!("  Queries: {}", stats.feedback.total_queries);
    println!("  Interactions: {}", stats.feedback.total_interactions);
    if stats.feedback.total_interactions > 0 {
        println!("    Avg usefulness: {:+.2}", stats.feedback.avg_useful);
        println!("    Avg dwell: {:.0} ms", stats.feedback.avg_dwell_ms);
        println!("    Avg click rank: {:.1}", stats.feedback.avg_click_rank);
    }
    if let Some(last) = stats.feedback.last_activity {
        println!("  Last activity: {}", last.format("%Y-%m-%d %H:%M:%S"));
    }

    Ok(())
}

fn cmd_workspaces(config: &Config) -> anyhow::Result<()> {
    let (storage, registry) = open_registry(config)?;
    let names = registry.known()?;

    if names.is_empty() {
        println!("No workspaces yet. Index something with 'amem index <workspace> <path>'.");
        return Ok(());
    }

    println!("Workspaces: {}", names.len());
    for name in &names {
        println!("  {}", name);
    }

    let totals = storage.stats()?;
    println!(
        "\nTotals: {} items, {} queries, {} interactions",
        totals.item_count, totals.query_count, totals.interaction_count
    );
    Ok(())
}

fn cmd_concepts(config: &Config, workspace: &str, json: bool) -> anyhow::Result<()> {
    let (_, mut registry) = open_registry(config)?;
    let tree = registry.open(workspace)?.concept_tree();

    if json {
        println!("{}", serde_json::to_string_pretty(&tree)?);
    } else {
        print_tree(&tree, 0);
    }
    Ok(())
}

fn print_tree(node: &ConceptTree, depth: usize) {
    println!(
        "{}{} [{}, {:?}]",
        "  ".repeat(depth),
        node.label,
        node.support_docs,
        node.status
    );
    for child in &node.children {
        print_tree(child, depth + 1);
    }
}

fn cmd_snapshot(config: &Config, workspace: &str, output: Option<PathBuf>) -> anyhow::Result<()> {
    let (storage, mut registry) = open_registry(config)?;
    let path = output.unwrap_or_else(|| storage.snapshot_dir(workspace).join("index.jsonl"));

    let written = registry.open(workspace)?.snapshot(&path)?;
    println!("✓ Wrote {} index entries to {}", written, path.display());
    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, profile)?;
            let value = serde_json::to_value(&config)?;

            let shown = match section {
                Some(section) => value
                    .get(&section)
                    .cloned()
                    .with_context(|| format!("Unknown config section: {}", section))?,
                None => value,
            };
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
            println!("  Data directory: {}", config.storage.data_dir.display());
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}
