//! newsidx: build and query the news corpus indexes.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use newscrawl_index::index::format::read_header;
use newscrawl_index::storage::read_geomap;
use newscrawl_index::{
    telemetry, ArticleStore, BuildManifest, BuildOptions, HttpEmbedder, IndexBuilder,
    PipelineConfig, Precision, Searcher,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "newsidx")]
#[command(about = "Multi-precision semantic search over a news corpus", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(long, short, global = true, env = "NEWSIDX_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database (overrides config)
    #[arg(long, global = true, env = "NEWSIDX_DB")]
    db: Option<PathBuf>,

    /// Index directory (overrides config)
    #[arg(long, global = true, env = "NEWSIDX_INDEX_DIR")]
    index_dir: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database tables and index directory
    Init {
        /// Also write the effective configuration to this file
        #[arg(long)]
        write_config: Option<PathBuf>,
    },

    /// Load articles (JSON lines) and optionally a geomap (CSV)
    Ingest {
        /// Article records, one JSON object per line
        #[arg(long)]
        articles: PathBuf,

        /// Geomap with loc_normal, latitude, longitude, NUTS, GEN columns
        #[arg(long)]
        geomap: Option<PathBuf>,
    },

    /// Embed all articles and build the three indexes
    Build {
        /// Fit new calibration ranges instead of reusing the saved ones
        #[arg(long)]
        recalibrate: bool,
    },

    /// Semantic search
    Search {
        /// Query text
        query: String,

        /// Index to search (f32, int8, binary)
        #[arg(long, default_value = "int8")]
        precision: Precision,

        /// Number of results (default from config)
        #[arg(long)]
        top_k: Option<usize>,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Show store, index, and build statistics
    Stats,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = PipelineConfig::load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(db) = cli.db {
        config.database.path = db;
    }
    if let Some(dir) = cli.index_dir {
        config.index.dir = dir;
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    telemetry::init(&config.logging);

    match cli.command {
        Commands::Init { write_config } => init(&config, write_config),
        Commands::Ingest { articles, geomap } => ingest(&config, articles, geomap),
        Commands::Build { recalibrate } => build(&config, recalibrate).await,
        Commands::Search {
            query,
            precision,
            top_k,
            format,
        } => search(&config, &query, precision, top_k.unwrap_or(config.index.top_k), format).await,
        Commands::Stats => stats(&config),
    }
}

fn open_store(config: &PipelineConfig) -> Result<ArticleStore> {
    ArticleStore::open(&config.database.path)
        .with_context(|| format!("failed to open {}", config.database.path.display()))
}

fn init(config: &PipelineConfig, write_config: Option<PathBuf>) -> Result<()> {
    println!("{}", "Initializing...".cyan());
    open_store(config)?;
    std::fs::create_dir_all(&config.index.dir)
        .with_context(|| format!("failed to create {}", config.index.dir.display()))?;

    if let Some(path) = write_config {
        std::fs::write(&path, config.to_yaml()?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("{} Config written: {}", "✓".green(), path.display());
    }

    println!("{} Database: {}", "✓".green(), config.database.path.display());
    println!("{} Index directory: {}", "✓".green(), config.index.dir.display());
    Ok(())
}

fn ingest(config: &PipelineConfig, articles: PathBuf, geomap: Option<PathBuf>) -> Result<()> {
    let store = open_store(config)?;

    if let Some(path) = geomap {
        println!("{} Loading geomap {}", "→".cyan(), path.display());
        let locations = read_geomap(&path)?;
        let inserted = store.insert_locations(&locations)?;
        println!("{} {} locations ({} new)", "✓".green(), locations.len(), inserted);
    }

    println!("{} Ingesting {}", "→".cyan(), articles.display());
    let report = store
        .ingest_jsonl(&articles, config.database.batch_size)
        .with_context(|| format!("failed to ingest {}", articles.display()))?;
    println!(
        "{} {} articles, {} new key mappings, {} location links",
        "✓".green(),
        report.articles,
        report.key_mappings,
        report.location_links
    );
    Ok(())
}

async fn build(config: &PipelineConfig, recalibrate: bool) -> Result<()> {
    let store = open_store(config)?;
    let embedder = HttpEmbedder::from_config(&config.embedding)?;

    println!("{} Building indexes in {}", "→".cyan(), config.index.dir.display());
    let report = IndexBuilder::new(config)
        .run(&store, &embedder, BuildOptions { recalibrate })
        .await
        .context("index build failed")?;

    for entry in &report.manifest.indexes {
        println!(
            "{} {:<7} {} vectors, dim {}{}",
            "✓".green(),
            entry.precision.to_string(),
            entry.vectors,
            entry.dim,
            if entry.has_graph { ", graph" } else { "" }
        );
    }
    println!(
        "{} calibration {} ({})",
        "✓".green(),
        if report.manifest.calibration_fitted { "fitted" } else { "reused" },
        &report.manifest.calibration_blake3[..16]
    );
    println!(
        "   {}",
        format!("{} articles in {} ms", report.manifest.articles, report.elapsed_ms).dimmed()
    );
    Ok(())
}

async fn search(
    config: &PipelineConfig,
    query: &str,
    precision: Precision,
    top_k: usize,
    format: OutputFormat,
) -> Result<()> {
    let store = Arc::new(open_store(config)?);
    let embedder = Arc::new(HttpEmbedder::from_config(&config.embedding)?);
    let searcher = Searcher::open(config, embedder, store);

    let hits = searcher.search(query, precision, top_k).await?;

    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    println!("{} Searching {} index for: {}", "→".cyan(), precision, query.bright_white());
    if hits.is_empty() {
        println!("{}", "No results found".yellow());
        return Ok(());
    }

    println!("\n{} Found {} results:\n", "✓".green(), hits.len());
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. {} {}",
            (i + 1).to_string().cyan().bold(),
            hit.title.as_deref().unwrap_or("Untitled"),
            format!("(distance: {:.3})", hit.distance).dimmed()
        );
        println!(
            "   {} {}",
            hit.hostname.as_deref().unwrap_or("-"),
            hit.date_crawled.as_deref().unwrap_or("").dimmed()
        );
        if let Some(text) = hit.text.as_deref() {
            println!("   {}\n", preview(text, 200).dimmed());
        }
    }
    Ok(())
}

fn stats(config: &PipelineConfig) -> Result<()> {
    let store = open_store(config)?;
    let counts = store.stats()?;

    println!("{}", "Store:".cyan().bold());
    println!("  articles:          {}", counts.articles);
    println!("  key mappings:      {}", counts.article_vectors);
    println!("  locations:         {}", counts.locations);
    println!("  location links:    {}", counts.article_locations);

    println!("\n{}", "Indexes:".cyan().bold());
    for precision in Precision::ALL {
        let path = config.index_path(precision);
        match read_header(&path) {
            Ok(header) => println!(
                "  {} {:<7} {} vectors, dim {}, {}{}",
                "•".green(),
                precision.to_string(),
                header.count,
                header.dim,
                header.metric,
                if header.has_graph { ", graph" } else { "" }
            ),
            Err(err) => println!("  {} {:<7} {}", "•".red(), precision.to_string(), err),
        }
    }

    match BuildManifest::load(config.manifest_path()) {
        Ok(manifest) => {
            println!("\n{}", "Last build:".cyan().bold());
            println!("  built at:    {}", manifest.built_at.to_rfc3339());
            println!("  model:       {}", manifest.model);
            println!("  calibration: {}", manifest.calibration_blake3);
        }
        Err(_) => println!("\n{}", "No build manifest found".yellow()),
    }
    Ok(())
}

/// First `max_chars` characters of `text`, respecting char boundaries.
fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
