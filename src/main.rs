use lexembed::chunking::{HfTokenCounter, TokenCounter};
use lexembed::cli::{Cli, Commands, ConfigAction, RunArgs};
use lexembed::config::{Config, ConfigValidator};
use lexembed::embedding::{EmbeddingProvider, FastEmbedProvider, ProviderOptions};
use lexembed::error::{LexembedError, Result};
use lexembed::pipeline::{Pipeline, RunSummary, SignalHandler, StopHandle};
use lexembed::storage::{Checkpoint, OutputStore};
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    // Handle commands
    match cli.command {
        Commands::Run(args) => {
            cmd_run(cli.config, args).await?;
        }
        Commands::Status { output } => {
            cmd_status(cli.config, output)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "lexembed=debug" } else { "lexembed=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

async fn cmd_run(config_path: Option<PathBuf>, args: RunArgs) -> Result<()> {
    let mut config = load_config(config_path, args.profile.as_deref())?;
    args.apply(&mut config)?;
    ConfigValidator::validate(&config)?;

    tracing::info!("Configuration loaded successfully");

    // Model and tokenizer are loaded once and shared by the whole run
    let model_config = config.clone();
    let (counter, provider) = tokio::task::spawn_blocking(move || load_models(&model_config))
        .await
        .map_err(|e| LexembedError::Pipeline(format!("Model loading failed: {}", e)))??;

    println!(
        "✓ Loaded {} ({} dimensions)",
        provider.model_name(),
        provider.dimension()
    );

    let stop = StopHandle::new();
    let signals = SignalHandler::new()?.spawn(stop.clone());

    let pipeline = Pipeline::new(config, counter, provider).with_stop_handle(stop);
    let summary = pipeline.run().await?;
    signals.abort();

    print_summary(&summary, pipeline.config());
    Ok(())
}

fn load_models(config: &Config) -> Result<(Arc<dyn TokenCounter>, Arc<dyn EmbeddingProvider>)> {
    let options = ProviderOptions {
        cache_dir: config.embedding.cache_dir.clone(),
        show_download_progress: config.embedding.show_download_progress,
    };
    let provider = FastEmbedProvider::new(&config.embedding.model, &options)?;

    // The model repository also hosts the matching tokenizer
    let counter = match &config.chunking.tokenizer_file {
        Some(path) => HfTokenCounter::from_file(path),
        None => HfTokenCounter::from_pretrained(provider.model_name()),
    }
    .map_err(|e| LexembedError::Config(e.to_string()))?;

    let counter: Arc<dyn TokenCounter> = Arc::new(counter);
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(provider);
    Ok((counter, provider))
}

fn print_summary(summary: &RunSummary, config: &Config) {
    if summary.stopped {
        println!("✓ Run stopped early; run again to continue");
    } else {
        println!("✓ Run complete");
    }
    println!("  Output: {}", config.output.dir.display());
    println!("  Documents seen: {}", summary.documents_seen);
    println!("  Already present: {}", summary.already_present);
    println!("  Processed: {}", summary.processed);
    println!("  Chunks embedded: {}", summary.chunks_embedded);

    if summary.empty > 0 {
        println!("  Empty documents: {}", summary.empty);
    }
    if summary.duplicates > 0 {
        println!("  Duplicate ids skipped: {}", summary.duplicates);
    }
    if summary.malformed_records > 0 {
        println!("  Malformed records skipped: {}", summary.malformed_records);
    }
    if summary.failed_to_chunk > 0 {
        println!("  Documents that failed to chunk: {}", summary.failed_to_chunk);
    }
    if summary.outdated_removed > 0 {
        println!("  Outdated documents removed: {}", summary.outdated_removed);
    }
    if summary.repaired_lines > 0 {
        println!("  Interrupted lines discarded: {}", summary.repaired_lines);
    }
    println!("  Elapsed: {:.1}s", summary.elapsed.as_secs_f64());
}

fn cmd_status(config_path: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let dir = match output {
        Some(dir) => dir,
        None => load_config(config_path, None)?.output.dir,
    };

    let store = OutputStore::open_existing(&dir)?;
    let checkpoint = Checkpoint::scan(&store)?;

    println!("Output: {}", dir.display());
    match store.read_manifest()? {
        Some(manifest) => {
            println!("  Model: {} ({} dimensions)", manifest.model, manifest.dimension);
            println!("  Chunk size: {}", manifest.chunk_size);
            println!(
                "  Header: {}",
                if manifest.header_template.is_some() {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            if !manifest.created_at.is_empty() {
                println!("  Created: {}", manifest.created_at);
            }
        }
        None => println!("  No manifest found"),
    }
    println!("  Documents: {}", checkpoint.document_count());
    println!("  Chunks: {}", checkpoint.valid_lines());

    if checkpoint.is_dirty() {
        println!(
            "  Interrupted tail: {} lines, discarded on the next run",
            checkpoint.discarded_lines()
        );
    }

    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, None)?;
            let value = toml::Value::try_from(&config)?;

            let shown = match section {
                Some(section) => value.get(section.as_str()).cloned().ok_or_else(|| {
                    LexembedError::Config(format!("Unknown config section: {}", section))
                })?,
                None => value,
            };

            println!("{}", toml::to_string_pretty(&shown)?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
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

            // Create parent directory
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| LexembedError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            // Save default config
            let config = Config::default();
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<&str>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'lexembed config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(profile)?;
        }
        return Ok(config);
    }

    match profile {
        Some(profile) => Config::load_with_profile(&path, profile),
        None => Config::load(&path),
    }
}
