pub mod actions;
pub mod atom;
pub mod common;
pub mod errors;
pub mod feed;
pub mod feed_source;
pub mod http;
pub mod llm;
pub mod ranker;
pub mod reporter;
pub mod secrets;
pub mod store;
pub mod summary;
pub mod summary_parser;
pub mod utils;

use crate::actions::Interactions;
use crate::common::{Paper, RankedPaper, SortBy, SortOrder, SummaryLength, UserPreference};
use crate::errors::{ErrorClass, FeedError, LlmError, StoreError, SummaryError};
use crate::feed::{FeedConfig, FeedController, LoadOutcome};
use crate::feed_source::{FeedSource, ARXIV_API_URL};
use crate::http::ReqwestTransport;
use crate::llm::provider::Provider;
use crate::llm::LlmGateway;
use crate::ranker::RelevanceRanker;
use crate::reporter::Reporter;
use crate::secrets::{FileSecretsStore, LlmConfig, SecretsStore};
use crate::store::{LocalStore, PaperStore};
use crate::summary::SummaryPipeline;
use crate::utils::{parse_categories, s};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

// CLI SETTINGS ---------------------------------------------------------------
/// Command-line interface
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Sets a custom config file: "config.toml"
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose mode
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the ranked feed for the selected categories
    Feed(FeedArgs),
    /// Generate the AI summary of a paper
    Summarize(SummarizeArgs),
    /// Translate the title of a paper into Chinese
    #[command(name = "translate-title")]
    TranslateTitle(PaperArgs),
    /// Show a stored paper and its summary
    Show(PaperArgs),
    /// Show or change the feed preference
    Preferences(PreferenceArgs),
    /// Toggle the favorite flag of a paper
    Favorite(PaperArgs),
    /// Mark a paper as read
    Read(PaperArgs),
    /// Mark a paper as skipped
    Skip(PaperArgs),
    /// Record time spent on a paper
    Dwell(DwellArgs),
    /// Save the LLM provider configuration
    #[command(name = "configure-llm")]
    ConfigureLlm(ConfigureLlmArgs),
    /// Check that the configured LLM provider answers
    #[command(name = "test-connection")]
    TestConnection,
    /// Delete the saved LLM provider configuration
    #[command(name = "forget-llm")]
    ForgetLlm,
}

#[derive(Debug, Args)]
struct FeedArgs {
    /// Number of pages to load
    #[arg(long, default_value_t = 1)]
    pages: usize,
    /// Reading position used for summary prefetch (0-based)
    #[arg(long, default_value_t = 0)]
    position: usize,
    /// Show the score breakdown of each paper
    #[arg(long)]
    scores: bool,
    /// Do not prefetch summaries
    #[arg(long)]
    no_prefetch: bool,
}

#[derive(Debug, Args)]
struct PaperArgs {
    /// arXiv ID without version: "2401.12345"
    arxiv_id: String,
}

#[derive(Debug, Args)]
struct SummarizeArgs {
    /// arXiv ID without version: "2401.12345"
    arxiv_id: String,
    /// Discard the stored summary and generate it again
    #[arg(long)]
    regenerate: bool,
}

#[derive(Debug, Args)]
struct DwellArgs {
    /// arXiv ID without version: "2401.12345"
    arxiv_id: String,
    /// Seconds spent on the paper
    seconds: f64,
}

#[derive(Debug, Args)]
struct PreferenceArgs {
    /// Categories to follow: "cs.AI,cs.LG"
    #[arg(long)]
    categories: Option<String>,
    #[arg(long, value_enum)]
    sort_by: Option<SortBy>,
    #[arg(long, value_enum)]
    sort_order: Option<SortOrder>,
    #[arg(long, value_enum)]
    summary_length: Option<SummaryLength>,
    /// Remove the preference entirely
    #[arg(long, conflicts_with_all = ["categories", "sort_by", "sort_order", "summary_length"])]
    clear: bool,
}

#[derive(Debug, Args)]
struct ConfigureLlmArgs {
    #[arg(long, value_enum)]
    provider: Provider,
    #[arg(long)]
    api_key: String,
    /// Provider default when omitted
    #[arg(long)]
    base_url: Option<String>,
    /// Provider default when omitted
    #[arg(long)]
    model: Option<String>,
    /// API version header, anthropic only
    #[arg(long)]
    api_version: Option<String>,
}

// CONFIGURATION SETTINGS -----------------------------------------------------

/// Configuration settings
#[derive(Serialize, Deserialize, Debug, Default)]
struct Config {
    /// Directory of the local paper store: ".cache"
    #[serde(rename = "CACHE_DIR", default = "String::new")]
    cache_dir: String,
    /// Directory of the LLM provider configuration: "{CACHE_DIR}/secrets"
    #[serde(rename = "SECRETS_DIR", default = "String::new")]
    secrets_dir: String,
    #[serde(rename = "ARXIV_API_URL", default = "String::new")]
    arxiv_api_url: String,
    #[serde(rename = "PAGE_SIZE", default)]
    page_size: Option<usize>,
    #[serde(rename = "PRELOAD_COUNT", default)]
    preload_count: Option<usize>,
    #[serde(rename = "PREFETCH_THRESHOLD", default)]
    prefetch_threshold: Option<usize>,
}

impl Config {
    pub fn load(path: &PathBuf) -> Result<Self> {
        let config = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&config)?;
        Ok(config)
    }

    /// Set environment variables for every configured key
    pub fn set_env(&self) {
        let strings = [
            ("CACHE_DIR", &self.cache_dir),
            ("SECRETS_DIR", &self.secrets_dir),
            ("ARXIV_API_URL", &self.arxiv_api_url),
        ];
        for (key, value) in strings {
            if !value.is_empty() {
                std::env::set_var(key, value);
            }
        }
        let counts = [
            ("PAGE_SIZE", self.page_size),
            ("PRELOAD_COUNT", self.preload_count),
            ("PREFETCH_THRESHOLD", self.prefetch_threshold),
        ];
        for (key, value) in counts {
            if let Some(value) = value {
                std::env::set_var(key, value.to_string());
            }
        }
    }
}

/// Settings resolved from the environment, defaults filled in.
#[derive(Debug, Clone, PartialEq)]
struct Settings {
    cache_dir: PathBuf,
    secrets_dir: PathBuf,
    arxiv_api_url: String,
    feed: FeedConfig,
}

impl Settings {
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let cache_dir = PathBuf::from(value("CACHE_DIR").unwrap_or_else(|| s(".cache")));
        let secrets_dir = value("SECRETS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| cache_dir.join("secrets"));
        let arxiv_api_url = value("ARXIV_API_URL").unwrap_or_else(|| s(ARXIV_API_URL));

        let defaults = FeedConfig::default();
        let feed = FeedConfig {
            page_size: parse_count("PAGE_SIZE", value("PAGE_SIZE"), defaults.page_size)?,
            preload_count: parse_count(
                "PRELOAD_COUNT",
                value("PRELOAD_COUNT"),
                defaults.preload_count,
            )?,
            prefetch_threshold: parse_count(
                "PREFETCH_THRESHOLD",
                value("PREFETCH_THRESHOLD"),
                defaults.prefetch_threshold,
            )?,
        };

        Ok(Settings {
            cache_dir,
            secrets_dir,
            arxiv_api_url,
            feed,
        })
    }

    fn store_path(&self) -> PathBuf {
        self.cache_dir.join("papertok.json")
    }
}

fn parse_count(key: &str, value: Option<String>, default: usize) -> Result<usize> {
    let Some(value) = value else {
        return Ok(default);
    };
    let count: usize = value
        .trim()
        .parse()
        .with_context(|| format!("{} must be a positive integer, got \"{}\"", key, value))?;
    if count == 0 {
        bail!("{} must be at least 1", key);
    }
    Ok(count)
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

// APPLICATION ----------------------------------------------------------------

struct App {
    settings: Settings,
    store: Arc<LocalStore>,
    secrets: Arc<FileSecretsStore>,
    transport: Arc<ReqwestTransport>,
    summaries: SummaryPipeline,
    reporter: Reporter,
}

impl App {
    fn open(settings: Settings) -> Result<App> {
        let store = LocalStore::open(settings.store_path())
            .with_context(|| format!("Failed to open {}", settings.store_path().display()))?;
        let secrets = FileSecretsStore::new(&settings.secrets_dir);
        let transport = ReqwestTransport::new().context("Failed to build HTTP client")?;
        let store = Arc::new(store);
        let secrets = Arc::new(secrets);
        let transport = Arc::new(transport);
        let gateway = LlmGateway::new(transport.clone(), secrets.clone());
        let summaries = SummaryPipeline::new(Arc::new(gateway), store.clone());
        Ok(App {
            settings,
            store,
            secrets,
            transport,
            summaries,
            reporter: Reporter::new(),
        })
    }

    fn gateway(&self) -> LlmGateway {
        LlmGateway::new(self.transport.clone(), self.secrets.clone())
    }

    /// Shared with the feed controller so both see the same in-flight papers.
    fn summaries(&self) -> &SummaryPipeline {
        &self.summaries
    }

    fn interactions(&self) -> Interactions {
        Interactions::new(self.store.clone())
    }

    fn controller(&self) -> Arc<FeedController> {
        let source = FeedSource::new(self.transport.clone(), self.store.clone())
            .with_base_url(&self.settings.arxiv_api_url);
        Arc::new(FeedController::new(
            source,
            RelevanceRanker::new(self.store.clone()),
            self.summaries.clone(),
            self.store.clone(),
            self.settings.feed,
        ))
    }

    fn paper(&self, arxiv_id: &str) -> Result<Paper> {
        match self.store.paper(arxiv_id)? {
            Some(paper) => Ok(paper),
            None => bail!(
                "Paper {} is not in the local store. Load it with `feed` first.",
                arxiv_id
            ),
        }
    }
}

fn error_class(error: &anyhow::Error) -> Option<ErrorClass> {
    if let Some(e) = error.downcast_ref::<FeedError>() {
        return Some(e.class());
    }
    if let Some(e) = error.downcast_ref::<LlmError>() {
        return Some(e.class());
    }
    if let Some(e) = error.downcast_ref::<SummaryError>() {
        return Some(e.class());
    }
    if error.downcast_ref::<StoreError>().is_some() {
        return Some(ErrorClass::MalformedData);
    }
    None
}

// MAIN FUNCTION --------------------------------------------------------------

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Load configuration settings
    if let Some(config) = cli.config.as_ref() {
        let config = match Config::load(config) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("WARNING: Failed to load config: {}", e);
                return;
            }
        };
        config.set_env();
    } else {
        dotenv().ok();
    }

    let Some(command) = cli.command else {
        eprintln!("WARNING: No subcommand specified.");
        return;
    };

    let app = match Settings::from_env().and_then(App::open) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&app, command).await {
        match error_class(&e) {
            Some(class) => eprintln!("{}", app.reporter.render_error(class, &format!("{:#}", e))),
            None => eprintln!("ERROR: {:#}", e),
        }
        std::process::exit(1);
    }
}

async fn run(app: &App, command: Commands) -> Result<()> {
    match command {
        Commands::Feed(args) => show_feed(app, &args).await,
        Commands::Summarize(args) => summarize(app, &args).await,
        Commands::TranslateTitle(args) => {
            let paper = app.paper(&args.arxiv_id)?;
            let summary = app.summaries().translate_title(&paper).await?;
            println!("{}", summary.title_chinese.as_deref().unwrap_or("(no title)"));
            Ok(())
        }
        Commands::Show(args) => {
            let paper = app.paper(&args.arxiv_id)?;
            let summary = app.store.summary(&paper.arxiv_id)?;
            let terms = app.store.terms(&paper.arxiv_id)?;
            print!(
                "{}",
                app.reporter.render_summary(&paper, summary.as_ref(), &terms)
            );
            Ok(())
        }
        Commands::Preferences(args) => preferences(app, &args),
        Commands::Favorite(args) => {
            let favorited = app.interactions().toggle_favorite(&args.arxiv_id)?;
            if favorited {
                println!("★ {} added to favorites", args.arxiv_id);
            } else {
                println!("{} removed from favorites", args.arxiv_id);
            }
            Ok(())
        }
        Commands::Read(args) => {
            app.interactions().mark_read(&args.arxiv_id)?;
            println!("{} marked as read", args.arxiv_id);
            Ok(())
        }
        Commands::Skip(args) => {
            app.interactions().mark_skipped(&args.arxiv_id)?;
            println!("{} marked as skipped", args.arxiv_id);
            Ok(())
        }
        Commands::Dwell(args) => {
            match app.interactions().add_dwell_time(&args.arxiv_id, args.seconds)? {
                Some(action) => println!(
                    "{}: {:.0}s in total",
                    args.arxiv_id, action.dwell_time_seconds
                ),
                None => eprintln!("WARNING: Ignored invalid dwell time: {}", args.seconds),
            }
            Ok(())
        }
        Commands::ConfigureLlm(args) => configure_llm(app, args),
        Commands::TestConnection => {
            let config = app.gateway().config()?;
            println!("Testing {} ({})...", config.provider, config.model_name);
            let completion = app.gateway().test_connection().await?;
            println!(
                "Connected: {} answered with {} tokens.",
                completion.model,
                completion.usage.total()
            );
            Ok(())
        }
        Commands::ForgetLlm => {
            app.secrets.delete()?;
            println!("LLM configuration removed.");
            Ok(())
        }
    }
}

// SUBCOMMANDS ----------------------------------------------------------------

async fn show_feed(app: &App, args: &FeedArgs) -> Result<()> {
    let time = std::time::Instant::now();
    let controller = app.controller();

    if controller.load_first_page().await? == LoadOutcome::Empty {
        match app.store.preference()? {
            Some(preference) if !preference.selected_categories.is_empty() => {
                println!("No papers found for the selected categories.")
            }
            preference => print!("{}", app.reporter.render_preference(preference.as_ref())),
        }
        return Ok(());
    }
    for _ in 1..args.pages {
        if controller.load_next_page().await? == LoadOutcome::Empty {
            break;
        }
    }
    debug!(
        papers = controller.ranked_ids().len(),
        elapsed = time.elapsed().as_secs_f32(),
        "Feed loaded"
    );

    if !args.no_prefetch {
        prefetch(app, &controller, args.position).await;
    }

    let ids = controller.ranked_ids();
    let scores: FxHashMap<String, RankedPaper> = if args.scores {
        RelevanceRanker::new(app.store.clone())
            .score_at(&ids, Utc::now())?
            .into_iter()
            .map(|ranked| (ranked.arxiv_id.clone(), ranked))
            .collect()
    } else {
        FxHashMap::default()
    };

    for (index, arxiv_id) in ids.iter().enumerate() {
        let Some(paper) = app.store.paper(arxiv_id)? else {
            continue;
        };
        let summary = app.store.summary(arxiv_id)?;
        let action = app.store.user_action(arxiv_id)?;
        print!(
            "{}",
            app.reporter.render_feed_row(
                index,
                &paper,
                summary.as_ref(),
                action.as_ref(),
                scores.get(arxiv_id)
            )
        );
    }
    Ok(())
}

/// Summaries for the paper at `position` and the ones right after it.
async fn prefetch(app: &App, controller: &Arc<FeedController>, position: usize) {
    if let Err(e) = app.gateway().config() {
        eprintln!("WARNING: Skipping summary prefetch: {}", e);
        return;
    }

    let current = controller
        .ranked_ids()
        .get(position)
        .and_then(|id| app.store.paper(id).ok().flatten());
    let update = controller.on_position_changed(position);

    let total = update.prefetches.len() + usize::from(current.is_some());
    let pbar = app.reporter.get_pbar(total as u64, "Prefetching summaries...");
    if let Some(paper) = current {
        if let Err(e) = app.summaries().prefetch(&paper).await {
            warn!(arxiv_id = %paper.arxiv_id, error = %e, "Summary prefetch failed");
        }
        pbar.inc(1);
    }
    for handle in update.prefetches {
        if let Err(e) = handle.await {
            warn!(error = %e, "Prefetch task failed");
        }
        pbar.inc(1);
    }
    pbar.finish_and_clear();

    if let Some(load_more) = update.load_more {
        match load_more.await {
            Ok(Ok(outcome)) => debug!(?outcome, "Loaded more papers after prefetch"),
            Ok(Err(e)) => warn!(error = %e, "Failed to load more papers"),
            Err(e) => warn!(error = %e, "Load-more task failed"),
        }
    }
}

async fn summarize(app: &App, args: &SummarizeArgs) -> Result<()> {
    let paper = app.paper(&args.arxiv_id)?;
    let summaries = app.summaries();
    let summary = if args.regenerate {
        summaries.regenerate_summary(&paper).await?
    } else {
        summaries.generate_summary(&paper).await?
    };
    let terms = app.store.terms(&paper.arxiv_id)?;
    print!(
        "{}",
        app.reporter.render_summary(&paper, Some(&summary), &terms)
    );
    Ok(())
}

fn preferences(app: &App, args: &PreferenceArgs) -> Result<()> {
    let interactions = app.interactions();
    if args.clear {
        interactions.clear_preference()?;
        println!("Preference cleared.");
        return Ok(());
    }

    let changed = args.categories.is_some()
        || args.sort_by.is_some()
        || args.sort_order.is_some()
        || args.summary_length.is_some();
    if changed {
        let mut preference = interactions.preference()?.unwrap_or_default();
        if let Some(categories) = &args.categories {
            preference.selected_categories = parse_categories(categories);
        }
        if let Some(sort_by) = args.sort_by {
            preference.sort_by = sort_by;
        }
        if let Some(sort_order) = args.sort_order {
            preference.sort_order = sort_order;
        }
        if let Some(summary_length) = args.summary_length {
            preference.summary_length = summary_length;
        }
        interactions.set_preference(preference)?;
    }

    let preference: Option<UserPreference> = interactions.preference()?;
    print!("{}", app.reporter.render_preference(preference.as_ref()));
    Ok(())
}

fn configure_llm(app: &App, args: ConfigureLlmArgs) -> Result<()> {
    let mut config = LlmConfig::new(args.provider, &args.api_key);
    config.base_url = args.base_url;
    if let Some(model) = args.model {
        config.model_name = model;
    }
    config.api_version = args.api_version;
    app.secrets.save(&config)?;
    println!(
        "Saved {} configuration ({} at {}). Run `test-connection` to verify it.",
        config.provider,
        config.model_name,
        config.effective_base_url()
    );
    Ok(())
}

#[cfg(test)]
mod test_support;
