//! LexRAG CLI
//!
//! Ask questions, chat, and manage the session store and semantic cache.

use clap::{Parser, Subcommand};
use console::{style, Term};
use dialoguer::{theme::ColorfulTheme, Confirm, Input};
use lexrag::config::{
    apply_env_overrides, config_path, load_config, load_config_from_path, save_config,
    validate_config, LogConfig, LogFormat, StorageBackendType,
};
use lexrag::core::{Citation, Role};
use lexrag::database::{init_pool_for_migrations, migrations};
use lexrag::{
    open_stores, Config, Degradation, Error, PipelineRequest, PipelineResponse, Result,
    RetrievalPipeline, VERSION,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "lexrag",
    version = VERSION,
    about = "LexRAG - Retrieval pipeline for Vietnamese traffic-law questions",
    long_about = None
)]
struct Cli {
    /// Configuration file (JSON5 or TOML)
    #[arg(long, short, global = true, env = "LEXRAG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question
    Ask {
        /// The question
        question: String,
        /// Session to continue
        #[arg(long, short)]
        session: Option<String>,
        /// User identity for cross-session recall
        #[arg(long, short)]
        user: Option<String>,
        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Interactive conversation
    Chat {
        /// Session to continue
        #[arg(long, short)]
        session: Option<String>,
        /// User identity for cross-session recall
        #[arg(long, short)]
        user: Option<String>,
    },

    /// Run database migrations
    Migrate,

    /// Flag cached answers citing a changed document as stale
    Invalidate {
        /// Citation, e.g. "NĐ 100/2019" or "Nghị định 100/2019/NĐ-CP Điều 6"
        citation: String,
    },

    /// Show semantic cache statistics
    CacheStats,

    /// Remove every semantic cache entry
    CacheClear {
        /// Skip confirmation
        #[arg(long, short)]
        yes: bool,
    },

    /// Print a session's turns
    History {
        /// Session identifier
        session: String,
    },

    /// Archive sessions idle longer than memory.archive_after
    Archive,

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
    /// Check the configuration for problems
    Validate,
    /// Print the effective configuration (secrets omitted)
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load(cli.config.as_ref())?;
    init_tracing(&config.log);

    match cli.command {
        Commands::Ask {
            question,
            session,
            user,
            json,
        } => ask(&config, question, session, user, json).await,
        Commands::Chat { session, user } => chat(&config, session, user).await,
        Commands::Migrate => run_migrations(&config).await,
        Commands::Invalidate { citation } => invalidate(&config, &citation).await,
        Commands::CacheStats => cache_stats(&config).await,
        Commands::CacheClear { yes } => cache_clear(&config, yes).await,
        Commands::History { session } => history(&config, &session).await,
        Commands::Archive => archive(&config).await,
        Commands::Config { action } => manage_config(cli.config.as_ref(), &config, action),
    }
}

fn load(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            let mut config = load_config_from_path(path)?;
            apply_env_overrides(&mut config);
            Ok(config)
        }
        None => load_config(),
    }
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

fn theme() -> ColorfulTheme {
    ColorfulTheme::default()
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Warn that in-process stores start empty on every invocation
fn note_ephemeral(config: &Config) {
    if config.storage.backend == StorageBackendType::Memory {
        println!(
            "   {} storage.backend is 'memory': nothing persists between runs.",
            style("⚠").yellow()
        );
    }
}

// ============================================================================
// Questions
// ============================================================================

async fn ask(
    config: &Config,
    question: String,
    session: Option<String>,
    user: Option<String>,
    json: bool,
) -> Result<()> {
    let pipeline = RetrievalPipeline::from_config(config).await?;
    let mut request = PipelineRequest::new(session.unwrap_or_else(new_session_id), question);
    if let Some(user) = user {
        request = request.with_identity(user);
    }

    let response = pipeline.handle(request).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }
    Ok(())
}

async fn chat(config: &Config, session: Option<String>, user: Option<String>) -> Result<()> {
    let pipeline = RetrievalPipeline::from_config(config).await?;
    let mut session_id = session.unwrap_or_else(new_session_id);

    println!();
    println!("{}", style("╔══════════════════════════════════════════════════╗").cyan());
    println!("{}", style("║            ⚖  LexRAG - Luật giao thông           ║").cyan());
    println!("{}", style("╚══════════════════════════════════════════════════╝").cyan());
    println!();
    println!("   Session: {}", style(&session_id).dim());
    println!(
        "   Sources: {}",
        pipeline
            .sources()
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    );
    print_chat_help();

    loop {
        let input: String = Input::with_theme(&theme())
            .with_prompt(style("Bạn").green().bold().to_string())
            .allow_empty(true)
            .interact_text()
            .map_err(|e| Error::Config(format!("Input error: {}", e)))?;
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if input.starts_with('/') {
            match input.to_lowercase().as_str() {
                "/quit" | "/exit" | "/q" => {
                    println!("\n{} Tạm biệt!\n", style("👋").bold());
                    break;
                }
                "/new" | "/n" => {
                    session_id = new_session_id();
                    let _ = Term::stdout().clear_screen();
                    println!("\n   {} New session {}\n", style("✓").green(), style(&session_id).dim());
                }
                "/history" => {
                    print_history(&pipeline, &session_id).await?;
                }
                "/help" | "/h" | "/?" => print_chat_help(),
                _ => println!(
                    "   {} Unknown command. Type {} for help.\n",
                    style("⚠").yellow(),
                    style("/help").cyan()
                ),
            }
            continue;
        }

        let mut request = PipelineRequest::new(session_id.clone(), input);
        if let Some(ref user) = user {
            request = request.with_identity(user.clone());
        }

        match pipeline.handle(request).await {
            Ok(response) => print_response(&response),
            Err(e) => println!("\n   {} {}\n", style("✗").red(), e),
        }
    }

    Ok(())
}

fn print_chat_help() {
    println!();
    println!("   {}", style("Commands:").dim());
    println!("   {}     - Exit chat", style("/quit").yellow());
    println!("   {}      - Start a new session", style("/new").yellow());
    println!("   {}  - Show this session's turns", style("/history").yellow());
    println!("   {}     - Show this help", style("/help").yellow());
    println!();
}

fn print_response(response: &PipelineResponse) {
    println!();
    println!("{}", response.answer);
    println!();

    if !response.citations.is_empty() {
        println!("   {}", style("Căn cứ:").cyan().bold());
        for citation in &response.citations {
            println!("   - {}", citation);
        }
    }

    let confidence = if response.cached {
        style("cached".to_string()).blue()
    } else if response.confident {
        style(format!("confident ({:.2})", response.top_score.unwrap_or_default())).green()
    } else {
        style("low confidence".to_string()).yellow()
    };
    println!(
        "   {} {} · {} · {} ms",
        style("●").dim(),
        response.class,
        confidence,
        response.elapsed_ms
    );

    for degradation in &response.degradations {
        println!("   {} {}", style("⚠").yellow(), describe(degradation));
    }
    println!();
}

fn describe(degradation: &Degradation) -> String {
    match degradation {
        Degradation::AdapterUnavailable { source, reason } => format!("{} unavailable: {}", source, reason),
        Degradation::AdapterTimeout { source } => format!("{} timed out", source),
        Degradation::AllSourcesExhausted => "no source returned passages".to_string(),
        Degradation::AmbiguousContext { candidates } => {
            format!("ambiguous reference: {}", candidates.join(", "))
        }
        Degradation::CacheUnavailable { reason } => format!("cache skipped: {}", reason),
        Degradation::ClassificationUnavailable { reason } => {
            format!("classifier unavailable: {}", reason)
        }
        Degradation::GeneratorUnavailable { reason } => format!("generator unavailable: {}", reason),
        Degradation::RequestTimeout => "request deadline reached".to_string(),
    }
}

// ============================================================================
// Store management
// ============================================================================

async fn run_migrations(config: &Config) -> Result<()> {
    println!("Running database migrations...\n");

    let postgres = config
        .storage
        .postgres
        .as_ref()
        .ok_or_else(|| Error::Config("PostgreSQL not configured for migrations".into()))?;
    // Skip the pgvector check: the migrations create the extension
    let pool = init_pool_for_migrations(postgres).await?;
    migrations::run(&pool, config.embedding.dimensions).await?;

    println!("\n✅ Migrations complete!");
    Ok(())
}

async fn invalidate(config: &Config, raw: &str) -> Result<()> {
    let citation = Citation::parse(raw);
    if citation.is_empty() {
        return Err(Error::InvalidInput(format!("Not a recognizable citation: {}", raw)));
    }
    note_ephemeral(config);

    let (_, cache) = open_stores(config).await?;
    let count = cache.invalidate(&citation).await?;
    info!("Invalidated {} entries for {}", count, citation);
    println!(
        "   {} {} cached answers citing {} marked stale",
        style("✓").green(),
        count,
        style(citation.to_string()).cyan()
    );
    Ok(())
}

async fn cache_stats(config: &Config) -> Result<()> {
    note_ephemeral(config);
    let (_, cache) = open_stores(config).await?;
    let stats = cache.stats().await?;

    println!();
    println!("   {}", style("Semantic cache").cyan().bold());
    println!("   Entries:     {}", stats.total_entries);
    println!("   Stale:       {}", stats.stale_entries);
    println!("   Hits:        {}", stats.total_hits);
    println!("   Efficiency:  {:.2} hits/entry", stats.efficiency());
    if let Some(query) = stats.most_hit {
        println!("   Most served: {}", query);
    }
    println!();
    Ok(())
}

async fn cache_clear(config: &Config, yes: bool) -> Result<()> {
    let confirmed = yes
        || Confirm::with_theme(&theme())
            .with_prompt("Remove every cached answer?")
            .default(false)
            .interact()
            .map_err(|e| Error::Config(format!("Confirm error: {}", e)))?;
    if !confirmed {
        return Ok(());
    }

    let (_, cache) = open_stores(config).await?;
    cache.clear().await?;
    println!("   {} Semantic cache cleared", style("✓").green());
    Ok(())
}

async fn history(config: &Config, session_id: &str) -> Result<()> {
    note_ephemeral(config);
    let (memory, _) = open_stores(config).await?;
    let Some(session) = memory.history(session_id).await? else {
        println!("   No session {}", session_id);
        return Ok(());
    };

    println!();
    println!(
        "   {} {} · {} turns{}",
        style("Session").cyan().bold(),
        session.session_id,
        session.turns.len(),
        if session.archived { " · archived" } else { "" }
    );
    for turn in &session.turns {
        print_turn(turn.turn_index, turn.role, &turn.text, turn.timestamp);
    }
    println!();
    Ok(())
}

async fn print_history(pipeline: &RetrievalPipeline, session_id: &str) -> Result<()> {
    match pipeline.memory().history(session_id).await? {
        Some(session) => {
            println!();
            for turn in &session.turns {
                print_turn(turn.turn_index, turn.role, &turn.text, turn.timestamp);
            }
            println!();
        }
        None => println!("\n   (empty session)\n"),
    }
    Ok(())
}

fn print_turn(index: u64, role: Role, text: &str, at: chrono::DateTime<chrono::Utc>) {
    let speaker = match role {
        Role::User => style("user").green(),
        Role::Assistant => style("assistant").blue(),
    };
    let preview: String = text.lines().next().unwrap_or_default().chars().take(100).collect();
    println!(
        "   [{}] {} {} {}",
        index,
        style(at.format("%Y-%m-%d %H:%M").to_string()).dim(),
        speaker,
        preview
    );
}

async fn archive(config: &Config) -> Result<()> {
    let (memory, _) = open_stores(config).await?;
    let archived = memory.archive_inactive().await?;
    println!("   {} {} sessions archived", style("✓").green(), archived);
    Ok(())
}

// ============================================================================
// Configuration
// ============================================================================

fn manage_config(path: Option<&PathBuf>, config: &Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Init { force } => {
            let path = path.cloned().unwrap_or_else(config_path);
            if path.exists() && !force {
                return Err(Error::Config(format!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                )));
            }
            save_config(&Config::default(), &path)?;
            println!("   {} Wrote {}", style("✓").green(), path.display());
            Ok(())
        }
        ConfigAction::Validate => {
            let result = validate_config(config);
            for issue in &result.errors {
                println!("   {} {}: {}", style("✗").red(), issue.path, issue.message);
                if let Some(ref suggestion) = issue.suggestion {
                    println!("     {}", style(suggestion).dim());
                }
            }
            for issue in &result.warnings {
                println!("   {} {}: {}", style("⚠").yellow(), issue.path, issue.message);
                if let Some(ref suggestion) = issue.suggestion {
                    println!("     {}", style(suggestion).dim());
                }
            }
            if result.valid {
                println!("   {} Configuration is valid", style("✓").green());
                Ok(())
            } else {
                Err(Error::Config(format!("{} configuration errors", result.errors.len())))
            }
        }
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
            Ok(())
        }
    }
}
