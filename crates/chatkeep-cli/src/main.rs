mod warning_collector;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use chatkeep_core::formatting::FormatPipeline;
use chatkeep_core::models::{Conversation, HistoryKind, Message};
use chatkeep_core::parsing;
use chatkeep_core::repositories::{
    FileMediaRepository, HistoryJsonRepository, HistoryRepository, MediaRepository,
};
use chatkeep_core::services::{
    HistoryCoordinator, ProcessResult, StreamEvent, StreamProcessor, fingerprint,
};
use chatkeep_core::settings::{CoreSettings, SettingsJsonRepository, SettingsRepository};

use warning_collector::WarningCollectorLayer;

#[derive(Parser)]
#[command(name = "chatkeep", version, about = "Replay, correct and persist chat streams")]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// History directory (overrides the settings file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Feed a JSONL event log through the stream processor and print the message
    Replay {
        events: PathBuf,
        /// User prompt that started the stream
        #[arg(long)]
        prompt: Option<String>,
        /// Persist the resulting conversation
        #[arg(long)]
        save: bool,
        #[arg(long, value_enum, default_value_t = KindArg::Text)]
        kind: KindArg,
    },
    /// Run the format correction stages over a file
    Correct { file: PathBuf },
    /// Print the content blocks of a file as JSON
    Parse { file: PathBuf },
    /// Inspect or maintain stored history
    History {
        #[command(subcommand)]
        action: HistoryAction,
        #[arg(long, value_enum, default_value_t = KindArg::Text, global = true)]
        kind: KindArg,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    List,
    /// Remove duplicate conversations and assign missing ids
    Dedup,
    Clear,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Text,
    ImageGeneration,
}

impl From<KindArg> for HistoryKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Text => HistoryKind::Text,
            KindArg::ImageGeneration => HistoryKind::ImageGeneration,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let collector = WarningCollectorLayer::default();
    let warnings = collector.clone();
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(collector)
        .init();

    let settings = load_settings(cli.config.as_deref()).await?;
    let data_dir = resolve_data_dir(cli.data_dir, &settings)?;
    debug!(data_dir = %data_dir.display(), "Using history directory");

    match cli.command {
        Command::Replay {
            events,
            prompt,
            save,
            kind,
        } => replay(&events, prompt, save.then_some(kind.into()), &settings, &data_dir).await?,
        Command::Correct { file } => {
            let text = read_text(&file).await?;
            let pipeline = FormatPipeline::new(settings.correction.clone());
            println!("{}", pipeline.finalize_text(&text));
        }
        Command::Parse { file } => {
            let text = read_text(&file).await?;
            let blocks = parsing::parse(&text);
            println!("{}", serde_json::to_string_pretty(&blocks)?);
        }
        Command::History { action, kind } => {
            history(action, kind.into(), &settings, &data_dir).await?;
        }
    }

    let summary = warnings.summary();
    if !summary.is_empty() {
        info!(
            warnings = summary.warnings,
            errors = summary.errors,
            degraded_rules = ?summary.degraded_rules,
            slow_stages = ?summary.slow_stages,
            "Finished with diagnostics"
        );
    }
    Ok(())
}

async fn load_settings(path: Option<&Path>) -> Result<CoreSettings> {
    let repository = match path {
        Some(path) => SettingsJsonRepository::with_path(path),
        None => SettingsJsonRepository::new().context("Failed to locate settings")?,
    };
    repository.load().await.context("Failed to load settings")
}

fn resolve_data_dir(flag: Option<PathBuf>, settings: &CoreSettings) -> Result<PathBuf> {
    if let Some(dir) = flag.or_else(|| settings.history.data_dir.clone()) {
        return Ok(dir);
    }
    let repository = HistoryJsonRepository::new().context("Failed to locate data directory")?;
    Ok(repository.data_dir().to_path_buf())
}

async fn read_text(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

fn coordinator(
    kind: HistoryKind,
    settings: &CoreSettings,
    data_dir: &Path,
) -> Result<(HistoryCoordinator, Arc<HistoryJsonRepository>)> {
    let repository = Arc::new(HistoryJsonRepository::with_dir(data_dir));
    let media: Arc<dyn MediaRepository> =
        Arc::new(FileMediaRepository::with_dir(data_dir.join("media")));
    let history =
        HistoryCoordinator::new(kind, repository.clone(), Some(media), &settings.history)?;
    Ok((history, repository))
}

async fn replay(
    events: &Path,
    prompt: Option<String>,
    save: Option<HistoryKind>,
    settings: &CoreSettings,
    data_dir: &Path,
) -> Result<()> {
    let log = read_text(events).await?;
    let pipeline = Arc::new(FormatPipeline::new(settings.correction.clone()));
    let processor = StreamProcessor::new(pipeline.clone());

    let placeholder = Message::ai_placeholder();
    let session_id = uuid::Uuid::new_v4().to_string();
    processor.initialize(session_id, placeholder.id.clone());

    for (index, line) in log.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event: StreamEvent = serde_json::from_str(line)
            .with_context(|| format!("Invalid event on line {}", index + 1))?;

        match processor.process_event(event, &placeholder.id) {
            ProcessResult::Cancelled => {
                warn!(line = index + 1, "Stream cancelled, stopping replay");
                break;
            }
            ProcessResult::Error(reason) => bail!("Replay failed on line {}: {reason}", index + 1),
            ProcessResult::StreamComplete => debug!(line = index + 1, "Stream complete"),
            other => debug!(line = index + 1, result = ?other, "Event processed"),
        }
    }

    let message_id = placeholder.id.clone();
    let message = match processor.finalize(placeholder) {
        Ok(message) => message,
        Err(e) => {
            warn!(message_id = %message_id, error = %e, "Finalize failed");
            Message::error(message_id.as_str(), e.to_string())
        }
    };

    println!("{}", serde_json::to_string_pretty(&message)?);
    let metrics = pipeline.metrics();
    info!(
        chunks = metrics.processed_chunks,
        cache_hits = metrics.cache_hits,
        slow_calls = metrics.slow_calls,
        "Correction metrics"
    );

    if let Some(kind) = save {
        let (history, _) = coordinator(kind, settings, data_dir)?;
        let mut conversation = Conversation::new();
        if let Some(prompt) = prompt {
            conversation.push(Message::user(prompt));
        }
        conversation.push(message);
        history.save_now(conversation);
        history.flush().await;
    }
    Ok(())
}

async fn history(
    action: HistoryAction,
    kind: HistoryKind,
    settings: &CoreSettings,
    data_dir: &Path,
) -> Result<()> {
    let (history, repository) = coordinator(kind, settings, data_dir)?;

    match action {
        HistoryAction::List => {
            for conversation in history.load().await.context("Failed to load history")? {
                let title = conversation
                    .identity_messages()
                    .next()
                    .map(|m| m.text.lines().next().unwrap_or_default().to_string())
                    .unwrap_or_default();
                println!(
                    "{}\t{}\t{}",
                    conversation.id,
                    conversation.messages.len(),
                    title
                );
            }
        }
        HistoryAction::Dedup => {
            let raw = repository
                .load_conversations(kind)
                .await
                .context("Failed to read stored history")?;
            let missing_ids = raw.iter().filter(|c| c.id.trim().is_empty()).count();
            let cleaned = history.load().await.context("Failed to load history")?;
            let empty = cleaned.iter().filter(|c| fingerprint(c).is_empty()).count();
            println!(
                "{} stored, {} kept, {} duplicates removed, {} ids assigned, {} empty",
                raw.len(),
                cleaned.len(),
                raw.len() - cleaned.len(),
                missing_ids,
                empty
            );
        }
        HistoryAction::Clear => {
            history.clear_history().await;
            history
                .clear_last_open_chat()
                .await
                .context("Failed to clear last open chat")?;
            println!("{} history cleared", kind.as_str());
        }
    }
    Ok(())
}
