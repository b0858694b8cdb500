use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use koncert_scraper::bus::EventBus;
use koncert_scraper::config::Config;
use koncert_scraper::error::ScraperError;
use koncert_scraper::fetch::HttpPageFetcher;
use koncert_scraper::notifier::{ConsoleChannel, NotificationChannel, NotificationHandler};
use koncert_scraper::pipeline::Pipeline;
use koncert_scraper::registry::ScraperRegistry;
use koncert_scraper::storage::{JsonFileStorage, Storage};
use koncert_scraper::types::WorkflowOutcome;
use koncert_scraper::{constants, logging, matching};

#[derive(Parser)]
#[command(name = "koncert_scraper")]
#[command(about = "Concert calendar scraper and notifier for the Danish metal scene")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every due source once, persisting and notifying
    Run,
    /// Keep scraping on an interval until interrupted
    Watch {
        /// Minutes between passes
        #[arg(long, default_value_t = 60)]
        interval_minutes: u64,
    },
    /// Score the stored events against the stored preferences
    Matches,
}

fn build_channel(name: &str) -> Result<Arc<dyn NotificationChannel>, ScraperError> {
    match name {
        "console" => Ok(Arc::new(ConsoleChannel)),
        other => Err(ScraperError::Config(format!(
            "Unknown notification channel: {}",
            other
        ))),
    }
}

fn print_outcomes(outcomes: &[WorkflowOutcome]) {
    for outcome in outcomes {
        if outcome.success {
            println!(
                "✅ {}: {} scraped, {} new{}",
                outcome.source_name,
                outcome.scraped_count,
                outcome.new_count,
                if outcome.published.is_empty() {
                    String::new()
                } else {
                    format!(" (published: {})", outcome.published.join(", "))
                }
            );
        } else {
            println!(
                "❌ {}: {}",
                outcome.source_name,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

async fn run_once(pipeline: &Pipeline, cancel: &CancellationToken) {
    match pipeline.run_due_workflows(cancel).await {
        Ok(outcomes) if outcomes.is_empty() => println!("💤 No sources due"),
        Ok(outcomes) => print_outcomes(&outcomes),
        Err(e) => {
            error!("Pipeline run failed: {}", e);
            println!("❌ Pipeline run failed: {}", e);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let cli = Cli::parse();
    let mut config = Config::load_or_default(&cli.config)?;

    let sources = config.sources();
    for source in &sources {
        if !constants::supported_scrapers().contains(&source.scraper_key.as_str()) {
            warn!(
                "Source {} uses unknown scraper key '{}'; its runs will fail",
                source.id, source.scraper_key
            );
        }
    }

    let storage: Arc<dyn Storage> = Arc::new(JsonFileStorage::new(&config.data_dir, sources)?);
    let channel = build_channel(&config.notifications.channel)?;

    let bus = Arc::new(EventBus::new());
    let _handler = NotificationHandler::new(storage.clone(), channel, &bus);

    let registry = ScraperRegistry::with_builtins(Arc::new(HttpPageFetcher::new()));
    let pipeline = Pipeline::new(storage.clone(), registry, bus);

    let cancel = CancellationToken::new();
    let ctrlc = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            ctrlc.cancel();
        }
    });

    match cli.command {
        Commands::Run => {
            println!("🚀 Running due scrape workflows...");
            run_once(&pipeline, &cancel).await;
        }
        Commands::Watch { interval_minutes } => {
            println!(
                "👀 Watching; scraping due sources every {} minute(s). Ctrl-C to stop.",
                interval_minutes
            );
            loop {
                run_once(&pipeline, &cancel).await;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(interval_minutes * 60)) => {}
                }
            }
            println!("👋 Stopped");
        }
        Commands::Matches => {
            let events = storage.get_previous_events().await?;
            let prefs = storage.get_preferences().await?;
            let matches = matching::find_matches(&events, &prefs);
            if matches.is_empty() {
                println!("💤 No stored events match your preferences");
            } else {
                println!("🤘 {} stored event(s) match your preferences:", matches.len());
                for event in &matches {
                    println!(
                        "   {} | {} @ {} (score {})",
                        event.date,
                        event.bands.join(", "),
                        event.venue,
                        matching::score(event, &prefs)
                    );
                }
            }
        }
    }

    Ok(())
}
