//! Crosspost: scheduled posting to Bluesky and Mastodon
//!
//! Main binary with subcommands:
//! - `daemon`: Reconcile missed posts, then dispatch on a periodic tick
//! - `tick`: Run a single dispatch pass and exit
//! - `schedule` / `schedule-thread`: Queue a post or a thread
//! - `pending`, `publish-pending`, `discard-pending`: Review missed posts
//! - `publish-now`, `publish-thread-now`: Dispatch immediately
//! - `history`, `states`, `retract`: Inspect and undo deliveries

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crosspost_platforms::{PlatformCredentials, build_registry};
use crosspost_scheduler::{
    BatchReport, EventNotifier, ItemId, MediaRef, NewSegment, PlatformId, Repeat, RetractOutcome,
    ScheduledItem, Scheduler, TargetPlatforms, Thread, ThreadId,
};
use crosspost_store::SqliteStore;

use config::{
    EngineArgs, parse_media, parse_platform, parse_repeat, parse_segment_media, parse_time,
    parse_weekday,
};

mod config;
mod daemon;

#[derive(Parser)]
#[command(name = "crosspost")]
#[command(about = "Scheduled posting to Bluesky and Mastodon", long_about = None)]
struct Cli {
    #[command(flatten)]
    engine: EngineArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Daemon,

    /// Run one dispatch pass over due posts and threads
    Tick {
        /// Park posts missed beyond the grace window before dispatching
        #[arg(long)]
        reconcile: bool,
    },

    /// Schedule a single post
    Schedule {
        /// Post text
        content: String,

        /// Target platforms (comma-separated)
        #[arg(long, value_delimiter = ',', value_parser = parse_platform, required = true)]
        platforms: Vec<PlatformId>,

        /// Fire time (RFC 3339). Required unless the post repeats.
        #[arg(long, value_parser = parse_time)]
        at: Option<DateTime<Utc>>,

        /// Repeat mode: none, daily, weekly or monthly
        #[arg(long, value_parser = parse_repeat, default_value = "none")]
        repeat: Repeat,

        /// Weekdays for weekly repeats (0-6 or sun..sat, comma-separated)
        #[arg(long = "weekday", value_delimiter = ',', value_parser = parse_weekday)]
        weekdays: Vec<u8>,

        /// Day of month (1-31) for monthly repeats
        #[arg(long)]
        day_of_month: Option<u32>,

        /// Image to attach as PATH[=ALT], up to four
        #[arg(long, value_parser = parse_media)]
        media: Vec<MediaRef>,
    },

    /// Schedule a thread of posts published as a reply chain
    ScheduleThread {
        /// Segment texts in publishing order
        #[arg(required = true)]
        segments: Vec<String>,

        /// Target platforms (comma-separated)
        #[arg(long, value_delimiter = ',', value_parser = parse_platform, required = true)]
        platforms: Vec<PlatformId>,

        /// Fire time (RFC 3339)
        #[arg(long, value_parser = parse_time)]
        at: DateTime<Utc>,

        /// Optional title
        #[arg(long)]
        title: Option<String>,

        /// Image to attach to a segment as SEGMENT:PATH[=ALT]
        #[arg(long, value_parser = parse_segment_media)]
        media: Vec<(usize, MediaRef)>,
    },

    /// Dispatch a post immediately
    PublishNow { id: ItemId },

    /// Dispatch a thread immediately
    PublishThreadNow { id: ThreadId },

    /// List posts awaiting manual review
    Pending,

    /// Publish a pending post once
    PublishPending { id: ItemId },

    /// Skip a pending post's missed occurrence
    DiscardPending { id: ItemId },

    /// Show the send log of a post, newest first
    History {
        id: ItemId,

        #[arg(long, default_value = "50")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Show the remote state of a post on each platform
    States { id: ItemId },

    /// Delete published copies of a post
    Retract {
        id: ItemId,

        /// Only these platforms (comma-separated); default is every target
        #[arg(long, value_delimiter = ',', value_parser = parse_platform)]
        platforms: Vec<PlatformId>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so command output stays machine-readable
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "crosspost=info,crosspost_scheduler=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let (notifier, events) = EventNotifier::channel(64);
    let scheduler = open_scheduler(&cli.engine, notifier)?;
    let now = Utc::now();

    match cli.command {
        Commands::Daemon => daemon::run(scheduler, events).await,

        Commands::Tick { reconcile } => {
            let parked = if reconcile {
                scheduler.reconcile(now).await.into_diagnostic()?
            } else {
                Vec::new()
            };
            let report = scheduler.tick_at(now).await;
            print_json(&json!({
                "parked": parked,
                "posts": batch_json(&report.posts),
                "threads": batch_json(&report.threads),
            }))
        }

        Commands::Schedule {
            content,
            platforms,
            at,
            repeat,
            weekdays,
            day_of_month,
            media,
        } => {
            let targets = TargetPlatforms::new(platforms).into_diagnostic()?;
            let mut item =
                ScheduledItem::once(0, content, targets, at.unwrap_or(now)).with_media(media);
            item.scheduled_at = at;
            item.repeat = repeat;
            item.repeat_days_of_week = weekdays.into_iter().collect();
            item.repeat_day_of_month = day_of_month;

            let item = scheduler.create_item(item, now).await.into_diagnostic()?;
            print_json(&item)
        }

        Commands::ScheduleThread {
            segments,
            platforms,
            at,
            title,
            media,
        } => {
            let targets = TargetPlatforms::new(platforms).into_diagnostic()?;
            let mut thread = Thread::scheduled(0, targets, at);
            thread.title = title;

            let mut segments: Vec<NewSegment> =
                segments.into_iter().map(NewSegment::from).collect();
            for (index, attachment) in media {
                let count = segments.len();
                let segment = segments.get_mut(index - 1).ok_or_else(|| {
                    miette::miette!(
                        "media targets segment {} but the thread has {}",
                        index,
                        count
                    )
                })?;
                segment.media.push(attachment);
            }

            let (thread, segments) = scheduler
                .create_thread(thread, segments)
                .await
                .into_diagnostic()?;
            print_json(&json!({ "thread": thread, "segments": segments }))
        }

        Commands::PublishNow { id } => {
            print_json(&scheduler.publish_now(id, now).await.into_diagnostic()?)
        }

        Commands::PublishThreadNow { id } => {
            let thread = scheduler
                .publish_thread_now(id, now)
                .await
                .into_diagnostic()?;
            print_json(&thread)
        }

        Commands::Pending => print_json(&scheduler.list_pending().await.into_diagnostic()?),

        Commands::PublishPending { id } => {
            let item = scheduler
                .publish_pending_once(id, now)
                .await
                .into_diagnostic()?;
            print_json(&item)
        }

        Commands::DiscardPending { id } => {
            print_json(&scheduler.discard_pending(id, now).await.into_diagnostic()?)
        }

        Commands::History { id, limit, offset } => {
            let entries = scheduler
                .history(id, limit, offset)
                .await
                .into_diagnostic()?;
            print_json(&entries)
        }

        Commands::States { id } => {
            print_json(&scheduler.platform_states(id).await.into_diagnostic()?)
        }

        Commands::Retract { id, platforms } => {
            let selected = (!platforms.is_empty()).then_some(platforms);
            let report = scheduler
                .retract(id, selected, now)
                .await
                .into_diagnostic()?;
            let outcomes: BTreeMap<_, _> = report
                .outcomes
                .iter()
                .map(|(platform, outcome)| (*platform, describe_retract(outcome)))
                .collect();
            print_json(&json!({ "item": report.item, "outcomes": outcomes }))
        }
    }
}

fn open_scheduler(engine: &EngineArgs, notifier: EventNotifier) -> Result<Scheduler> {
    let path = engine.database_path()?;
    let store = SqliteStore::open(&path).into_diagnostic()?;
    let platforms = build_registry(PlatformCredentials::from_env()).into_diagnostic()?;
    for platform in PlatformId::ALL {
        if let Err(e) = platforms.ready(platform) {
            debug!(%platform, error = %e, "platform not ready");
        }
    }
    info!(database = %path.display(), discard_mode = engine.discard_mode, "engine configured");

    Ok(Scheduler::new(
        Arc::new(store),
        platforms,
        engine.scheduler_config(),
        notifier,
    ))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{}", text);
    Ok(())
}

fn batch_json(report: &BatchReport) -> serde_json::Value {
    json!({
        "total": report.total,
        "succeeded": report.succeeded,
        "failed": report.failed,
    })
}

fn describe_retract(outcome: &RetractOutcome) -> String {
    match outcome {
        RetractOutcome::Deleted => "deleted".to_string(),
        RetractOutcome::NotPublished => "not_published".to_string(),
        RetractOutcome::Failed(message) => format!("failed: {}", message),
    }
}
