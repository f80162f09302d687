use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand};
use futures_util::TryStreamExt;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use botlytics_common::models::{
    EventFilter, KnownEventType, PropertyPredicate, RawEvent, StoredEvent, TimeRange,
};
use botlytics_common::traits::EventStore;
use botlytics_core::normalizer::EventNormalizer;
use botlytics_core::repositories::{InMemoryEventStore, PostgresEventStore};
use botlytics_core::services::{AggregationEngine, IngestService};
use botlytics_core::{AnalyticsConfig, Database, Error};

#[derive(Parser, Debug)]
#[command(name = "botlytics")]
#[command(author, version, about = "Botlytics - event ingestion and funnel analytics for chat bots")]
struct Args {
    /// Postgres connection URL. Falls back to DB_HOST/DB_NAME/... when unset.
    #[arg(long, global = true, env = "DATABASE_URL")]
    db_url: Option<String>,

    /// Deadline for a single aggregation, in seconds.
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Use a throwaway in-memory store instead of Postgres.
    #[arg(long, global = true, default_value = "false")]
    memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
struct RangeArgs {
    /// Inclusive lower bound (RFC 3339).
    #[arg(long)]
    since: Option<DateTime<Utc>>,

    /// Exclusive upper bound (RFC 3339).
    #[arg(long)]
    until: Option<DateTime<Utc>>,
}

impl RangeArgs {
    fn to_range(&self) -> TimeRange {
        TimeRange { start: self.since, end: self.until }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply database migrations.
    Migrate,

    /// Submit a single event.
    Submit {
        event_type: String,

        /// Properties as a JSON object.
        #[arg(long, default_value = "{}")]
        properties: String,

        /// Deep-link start payload (only used for session-start events).
        #[arg(long)]
        start_payload: Option<String>,
    },

    /// Read JSON lines from stdin and submit each one.
    Ingest {
        /// Stop at the first rejected line instead of skipping it.
        #[arg(long, default_value = "false")]
        strict: bool,
    },

    /// Stream stored events matching a filter.
    Query {
        #[arg(long)]
        event_type: Option<String>,

        #[arg(long)]
        user_id: Option<String>,

        /// Property predicate, e.g. `utm_campaign=summer2024` or `meta.plan=pro`.
        #[arg(long)]
        property: Option<String>,

        #[command(flatten)]
        range: RangeArgs,
    },

    /// Most recent events, newest first.
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Total number of stored events.
    Count,

    /// Event counts per type.
    CountByType {
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Distinct users per source for one event type.
    BySource {
        #[arg(default_value = KnownEventType::BotStarted.as_str())]
        event_type: String,

        #[command(flatten)]
        range: RangeArgs,
    },

    /// Conversion rate per source between two event types.
    Conversion {
        #[arg(default_value = KnownEventType::BotStarted.as_str())]
        start_type: String,

        #[arg(default_value = KnownEventType::DecodeCompleted.as_str())]
        end_type: String,

        #[command(flatten)]
        range: RangeArgs,
    },

    /// Mean of a numeric property.
    Average {
        event_type: String,

        /// Dotted property path, e.g. `response_time_ms`.
        property: String,

        #[command(flatten)]
        range: RangeArgs,
    },

    /// Per-session rollups.
    Sessions {
        #[command(flatten)]
        range: RangeArgs,
    },
}

const DEFAULT_LOG_DIRECTIVE: &str = "botlytics=info";

/// `RUST_LOG` when it is set and parses, otherwise the default directive.
fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| match EnvFilter::try_new(d) {
            Ok(filter) => Some(filter),
            Err(e) => {
                eprintln!("Ignoring invalid RUST_LOG '{}': {}", d, e);
                None
            }
        })
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_DIRECTIVE))
}

fn init_tracing() {
    let filter = log_filter(std::env::var("RUST_LOG").ok().as_deref());
    let sub = fmt().with_env_filter(filter).with_writer(std::io::stderr).finish();
    if let Err(e) = tracing::subscriber::set_global_default(sub) {
        eprintln!("Failed to set global subscriber: {}", e);
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("botlytics failed: {}", e);
        return Err(e.into());
    }
    Ok(())
}

async fn run(args: Args) -> Result<(), Error> {
    let mut cfg = AnalyticsConfig::from_env()?;
    if let Some(url) = &args.db_url {
        cfg.database_url = url.clone();
    }
    if let Some(secs) = args.timeout_secs {
        cfg.query_timeout = Some(Duration::from_secs(secs)).filter(|d| !d.is_zero());
    }

    let (store, db): (Arc<dyn EventStore>, Option<Database>) = if args.memory {
        info!("Using in-memory event store");
        (Arc::new(InMemoryEventStore::with_page_size(cfg.page_size)), None)
    } else {
        let db = Database::from_config(&cfg).await?;
        if matches!(args.command, Command::Migrate) {
            db.migrate().await?;
            db.close().await;
            return Ok(());
        }
        let store = PostgresEventStore::from_database(&db).with_page_size(cfg.page_size);
        (Arc::new(store), Some(db))
    };

    let result = dispatch(args.command, &cfg, store).await;

    if let Some(db) = db {
        db.close().await;
    }
    result
}

async fn dispatch(command: Command, cfg: &AnalyticsConfig, store: Arc<dyn EventStore>) -> Result<(), Error> {
    let mut engine = AggregationEngine::new(Arc::clone(&store));
    if let Some(limit) = cfg.query_timeout {
        engine = engine.with_timeout(limit);
    }

    match command {
        Command::Migrate => {
            warn!("Nothing to migrate for the in-memory store");
            Ok(())
        }
        Command::Submit { event_type, properties, start_payload } => {
            let service = IngestService::new(EventNormalizer::from_config(cfg), store);
            let properties = serde_json::from_str(&properties)?;
            let stored = service
                .submit_event(&event_type, properties, start_payload.as_deref())
                .await?;
            print_json(&stored)
        }
        Command::Ingest { strict } => {
            let service = IngestService::new(EventNormalizer::from_config(cfg), Arc::clone(&store));
            let summary = ingest_lines(&service, strict).await?;
            print_json(&summary)
        }
        Command::Query { event_type, user_id, property, range } => {
            let mut filter = EventFilter::new().range(range.to_range());
            if let Some(t) = event_type {
                filter = filter.event_type(t);
            }
            if let Some(u) = user_id {
                filter = filter.user_id(u);
            }
            if let Some(expr) = property {
                filter = filter.property(PropertyPredicate::parse(&expr)?);
            }
            let mut stream = store.query(&filter).await?;
            while let Some(evt) = stream.try_next().await? {
                println!("{}", serde_json::to_string(&evt)?);
            }
            Ok(())
        }
        Command::Recent { limit } => {
            let events: Vec<StoredEvent> = store.recent(limit).await?;
            print_json(&events)
        }
        Command::Count => print_json(&store.count().await?),
        Command::CountByType { range } => print_json(&engine.count_by_type(&range.to_range()).await?),
        Command::BySource { event_type, range } => print_json(
            &engine
                .count_distinct_subjects_by_source(&event_type, &range.to_range())
                .await?,
        ),
        Command::Conversion { start_type, end_type, range } => print_json(
            &engine
                .conversion_rate(&start_type, &end_type, &range.to_range())
                .await?,
        ),
        Command::Average { event_type, property, range } => print_json(
            &engine
                .average_numeric_property(&event_type, &property, &range.to_range())
                .await?,
        ),
        Command::Sessions { range } => print_json(&engine.session_rollups(&range.to_range()).await?),
    }
}

#[derive(Debug, Default, Serialize)]
struct IngestSummary {
    stored: u64,
    rejected: u64,
    first_id: Option<i64>,
    last_id: Option<i64>,
}

async fn ingest_lines<S: EventStore>(service: &IngestService<S>, strict: bool) -> Result<IngestSummary, Error> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut summary = IngestSummary::default();
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let outcome = match serde_json::from_str::<RawEvent>(&line) {
            Ok(raw) => service.submit_raw(raw).await,
            Err(e) => Err(Error::Json(e)),
        };

        match outcome {
            Ok(stored) => {
                summary.stored += 1;
                summary.first_id.get_or_insert(stored.id);
                summary.last_id = Some(stored.id);
            }
            Err(e) if e.is_storage() || strict => {
                error!("Line {}: {}", line_no, e);
                return Err(e);
            }
            Err(e) => {
                warn!("Skipping line {}: {}", line_no, e);
                summary.rejected += 1;
            }
        }
    }

    info!("Ingested {} events ({} rejected)", summary.stored, summary.rejected);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_log_overrides_default_directive() {
        let filter = log_filter(Some("botlytics=debug")).to_string();
        assert!(filter.contains("botlytics=debug"), "{}", filter);
        assert!(!filter.contains("info"), "{}", filter);
    }

    #[test]
    fn test_default_directive_without_rust_log() {
        assert!(log_filter(None).to_string().contains(DEFAULT_LOG_DIRECTIVE));
        assert!(log_filter(Some("  ")).to_string().contains(DEFAULT_LOG_DIRECTIVE));
    }

    #[test]
    fn test_funnel_defaults_come_from_known_event_types() {
        let args = Args::try_parse_from(["botlytics", "conversion"]).unwrap();
        let Command::Conversion { start_type, end_type, .. } = args.command else {
            panic!("expected conversion subcommand");
        };
        assert_eq!(start_type, KnownEventType::BotStarted.as_str());
        assert_eq!(end_type, KnownEventType::DecodeCompleted.as_str());

        let args = Args::try_parse_from(["botlytics", "--memory", "by-source"]).unwrap();
        assert!(args.memory);
        let Command::BySource { event_type, .. } = args.command else {
            panic!("expected by-source subcommand");
        };
        assert_eq!(event_type, "bot_started");
    }
}
