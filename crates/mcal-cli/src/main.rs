use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use mcal_core::{resolve_timezone, Impact, RangeSelector, UpsertStats};
use mcal_storage::{EventFilter, PgEventStore};
use mcal_sync::{maybe_build_scheduler, open_store, SyncConfig, SyncMode, SyncPipeline};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mcal-cli")]
#[command(about = "Market calendar sync and query tool")]
struct Cli {
    /// Log every extracted and dropped row.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch one range and write it to the store.
    Sync {
        #[arg(default_value = "this-week")]
        range: RangeSelector,
        /// Clear the range first instead of merging by identity.
        #[arg(long)]
        replace: bool,
    },
    /// Merge this week, next week, this month and next month.
    RefreshAll,
    /// List stored events.
    Events {
        /// Named window; overridden by --start/--end.
        #[arg(long)]
        range: Option<RangeSelector>,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(long)]
        tz: Option<String>,
        #[arg(long = "currency")]
        currencies: Vec<String>,
        /// high, medium, low or unknown.
        #[arg(long)]
        impact: Option<Impact>,
    },
    /// Show the next upcoming High impact event.
    Next {
        #[arg(long)]
        tz: Option<String>,
    },
    /// Delete stored events in an inclusive date window.
    Clear {
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Required when neither bound is given.
        #[arg(long)]
        all: bool,
    },
    Migrate,
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the cron refresh in the foreground until interrupted.
    Schedule,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_target(false)
        .init();
}

fn print_stats(label: &str, stats: &UpsertStats) {
    println!(
        "{label}: total={} new={} existing={} updated={} skipped={} cleared={}{}",
        stats.total,
        stats.new,
        stats.existing,
        stats.updated,
        stats.skipped,
        stats.cleared,
        if stats.aborted { " ABORTED" } else { "" }
    );
}

fn display_zone(name: Option<&str>, config: &SyncConfig) -> Result<Tz> {
    match name {
        None => Ok(config.pipeline.default_timezone),
        Some(name) => resolve_timezone(name).with_context(|| format!("unknown timezone {name:?}")),
    }
}

async fn build_pipeline(config: &SyncConfig) -> Result<Arc<SyncPipeline>> {
    let store = open_store(config).await?;
    Ok(Arc::new(SyncPipeline::new(config.clone(), store)?))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = SyncConfig::from_env();
    config.pipeline.verbose |= cli.verbose;

    let command = cli.command.unwrap_or(Commands::Sync {
        range: RangeSelector::ThisWeek,
        replace: false,
    });

    match command {
        Commands::Migrate => {
            let Some(url) = config.database_url.as_deref() else {
                bail!("DATABASE_URL is required for migrate");
            };
            let store = PgEventStore::connect(url).await?;
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::Sync { range, replace } => {
            let pipeline = build_pipeline(&config).await?;
            let mode = if replace { SyncMode::Replace } else { SyncMode::Merge };
            let report = pipeline.fetch_events_for_range(range, mode).await?;
            println!(
                "sync {range}: run_id={} strategy={} extracted={} kept={}",
                report.run_id,
                report.strategy.unwrap_or("none"),
                report.extracted,
                report.normalize.kept
            );
            print_stats(range.as_str(), &report.stats);
        }
        Commands::RefreshAll => {
            let pipeline = build_pipeline(&config).await?;
            let summary = pipeline.refresh_all_ranges().await;
            for outcome in &summary.ranges {
                match &outcome.error {
                    Some(err) => println!("{}: FAILED {err}", outcome.range),
                    None => print_stats(outcome.range.as_str(), &outcome.stats),
                }
            }
            print_stats("combined", &summary.combined);
        }
        Commands::Events {
            range,
            start,
            end,
            tz,
            currencies,
            impact,
        } => {
            let tz = display_zone(tz.as_deref(), &config)?;
            let pipeline = build_pipeline(&config).await?;
            let today = Utc::now().with_timezone(&tz).date_naive();
            let (range_start, range_end) = range.unwrap_or(RangeSelector::ThisWeek).bounds(today);
            let filter = EventFilter {
                start: Some(start.unwrap_or(range_start)),
                end: Some(end.unwrap_or(range_end)),
                currencies,
                impact,
            };
            let events = pipeline.events(&filter, tz).await?;
            for e in &events {
                println!(
                    "{} {:>9} {:<4} {:<7} {} | forecast={} previous={}",
                    e.date, e.time, e.currency, e.impact, e.event, e.forecast, e.previous
                );
            }
            info!(count = events.len(), timezone = tz.name(), "listed events");
        }
        Commands::Next { tz } => {
            let tz = display_zone(tz.as_deref(), &config)?;
            let pipeline = build_pipeline(&config).await?;
            match pipeline.next_high_impact(tz, Utc::now()).await? {
                Some(e) => println!("{} {} {} {} ({})", e.date, e.time, e.currency, e.event, tz.name()),
                None => println!("no upcoming high impact event"),
            }
        }
        Commands::Clear { start, end, all } => {
            if start.is_none() && end.is_none() && !all {
                bail!("refusing to clear every event without --all");
            }
            let pipeline = build_pipeline(&config).await?;
            let deleted = pipeline.clear_events(start, end).await?;
            println!("cleared {deleted} events");
        }
        Commands::Serve { port } => {
            let pipeline = build_pipeline(&config).await?;
            let scheduler = maybe_build_scheduler(Arc::clone(&pipeline)).await?;
            if let Some(sched) = &scheduler {
                sched.start().await.context("starting scheduler")?;
            }
            mcal_web::serve(pipeline, port.unwrap_or(config.web_port)).await?;
        }
        Commands::Schedule => {
            if !config.scheduler_enabled {
                bail!("set MCAL_SCHEDULER_ENABLED=1 to run the scheduler");
            }
            let pipeline = build_pipeline(&config).await?;
            let Some(mut sched) = maybe_build_scheduler(Arc::clone(&pipeline)).await? else {
                bail!("scheduler could not be built");
            };
            sched.start().await.context("starting scheduler")?;
            info!(cron = %config.sync_cron, "scheduler running; ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_accepts_known_impacts_and_rejects_typos() {
        let cli = Cli::try_parse_from(["mcal-cli", "events", "--impact", "High"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Events {
                impact: Some(Impact::High),
                ..
            })
        ));
        assert!(Cli::try_parse_from(["mcal-cli", "events", "--impact", "hgih"]).is_err());
    }
}
