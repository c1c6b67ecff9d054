//! sotkafetch - Fetch, cache and validate Sotkanet indicators for HUS
//!
//! A command-line front end over the cache-first fetch layer. Data goes to
//! stdout; logs, warnings about stale data and errors go to stderr.

use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use sotkafetch::cache::{CacheStore, MetadataStatus, MetadataStore};
use sotkafetch::cli::{Cli, Command};
use sotkafetch::config::Settings;
use sotkafetch::data::{
    get_indicator_by_id, Breakdown, DataPoint, IndicatorRequest, IndicatorSet, IndicatorSource, MetadataSource,
    SotkanetClient,
};
use sotkafetch::export::rows_to_csv;
use sotkafetch::fetcher::{Fetcher, FetcherConfig};
use sotkafetch::metadata::{MetadataConfig, MetadataService};
use sotkafetch::validator::ValidationSummary;

/// Sets up `tracing` output on stderr, falling back to `info` for a bad filter.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn open_cache(settings: &Settings) -> CacheStore {
    match &settings.cache_dir {
        Some(dir) => CacheStore::with_dir(dir.clone()),
        None => CacheStore::in_memory(),
    }
}

fn open_metadata_store(settings: &Settings) -> MetadataStore {
    match &settings.cache_dir {
        Some(dir) => MetadataStore::with_dir(dir.clone()),
        None => MetadataStore::in_memory(),
    }
}

fn format_value(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn print_rows(rows: &[DataPoint]) {
    println!(
        "{:<10} {:>6} {:<10} {:>14} {:>14}",
        "INDICATOR", "YEAR", "BREAKDOWN", "VALUE", "ABSOLUTE"
    );
    for row in rows {
        println!(
            "{:<10} {:>6} {:<10} {:>14} {:>14}",
            row.indicator_id,
            row.year,
            row.breakdown,
            format_value(row.value),
            format_value(row.absolute_value)
        );
    }
}

fn print_indicators(settings: &Settings, indicators: &IndicatorSet) {
    println!("Indicators for {} environment:", settings.environment);
    for id in indicators.iter() {
        let name = get_indicator_by_id(id)
            .map(|indicator| indicator.name_en)
            .unwrap_or("(not in catalog)");
        println!("  {:<6} {}", id, name);
    }
}

async fn fetch(
    fetcher: &Fetcher,
    settings: &Settings,
    indicators: &IndicatorSet,
    breakdown: Breakdown,
    csv: Option<&std::path::Path>,
    batch_timeout: Duration,
) -> Result<ExitCode, Box<dyn Error>> {
    let requests = indicators
        .iter()
        .map(|id| {
            IndicatorRequest::new(
                id.as_str(),
                settings.region_id.as_str(),
                *settings.years.start(),
                *settings.years.end(),
                breakdown,
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    let results = fetcher.get_many_with_timeout(&requests, batch_timeout).await;

    let mut rows = Vec::new();
    let mut failures = 0;
    for (request, result) in results.iter() {
        match result {
            Ok(outcome) => {
                if outcome.is_degraded() {
                    eprintln!(
                        "Warning: upstream unavailable, showing cached data for indicator {} from {}",
                        request.indicator_id(),
                        outcome.fetched_at.format("%Y-%m-%d %H:%M UTC")
                    );
                }
                rows.extend(outcome.rows.iter().cloned());
            }
            Err(err) => {
                failures += 1;
                eprintln!("Error: {}", err);
            }
        }
    }

    match csv {
        Some(path) => {
            std::fs::write(path, rows_to_csv(&rows)?)?;
            debug!(path = %path.display(), rows = rows.len(), "wrote CSV export");
        }
        None => print_rows(&rows),
    }

    if !results.is_empty() && failures == results.len() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn validate(fetcher: &Fetcher, settings: &Settings, indicators: &IndicatorSet) -> ExitCode {
    let results = fetcher
        .validate(indicators.iter().cloned(), &settings.region_id)
        .await;

    for result in results.values() {
        println!("{}", result);
    }

    let summary = ValidationSummary::from_results(&results);
    println!(
        "\n{} indicators: {} with data ({} complete, {} partial), {} without data, {} errors",
        summary.total, summary.with_data, summary.complete, summary.partial, summary.without_data, summary.errors
    );

    if summary.total > 0 && summary.errors == summary.total {
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn print_metadata_status(status: &MetadataStatus) {
    if !status.exists {
        println!("No stored indicator metadata");
        return;
    }
    let environment = status.environment.map(|env| env.to_string()).unwrap_or_default();
    let generated = status
        .generated_at
        .map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_default();
    println!("Stored metadata: {} indicators for {}", status.indicator_count, environment);
    println!("  generated:  {}", generated);
    println!("  stale:      {}", if status.is_stale { "yes" } else { "no" });
    println!("  matches:    {}", if status.matches_environment { "yes" } else { "no" });
}

async fn metadata(
    service: &MetadataService,
    settings: &Settings,
    indicators: &IndicatorSet,
    refresh: bool,
    status: bool,
) -> Result<ExitCode, Box<dyn Error>> {
    if status {
        print_metadata_status(&service.status(settings.environment, indicators));
        return Ok(ExitCode::SUCCESS);
    }

    let outcome = if refresh {
        service.force_refresh(settings.environment, indicators).await?
    } else {
        service.ensure(settings.environment, indicators).await?
    };

    if outcome.is_degraded() {
        eprintln!(
            "Warning: upstream unavailable, showing stored metadata from {}",
            outcome.snapshot.generated_at.format("%Y-%m-%d %H:%M UTC")
        );
    }

    for id in indicators.iter() {
        match outcome.snapshot.indicators.get(id) {
            Some(meta) => {
                let title = meta.title.best("en").unwrap_or("(untitled)");
                let organization = meta
                    .organization
                    .as_ref()
                    .and_then(|org| org.best("en"))
                    .unwrap_or("-");
                println!("{:<6} {}  [{}]", id, title, organization);
            }
            None => eprintln!("Warning: no metadata for indicator {}", id),
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn Error>> {
    let settings = Settings::from_cli(&cli)?;
    let indicators = cli.indicator_set();

    if cli.command == Command::Indicators {
        print_indicators(&settings, &indicators);
        return Ok(ExitCode::SUCCESS);
    }

    let client = Arc::new(SotkanetClient::with_config(
        settings.base_url.as_str(),
        settings.request_timeout,
    )?);
    let source: Arc<dyn IndicatorSource> = client.clone();
    let metadata_source: Arc<dyn MetadataSource> = client;
    let metadata_service = MetadataService::new(
        metadata_source,
        Arc::new(open_metadata_store(&settings)),
        MetadataConfig::from(&settings),
    );
    let fetcher = Fetcher::new(
        source,
        Arc::new(open_cache(&settings)),
        FetcherConfig::from(&settings),
    );

    match cli.command {
        Command::Fetch {
            breakdown,
            csv,
            batch_timeout,
            ..
        } => {
            fetch(
                &fetcher,
                &settings,
                &indicators,
                breakdown,
                csv.as_deref(),
                Duration::from_secs(batch_timeout),
            )
            .await
        }
        Command::Validate { .. } => Ok(validate(&fetcher, &settings, &indicators).await),
        Command::Metadata { refresh, status, .. } => {
            metadata(&metadata_service, &settings, &indicators, refresh, status).await
        }
        Command::ClearCache => {
            fetcher.clear_cache()?;
            metadata_service.store().clear()?;
            match fetcher.cache().dir() {
                Some(dir) => println!("Cleared cache in {}", dir.display()),
                None => println!("Cleared in-memory cache"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Indicators => Ok(ExitCode::SUCCESS),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}
