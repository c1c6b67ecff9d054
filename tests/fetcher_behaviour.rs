//! Integration tests for the cache-first fetcher
//!
//! Drives [`Fetcher`] against a scripted in-process source, so no test touches
//! the network. Backoff tests run on tokio's paused clock.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sotkafetch::cache::CacheStore;
use sotkafetch::data::{
    Breakdown, DataPoint, IndicatorRequest, IndicatorSource, UpstreamError, ValidationStatus,
};
use sotkafetch::fetcher::{FetchErrorKind, Fetcher, FetcherConfig, Freshness};
use sotkafetch::retry::RetryPolicy;

type Series = Vec<(i32, Option<f64>)>;

#[derive(Clone)]
enum Behaviour {
    Rows(Series),
    Transient,
    Fatal,
    /// Fails transiently this many times, then returns rows
    Flaky(usize, Series),
    /// Sleeps before returning rows
    Slow(Duration, Series),
}

/// Scripted upstream keyed by indicator id, counting calls per indicator
#[derive(Default)]
struct StubSource {
    behaviours: Mutex<HashMap<String, Behaviour>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl StubSource {
    fn with(entries: &[(&str, Behaviour)]) -> Arc<Self> {
        let source = StubSource::default();
        for (id, behaviour) in entries {
            source.set(id, behaviour.clone());
        }
        Arc::new(source)
    }

    fn set(&self, indicator_id: &str, behaviour: Behaviour) {
        self.behaviours
            .lock()
            .unwrap()
            .insert(indicator_id.to_string(), behaviour);
    }

    fn calls(&self, indicator_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(indicator_id)
            .copied()
            .unwrap_or(0)
    }
}

fn points(request: &IndicatorRequest, series: &Series) -> Vec<DataPoint> {
    series
        .iter()
        .filter(|(year, _)| request.years().contains(year))
        .map(|&(year, value)| DataPoint {
            indicator_id: request.indicator_id().to_string(),
            year,
            breakdown: request.breakdown(),
            value,
            absolute_value: value.map(|v| v * 100.0),
        })
        .collect()
}

#[async_trait]
impl IndicatorSource for StubSource {
    async fn fetch(&self, request: &IndicatorRequest) -> Result<Vec<DataPoint>, UpstreamError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(request.indicator_id().to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let behaviour = self
            .behaviours
            .lock()
            .unwrap()
            .get(request.indicator_id())
            .cloned()
            .unwrap_or(Behaviour::Rows(vec![]));

        match behaviour {
            Behaviour::Rows(series) => Ok(points(request, &series)),
            Behaviour::Transient => Err(UpstreamError::transient("connection refused")),
            Behaviour::Fatal => Err(UpstreamError::fatal("400 Bad Request")),
            Behaviour::Flaky(failures, series) => {
                if call <= failures {
                    Err(UpstreamError::transient("connection reset"))
                } else {
                    Ok(points(request, &series))
                }
            }
            Behaviour::Slow(delay, series) => {
                tokio::time::sleep(delay).await;
                Ok(points(request, &series))
            }
        }
    }
}

fn config(ttl: Duration) -> FetcherConfig {
    FetcherConfig {
        cache_enabled: true,
        cache_ttl: ttl,
        retry: RetryPolicy::new(3, Duration::from_secs(1)).without_jitter(),
        check_years: 2015..=2024,
    }
}

fn fetcher(source: &Arc<StubSource>, ttl: Duration) -> Fetcher {
    Fetcher::new(source.clone(), Arc::new(CacheStore::in_memory()), config(ttl))
}

fn request(indicator_id: &str) -> IndicatorRequest {
    IndicatorRequest::new(indicator_id, "629", 2018, 2023, Breakdown::Total).unwrap()
}

fn series() -> Series {
    vec![(2020, Some(812.5)), (2021, Some(820.0)), (2022, None)]
}

#[tokio::test]
async fn test_fresh_cache_hit_skips_upstream() {
    let source = StubSource::with(&[("186", Behaviour::Rows(series()))]);
    let fetcher = fetcher(&source, Duration::from_secs(3600));

    let first = fetcher.get_data(&request("186")).await.unwrap();
    let second = fetcher.get_data(&request("186")).await.unwrap();

    assert_eq!(first.freshness, Freshness::Fetched);
    assert_eq!(second.freshness, Freshness::Cached);
    assert_eq!(first.rows, second.rows);
    assert_eq!(source.calls("186"), 1);
}

#[tokio::test]
async fn test_missing_values_stay_missing() {
    let source = StubSource::with(&[("186", Behaviour::Rows(series()))]);
    let outcome = fetcher(&source, Duration::from_secs(3600))
        .get_data(&request("186"))
        .await
        .unwrap();

    let row_2022 = outcome.rows.iter().find(|row| row.year == 2022).unwrap();
    assert_eq!(row_2022.value, None);
    assert_eq!(row_2022.absolute_value, None);
}

#[tokio::test]
async fn test_distinct_requests_are_cached_separately() {
    let source = StubSource::with(&[("186", Behaviour::Rows(series()))]);
    let fetcher = fetcher(&source, Duration::from_secs(3600));

    let total = request("186");
    let narrow = IndicatorRequest::new("186", "629", 2021, 2021, Breakdown::Total).unwrap();
    fetcher.get_data(&total).await.unwrap();
    let outcome = fetcher.get_data(&narrow).await.unwrap();

    assert_eq!(outcome.freshness, Freshness::Fetched);
    assert_eq!(outcome.rows.len(), 1);
    assert_eq!(source.calls("186"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retry_with_backoff_then_give_up() {
    let source = StubSource::with(&[("186", Behaviour::Transient)]);
    let fetcher = fetcher(&source, Duration::from_secs(3600));

    let start = tokio::time::Instant::now();
    let err = fetcher.get_data(&request("186")).await.unwrap_err();
    let elapsed = start.elapsed();

    assert_eq!(err.kind(), FetchErrorKind::NetworkUnavailable);
    assert_eq!(err.indicator_id(), "186");
    assert_eq!(source.calls("186"), 3);
    // 1s after the first failure, 2s after the second
    assert!(elapsed >= Duration::from_secs(3), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(4), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_recovers_on_retry() {
    let source = StubSource::with(&[("186", Behaviour::Flaky(2, series()))]);
    let start = tokio::time::Instant::now();
    let outcome = fetcher(&source, Duration::from_secs(3600))
        .get_data(&request("186"))
        .await
        .unwrap();

    assert!(start.elapsed() >= Duration::from_secs(3));
    assert_eq!(outcome.freshness, Freshness::Fetched);
    assert_eq!(outcome.rows.len(), 3);
    assert_eq!(source.calls("186"), 3);
}

#[tokio::test]
async fn test_fatal_failure_is_not_retried() {
    let source = StubSource::with(&[("186", Behaviour::Fatal)]);
    let err = fetcher(&source, Duration::from_secs(3600))
        .get_data(&request("186"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FetchErrorKind::UpstreamRejected);
    assert_eq!(source.calls("186"), 1);
}

#[tokio::test]
async fn test_stale_entry_served_when_upstream_fails() {
    let source = StubSource::with(&[("186", Behaviour::Rows(series()))]);
    let fetcher = fetcher(&source, Duration::ZERO);

    let fresh = fetcher.get_data(&request("186")).await.unwrap();
    std::thread::sleep(Duration::from_millis(10));
    source.set("186", Behaviour::Fatal);

    let degraded = fetcher.get_data(&request("186")).await.unwrap();
    assert_eq!(degraded.freshness, Freshness::Degraded);
    assert!(degraded.is_degraded());
    assert_eq!(degraded.rows, fresh.rows);
    assert_eq!(degraded.fetched_at, fresh.fetched_at);
    assert_eq!(source.calls("186"), 2);
}

#[tokio::test]
async fn test_expired_entry_is_refreshed_when_upstream_recovers() {
    let source = StubSource::with(&[("186", Behaviour::Rows(series()))]);
    let fetcher = fetcher(&source, Duration::ZERO);

    fetcher.get_data(&request("186")).await.unwrap();
    std::thread::sleep(Duration::from_millis(10));
    source.set("186", Behaviour::Rows(vec![(2023, Some(1.0))]));

    let refreshed = fetcher.get_data(&request("186")).await.unwrap();
    assert_eq!(refreshed.freshness, Freshness::Fetched);
    assert_eq!(refreshed.rows.len(), 1);
    assert_eq!(refreshed.rows[0].year, 2023);
}

#[tokio::test]
async fn test_disabled_cache_always_calls_upstream() {
    let source = StubSource::with(&[("186", Behaviour::Rows(series()))]);
    let config = FetcherConfig {
        cache_enabled: false,
        ..config(Duration::from_secs(3600))
    };
    let store = Arc::new(CacheStore::in_memory());
    let fetcher = Fetcher::new(source.clone(), store.clone(), config);

    fetcher.get_data(&request("186")).await.unwrap();
    let second = fetcher.get_data(&request("186")).await.unwrap();

    assert_eq!(second.freshness, Freshness::Fetched);
    assert_eq!(source.calls("186"), 2);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_clear_cache_forces_refetch() {
    let source = StubSource::with(&[("186", Behaviour::Rows(series()))]);
    let fetcher = fetcher(&source, Duration::from_secs(3600));

    fetcher.get_data(&request("186")).await.unwrap();
    fetcher.clear_cache().unwrap();
    assert!(fetcher.cache().is_empty());

    let outcome = fetcher.get_data(&request("186")).await.unwrap();
    assert_eq!(outcome.freshness, Freshness::Fetched);
    assert_eq!(source.calls("186"), 2);
}

#[tokio::test]
async fn test_persisted_cache_survives_new_store() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let source = StubSource::with(&[("186", Behaviour::Rows(series()))]);

    let first = Fetcher::new(
        source.clone(),
        Arc::new(CacheStore::with_dir(temp_dir.path())),
        config(Duration::from_secs(3600)),
    );
    let fetched = first.get_data(&request("186")).await.unwrap();

    source.set("186", Behaviour::Fatal);
    let second = Fetcher::new(
        source.clone(),
        Arc::new(CacheStore::with_dir(temp_dir.path())),
        config(Duration::from_secs(3600)),
    );
    let cached = second.get_data(&request("186")).await.unwrap();

    assert_eq!(cached.freshness, Freshness::Cached);
    assert_eq!(cached.rows, fetched.rows);
    assert_eq!(source.calls("186"), 1);
}

#[tokio::test]
async fn test_get_many_keeps_order_and_isolates_failures() {
    let source = StubSource::with(&[
        ("186", Behaviour::Rows(series())),
        ("322", Behaviour::Fatal),
        ("5527", Behaviour::Rows(vec![(2019, Some(31.2))])),
    ]);
    let fetcher = fetcher(&source, Duration::from_secs(3600));
    let requests = vec![request("5527"), request("322"), request("186")];

    let results = fetcher.get_many(&requests).await;

    let ids: Vec<&str> = results.iter().map(|(req, _)| req.indicator_id()).collect();
    assert_eq!(ids, ["5527", "322", "186"]);
    assert_eq!(results[0].1.as_ref().unwrap().rows.len(), 1);
    assert_eq!(
        results[1].1.as_ref().unwrap_err().kind(),
        FetchErrorKind::UpstreamRejected
    );
    assert_eq!(results[2].1.as_ref().unwrap().rows.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_batch_timeout_abandons_slow_requests() {
    let source = StubSource::with(&[
        ("186", Behaviour::Rows(series())),
        ("322", Behaviour::Slow(Duration::from_secs(60), series())),
    ]);
    let fetcher = fetcher(&source, Duration::from_secs(3600));
    let requests = vec![request("186"), request("322")];

    let results = fetcher
        .get_many_with_timeout(&requests, Duration::from_secs(5))
        .await;

    assert!(results[0].1.is_ok());
    let err = results[1].1.as_ref().unwrap_err();
    assert_eq!(err.kind(), FetchErrorKind::TimedOut);
    assert_eq!(err.indicator_id(), "322");
}

#[tokio::test]
async fn test_validate_reports_years_with_data() {
    let source = StubSource::with(&[
        ("A", Behaviour::Rows(vec![])),
        (
            "B",
            Behaviour::Rows(vec![(2021, Some(1.0)), (2022, Some(2.0)), (2023, Some(3.0))]),
        ),
    ]);
    let results = fetcher(&source, Duration::from_secs(3600))
        .validate(["A", "B"], "629")
        .await;

    assert!(!results["A"].has_data);
    assert!(results["A"].years_with_data.is_empty());
    assert_eq!(results["A"].status, ValidationStatus::NoData);

    assert!(results["B"].has_data);
    assert_eq!(results["B"].years_with_data, BTreeSet::from([2021, 2022, 2023]));
    assert_eq!(results["B"].missing_years.len(), 7);
}
