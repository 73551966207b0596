use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use islands_ssr::search::{
    SearchOptions, SuggestionFetcher, SuggestionOutcome, SuggestionRequest, SuggestionSource,
};
use islands_ssr::UpstreamError;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

/// Answers after `latency` with `<query>-1..<query>-10`.
#[derive(Clone, Default)]
struct SlowSource {
    latency: Duration,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<SuggestionRequest>>>,
}

impl SuggestionSource for SlowSource {
    type Item = String;

    fn suggest(
        &self,
        request: SuggestionRequest,
    ) -> BoxFuture<'static, Result<Vec<String>, UpstreamError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        let latency = self.latency;
        async move {
            tokio::time::sleep(latency).await;
            if request.query == "fail" {
                let err = UpstreamError::new("search.suggestions", "unavailable");
                return Err(err.with_status(502));
            }
            Ok((1..=10).map(|i| format!("{}-{i}", request.query)).collect())
        }
        .boxed()
    }
}

fn fetcher(latency_ms: u64) -> (Arc<SuggestionFetcher<SlowSource>>, SlowSource) {
    let source = SlowSource {
        latency: Duration::from_millis(latency_ms),
        ..SlowSource::default()
    };
    let fetcher = SuggestionFetcher::new(source.clone(), SearchOptions::default());
    (Arc::new(fetcher), source)
}

#[tokio::test(start_paused = true)]
async fn results_are_capped_after_debounce() {
    let (fetcher, source) = fetcher(10);

    let outcome = fetcher.query("boot").await;
    let SuggestionOutcome::Results(items) = outcome else {
        panic!("expected results, got {outcome:?}");
    };
    assert_eq!(items.len(), 8);
    assert_eq!(items[0], "boot-1");
    assert_eq!(
        source.requests.lock().as_slice(),
        [SuggestionRequest {
            query: "boot".into(),
            limit: 8,
            fuzzy: true,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn typing_supersedes_during_debounce() {
    let (fetcher, source) = fetcher(10);

    let first = tokio::spawn({
        let fetcher = Arc::clone(&fetcher);
        async move { fetcher.query("bo").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = fetcher.query("boot").await;

    assert_eq!(first.await.unwrap(), SuggestionOutcome::Superseded);
    assert!(matches!(second, SuggestionOutcome::Results(ref items) if items[0] == "boot-1"));
    // Only the surviving query reached the upstream.
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn in_flight_query_never_delivers_after_supersede() {
    let (fetcher, source) = fetcher(500);

    let first = tokio::spawn({
        let fetcher = Arc::clone(&fetcher);
        async move { fetcher.query("hat").await }
    });
    // Past the debounce, so the first request is in flight.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);

    let second = fetcher.query("hats").await;
    assert_eq!(first.await.unwrap(), SuggestionOutcome::Superseded);
    assert!(matches!(second, SuggestionOutcome::Results(_)));
}

#[tokio::test(start_paused = true)]
async fn cancel_and_short_terms() {
    let (fetcher, source) = fetcher(10);

    let pending = tokio::spawn({
        let fetcher = Arc::clone(&fetcher);
        async move { fetcher.query("sock").await }
    });
    tokio::task::yield_now().await;
    fetcher.cancel();
    assert_eq!(pending.await.unwrap(), SuggestionOutcome::Superseded);

    assert_eq!(fetcher.query("").await, SuggestionOutcome::Results(Vec::new()));
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn upstream_failure_is_surfaced() {
    let (fetcher, _source) = fetcher(10);
    match fetcher.query("fail").await {
        SuggestionOutcome::Failed(err) => assert_eq!(err.status, Some(502)),
        other => panic!("expected failure, got {other:?}"),
    }
}
