//! A core module that pages through the listing API and aggregates every item.
//!
//! See [`Collector`] for more information.
//!
//! Following is the low-level module wrapped by this module:
//! - [`crate::api`]

use std::sync::mpsc;
use std::time::Duration;

use futures::future::join_all;
use rayon::ThreadPoolBuilder;
use reqwest::{blocking, Client, Url};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::api::{self, BlockingGetter, FetchError, Getter, Item, Page};

/// One `(offset, limit)` slice of the paginated collection,
/// fetched in a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// The index of the first item of this slice.
    pub offset: u64,
    /// The maximum number of items of this slice.
    pub limit: u64,
}

/// Partition `[0, count)` into windows of `limit` items.
///
/// Produces `ceil(count / limit)` windows with no gaps and no overlaps.
/// The last window may cover fewer than `limit` items.
pub(crate) fn windows(count: u64, limit: u64) -> Vec<Window> {
    debug_assert_ne!(limit, 0);

    let mut windows = Vec::new();
    let mut offset = 0;
    while offset < count {
        windows.push(Window { offset, limit });
        offset += limit;
    }
    windows
}

/// The execution strategy of one collection run.
///
/// All three strategies run the same window-fetch-and-concatenate
/// algorithm, they only differ in how the window fetches are scheduled
/// and therefore in the order of the collected items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Follow the API's own `next` cursor, one request in flight.
    /// Output order equals API page order.
    Sequential,
    /// Fetch all windows on a fixed-size worker thread pool.
    /// Output order is completion order.
    Threads,
    /// Launch all window fetches at once on the async scheduler,
    /// then join them. Output order is launch order.
    Async,
}

impl Strategy {
    /// The suffix used in the output filename, e.g. `pokemons_threads.json`.
    pub fn suffix(self) -> &'static str {
        match self {
            Strategy::Sequential => "seq",
            Strategy::Threads => "threads",
            Strategy::Async => "async",
        }
    }
}

/// The fatal error of [`Collector::collect`].
///
/// Without the total count from the probe request the collector cannot
/// size its work, so it aborts without producing output.
#[derive(Error, Debug)]
#[error("the probe request failed, cannot size the collection")]
pub struct ProbeError(#[source] pub FetchError);

/// The reason one window was dropped. Never surfaced to the caller.
#[derive(Error, Debug)]
enum WindowError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("the page payload has no `results` collection")]
    MalformedPage,
}

/// Extract the items of one window fetch,
/// treating a missing `results` key like a fetch failure.
fn page_items(result: Result<Page, FetchError>) -> Result<Vec<Item>, WindowError> {
    match result?.results {
        Some(items) => Ok(items),
        None => Err(WindowError::MalformedPage),
    }
}

/** The collector that pages through the listing API and aggregates every item.

- A probe request (`limit=1`) discovers the total item count, then one
    request per [`Window`] retrieves the actual items.

- A failed probe is fatal and returns [`ProbeError`]. A failed or
    malformed window is logged and dropped, the collection continues.
    *Callers cannot detect partial data loss programmatically, only via
    the logs.* No window is ever retried.

# Example
```no_run
use reqwest::{Client, Url};
use pagedump::collector::{Collector, Strategy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let base = Url::parse("https://pokeapi.co/api/v2/pokemon/")?;
    let collector = Collector::build(Client::new(), base, 200, 4)?;

    let items = collector.collect(Strategy::Async).await?;
    println!("collected {} items", items.len());
    Ok(())
}
```
*/
pub struct Collector {
    client: Client,
    base: Url,
    limit: u64,
    workers: usize,
    timeout: Option<Duration>,
}

impl Collector {
    /// Create a new collector.
    ///
    /// - `client`: used by the `sequential` and `async` strategies.
    /// - `base`: the listing endpoint, without query parameters.
    /// - `limit`: the page size of every window request.
    /// - `workers`: the pool size of the `threads` strategy.
    ///
    /// # Errors
    ///
    /// If `limit` or `workers` is `0`, this function will return an error.
    pub fn build(client: Client, base: Url, limit: u64, workers: usize) -> anyhow::Result<Self> {
        if limit == 0 {
            return Err(anyhow::anyhow!("Limit cannot be 0"));
        }
        if workers == 0 {
            return Err(anyhow::anyhow!("Number of workers cannot be 0"));
        }
        Ok(Collector {
            client,
            base,
            limit,
            workers,
            timeout: None,
        })
    }

    /// Set the request timeout of the `threads` strategy's own blocking
    /// client. The async client's timeout is configured where the client
    /// is built.
    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Collect every item of the listing with the given strategy.
    ///
    /// # Errors
    ///
    /// Only a failed probe request surfaces as an error. Individual
    /// window failures are logged and their items are dropped.
    pub async fn collect(&self, strategy: Strategy) -> Result<Vec<Item>, ProbeError> {
        match strategy {
            Strategy::Sequential => self.collect_seq().await,
            Strategy::Async => self.collect_fan_out().await,
            Strategy::Threads => {
                let base = self.base.clone();
                let (limit, workers, timeout) = (self.limit, self.workers, self.timeout);
                tokio::task::spawn_blocking(move || {
                    collect_threads(&base, limit, workers, timeout)
                })
                .await
                .expect("the thread-pool collection task panicked")
            }
        }
    }

    /// Issue the probe request and return the total item count.
    async fn probe(&self) -> Result<u64, ProbeError> {
        let getter = Getter::build(&self.client, &self.base, 0, 1)
            .expect("probe arguments are constant and valid");
        match getter.run().await {
            Ok(page) => {
                debug!("probe reported {} items", page.count);
                Ok(page.count)
            }
            Err(err) => {
                error!("failed to get information from the API: {err}");
                Err(ProbeError(err))
            }
        }
    }

    /// Cursor-driven collection: one request in flight, strictly in the
    /// API's own page order.
    ///
    /// The first request doubles as the probe, so its failure is fatal.
    /// A later cursor failure ends the run early with the items
    /// collected so far.
    async fn collect_seq(&self) -> Result<Vec<Item>, ProbeError> {
        let mut items = Vec::new();

        let mut first_url = self.base.clone();
        first_url
            .query_pairs_mut()
            .append_pair("limit", &self.limit.to_string());
        let mut next = Some(first_url);
        let mut is_first = true;

        while let Some(url) = next.take() {
            let page = match api::fetch(&self.client, url).await {
                Ok(page) => page,
                Err(err) if is_first => {
                    error!("failed to get information from the API: {err}");
                    return Err(ProbeError(err));
                }
                Err(err) => {
                    warn!("cursor fetch failed, ending the run early: {err}");
                    break;
                }
            };
            is_first = false;

            match page.results {
                Some(batch) => items.extend(batch),
                None => warn!("dropping a page with no `results` collection"),
            }

            next = match page.next.as_deref().map(Url::parse).transpose() {
                Ok(next) => next,
                Err(err) => {
                    warn!("the API returned an unparsable `next` cursor: {err}");
                    None
                }
            };
        }

        Ok(items)
    }

    /// Async fan-out: launch every window fetch before awaiting any,
    /// then join them all. `join_all` keeps the launch order, so the
    /// output order matches the window order regardless of which
    /// request finishes first.
    async fn collect_fan_out(&self) -> Result<Vec<Item>, ProbeError> {
        let count = self.probe().await?;
        let windows = windows(count, self.limit);
        debug!("fanning out {} window fetches", windows.len());

        let fetches = windows.into_iter().map(|window| {
            let getter = Getter::build(&self.client, &self.base, window.offset, window.limit)
                .expect("window arguments are validated by `Collector::build`");
            async move { (window, getter.run().await) }
        });

        let mut items = Vec::new();
        for (window, result) in join_all(fetches).await {
            match page_items(result) {
                Ok(batch) => items.extend(batch),
                Err(err) => warn!("dropping the window at offset {}: {err}", window.offset),
            }
        }
        Ok(items)
    }
}

/// Thread-pooled collection: every window fetch runs on a fixed-size
/// worker pool, workers hand their results to this single collecting
/// thread over a channel, and only this thread appends to the
/// accumulator. Output order is completion order.
///
/// Runs on a `spawn_blocking` thread; the blocking client must not be
/// built inside the async runtime.
fn collect_threads(
    base: &Url,
    limit: u64,
    workers: usize,
    timeout: Option<Duration>,
) -> Result<Vec<Item>, ProbeError> {
    let client = blocking::Client::builder()
        .timeout(timeout)
        .build()
        .expect("failed to build the blocking HTTP client");

    let count = {
        let getter = BlockingGetter::build(&client, base, 0, 1)
            .expect("probe arguments are constant and valid");
        match getter.run() {
            Ok(page) => page.count,
            Err(err) => {
                error!("failed to get information from the API: {err}");
                return Err(ProbeError(err));
            }
        }
    };

    let windows = windows(count, limit);
    debug!("submitting {} window fetches to {workers} workers", windows.len());

    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .expect("failed to build the worker thread pool");

    let (tx, rx) = mpsc::channel();
    for window in windows {
        let tx = tx.clone();
        let client = client.clone();
        let base = base.clone();
        pool.spawn(move || {
            let result = BlockingGetter::build(&client, &base, window.offset, window.limit)
                .expect("window arguments are validated by `Collector::build`")
                .run();
            // the collecting thread may have bailed out, ignore send errors
            let _ = tx.send((window, result));
        });
    }
    drop(tx);

    // the iteration ends once every worker has dropped its sender
    let mut items = Vec::new();
    for (window, result) in rx {
        match page_items(result) {
            Ok(batch) => items.extend(batch),
            Err(err) => warn!("dropping the window at offset {}: {err}", window.offset),
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::{json, Value};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LISTING_PATH: &str = "/listing/";

    fn dataset(n: usize) -> Vec<Value> {
        (0..n).map(|i| json!({"name": format!("item-{i}")})).collect()
    }

    fn names(items: &[Item]) -> Vec<String> {
        items
            .iter()
            .map(|item| item["name"].as_str().unwrap().to_owned())
            .collect()
    }

    fn collector_for(server: &MockServer, limit: u64) -> Collector {
        let base = Url::parse(&format!("{}{LISTING_PATH}", server.uri())).unwrap();
        Collector::build(Client::new(), base, limit, 4).unwrap()
    }

    async fn mount_probe(server: &MockServer, count: usize) {
        Mock::given(method("GET"))
            .and(path(LISTING_PATH))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": count,
                "next": null,
                "results": [{"name": "probe"}],
            })))
            .mount(server)
            .await;
    }

    async fn mount_window(server: &MockServer, items: &[Value], offset: usize, limit: usize) {
        let end = usize::min(offset + limit, items.len());
        Mock::given(method("GET"))
            .and(path(LISTING_PATH))
            .and(query_param("offset", offset.to_string()))
            .and(query_param("limit", limit.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": items.len(),
                "next": null,
                "results": &items[offset..end],
            })))
            .mount(server)
            .await;
    }

    async fn mount_all_windows(server: &MockServer, items: &[Value], limit: usize) {
        mount_probe(server, items.len()).await;
        for offset in (0..items.len()).step_by(limit) {
            mount_window(server, items, offset, limit).await;
        }
    }

    #[test]
    fn test_windows_partition() {
        // the 450/200 scenario: 3 windows, the last one short
        assert_eq!(
            windows(450, 200),
            [
                Window { offset: 0, limit: 200 },
                Window { offset: 200, limit: 200 },
                Window { offset: 400, limit: 200 },
            ]
        );

        assert!(windows(0, 200).is_empty());
        assert_eq!(windows(1, 200).len(), 1);
        assert_eq!(windows(200, 200).len(), 1);
        assert_eq!(windows(201, 200).len(), 2);

        for (count, limit) in [(1, 1), (7, 3), (450, 200), (1000, 10), (999, 10)] {
            let partition = windows(count, limit);
            assert_eq!(partition.len() as u64, count.div_ceil(limit));
            // no gaps, no overlaps: each window starts where the previous ended
            for (i, window) in partition.iter().enumerate() {
                assert_eq!(window.offset, i as u64 * limit);
                assert_eq!(window.limit, limit);
            }
            // the windows cover all of [0, count)
            let last = partition.last().unwrap();
            assert!(last.offset < count);
            assert!(last.offset + last.limit >= count);
        }
    }

    #[test]
    fn test_illegal_args() {
        let base = Url::parse("http://localhost/listing/").unwrap();

        let resp = Collector::build(Client::new(), base.clone(), 0, 4);
        assert!(resp.is_err());

        let resp = Collector::build(Client::new(), base, 200, 0);
        assert!(resp.is_err());
    }

    #[tokio::test]
    async fn test_fan_out_preserves_launch_order() {
        let mock_server = MockServer::start().await;
        let items = dataset(5);
        mount_all_windows(&mock_server, &items, 2).await;

        let collected = collector_for(&mock_server, 2)
            .collect(Strategy::Async)
            .await
            .unwrap();

        // each window slice is ordered and `join_all` keeps the launch
        // order, so the whole output matches the dataset order
        assert_eq!(
            names(&collected),
            ["item-0", "item-1", "item-2", "item-3", "item-4"]
        );
    }

    #[tokio::test]
    async fn test_threads_match_fan_out_as_a_set() {
        let mock_server = MockServer::start().await;
        let items = dataset(5);
        mount_all_windows(&mock_server, &items, 2).await;

        let collector = collector_for(&mock_server, 2);
        let threaded = collector.collect(Strategy::Threads).await.unwrap();
        let fanned_out = collector.collect(Strategy::Async).await.unwrap();

        // completion order is nondeterministic, compare as sets
        let mut threaded_names = names(&threaded);
        threaded_names.sort();
        let mut fanned_out_names = names(&fanned_out);
        fanned_out_names.sort();
        assert_eq!(threaded_names, fanned_out_names);
        assert_eq!(threaded.len(), 5);
    }

    #[tokio::test]
    async fn test_sequential_follows_cursor() {
        let mock_server = MockServer::start().await;
        let uri = mock_server.uri();

        Mock::given(method("GET"))
            .and(path(LISTING_PATH))
            .and(query_param("limit", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 3,
                "next": format!("{uri}{LISTING_PATH}?page=2"),
                "results": [{"name": "item-0"}, {"name": "item-1"}],
            })))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path(LISTING_PATH))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 3,
                "next": null,
                "results": [{"name": "item-2"}],
            })))
            .mount(&mock_server)
            .await;

        let collected = collector_for(&mock_server, 2)
            .collect(Strategy::Sequential)
            .await
            .unwrap();

        assert_eq!(names(&collected), ["item-0", "item-1", "item-2"]);
    }

    #[tokio::test]
    async fn test_sequential_skips_page_without_results() {
        let mock_server = MockServer::start().await;
        let uri = mock_server.uri();

        Mock::given(method("GET"))
            .and(path(LISTING_PATH))
            .and(query_param("limit", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 1,
                "next": format!("{uri}{LISTING_PATH}?page=2"),
            })))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path(LISTING_PATH))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 1,
                "next": null,
                "results": [{"name": "item-0"}],
            })))
            .mount(&mock_server)
            .await;

        let collected = collector_for(&mock_server, 2)
            .collect(Strategy::Sequential)
            .await
            .unwrap();

        // the malformed page is dropped but its cursor is still followed
        assert_eq!(names(&collected), ["item-0"]);
    }

    #[tokio::test]
    async fn test_failed_window_is_dropped() {
        let mock_server = MockServer::start().await;
        let items = dataset(5);
        mount_probe(&mock_server, items.len()).await;
        mount_window(&mock_server, &items, 0, 2).await;
        mount_window(&mock_server, &items, 4, 2).await;
        Mock::given(method("GET"))
            .and(path(LISTING_PATH))
            .and(query_param("offset", "2"))
            .and(query_param("limit", "2"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let collector = collector_for(&mock_server, 2);

        // the run must not fail, only the failed window's items are lost
        let collected = collector.collect(Strategy::Async).await.unwrap();
        assert_eq!(names(&collected), ["item-0", "item-1", "item-4"]);

        let collected = collector.collect(Strategy::Threads).await.unwrap();
        assert_eq!(collected.len(), 3);
    }

    #[tokio::test]
    async fn test_malformed_window_is_dropped_like_a_failure() {
        let mock_server = MockServer::start().await;
        let items = dataset(5);
        mount_probe(&mock_server, items.len()).await;
        mount_window(&mock_server, &items, 0, 2).await;
        mount_window(&mock_server, &items, 4, 2).await;
        Mock::given(method("GET"))
            .and(path(LISTING_PATH))
            .and(query_param("offset", "2"))
            .and(query_param("limit", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 5,
                "next": null,
            })))
            .mount(&mock_server)
            .await;

        let collected = collector_for(&mock_server, 2)
            .collect(Strategy::Async)
            .await
            .unwrap();
        assert_eq!(names(&collected), ["item-0", "item-1", "item-4"]);
    }

    #[tokio::test]
    async fn test_probe_failure_aborts_without_window_fetches() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let collector = collector_for(&mock_server, 2);

        collector
            .collect(Strategy::Async)
            .await
            .expect_err("a failed probe should abort the collection");
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);

        collector
            .collect(Strategy::Threads)
            .await
            .expect_err("a failed probe should abort the collection");
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);

        collector
            .collect(Strategy::Sequential)
            .await
            .expect_err("a failed first request should abort the collection");
    }

    #[tokio::test]
    async fn test_empty_collection() {
        let mock_server = MockServer::start().await;
        mount_probe(&mock_server, 0).await;

        let collected = collector_for(&mock_server, 2)
            .collect(Strategy::Async)
            .await
            .unwrap();
        assert!(collected.is_empty());
        // only the probe request was issued
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
    }
}
