//! A core module for interacting with the listing API.
//!
//! Usually, you prefer to use the [`crate::collector`] module,
//! which wraps these single-page getters.

use reqwest::{blocking, Client, StatusCode, Url};
use serde::Deserialize;
use thiserror::Error;

/// One opaque record as returned by the API.
///
/// The collector never looks inside an item, it only moves them around.
pub type Item = serde_json::Map<String, serde_json::Value>;

/// The JSON structure of one listing page.
///
/// The API answers every `?offset=&limit=` request with
/// `{count, next, results: [...]}`.
#[non_exhaustive]
#[derive(Debug, Deserialize)]
pub struct Page {
    /// The total number of items in the whole collection,
    /// not just in this page.
    pub count: u64,
    /// The URL of the next page. `None` on the last page.
    #[serde(default)]
    pub next: Option<String>,
    /// The items of this page.
    /// `None` if the payload carries no `results` key at all,
    /// which the collector treats as a malformed page.
    #[serde(default)]
    pub results: Option<Vec<Item>>,
}

/// The error returned by a single page fetch.
///
/// Always carries the offending URL for diagnostics.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum FetchError {
    /// The request never completed (connection refused, DNS, etc.).
    #[error("request to `{url}` failed: {source}")]
    Request {
        /// The URL the request was sent to.
        url: Url,
        /// The underlying client error.
        source: reqwest::Error,
    },
    /// The server answered with a non-2xx status.
    #[error("`{url}` returned status {status}")]
    Status {
        /// The URL the request was sent to.
        url: Url,
        /// The status the server answered with.
        status: StatusCode,
    },
    /// The response body was not a listing page.
    #[error("failed to decode the response from `{url}`: {source}")]
    Decode {
        /// The URL the request was sent to.
        url: Url,
        /// The underlying decode error.
        source: reqwest::Error,
    },
}

/// GET `url` and decode the response as a listing [`Page`].
///
/// # Errors
///
/// If the request fails, the server answers with a non-2xx status,
/// or the body is not a listing page, this function will return an error.
pub async fn fetch(client: &Client, url: Url) -> Result<Page, FetchError> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|source| FetchError::Request {
            url: url.clone(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status { url, status });
    }

    response
        .json()
        .await
        .map_err(|source| FetchError::Decode { url, source })
}

/// Blocking twin of [`fetch`], used by the worker threads of the
/// `threads` strategy.
///
/// Must not be called from an async context, `reqwest` will panic.
pub fn fetch_blocking(client: &blocking::Client, url: Url) -> Result<Page, FetchError> {
    let response = client
        .get(url.clone())
        .send()
        .map_err(|source| FetchError::Request {
            url: url.clone(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status { url, status });
    }

    response
        .json()
        .map_err(|source| FetchError::Decode { url, source })
}

/// Build the URL of one `(offset, limit)` page request.
pub(crate) fn page_url(base: &Url, offset: u64, limit: u64) -> Url {
    let mut target_url = base.clone();
    target_url.query_pairs_mut().extend_pairs([
        ("offset", offset.to_string()),
        ("limit", limit.to_string()),
    ]);
    target_url
}

/// A Consuming-Builders style function to get one page from the listing API.
///
/// # Example
///
/// ```no_run
/// use reqwest::{Client, Url};
/// use pagedump::api::Getter;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::new();
///     let base = Url::parse("https://pokeapi.co/api/v2/pokemon/")?;
///
///     let page = Getter::build(&client, &base, 0, 200)?.run().await?;
///
///     Ok(())
/// }
/// ```
pub struct Getter<'a> {
    client: &'a Client,
    base: &'a Url,
    offset: u64,
    limit: u64,
}

impl Getter<'_> {
    /// `offset` and `limit` become the query parameters of the request.
    ///
    /// # Errors
    ///
    /// If `limit` is `0`, this function will return an error.
    pub fn build<'a>(
        client: &'a Client,
        base: &'a Url,
        offset: u64,
        limit: u64,
    ) -> anyhow::Result<Getter<'a>> {
        if limit == 0 {
            return Err(anyhow::anyhow!("Limit cannot be 0"));
        }
        Ok(Getter {
            client,
            base,
            offset,
            limit,
        })
    }

    /// Send the request to the listing API and get the decoded page.
    ///
    /// # Errors
    ///
    /// See [`fetch`].
    pub async fn run(self) -> Result<Page, FetchError> {
        fetch(self.client, page_url(self.base, self.offset, self.limit)).await
    }
}

/// Blocking twin of [`Getter`], used by the worker threads of the
/// `threads` strategy.
pub struct BlockingGetter<'a> {
    client: &'a blocking::Client,
    base: &'a Url,
    offset: u64,
    limit: u64,
}

impl BlockingGetter<'_> {
    /// See [`Getter::build`] for arguments.
    ///
    /// # Errors
    ///
    /// If `limit` is `0`, this function will return an error.
    pub fn build<'a>(
        client: &'a blocking::Client,
        base: &'a Url,
        offset: u64,
        limit: u64,
    ) -> anyhow::Result<BlockingGetter<'a>> {
        if limit == 0 {
            return Err(anyhow::anyhow!("Limit cannot be 0"));
        }
        Ok(BlockingGetter {
            client,
            base,
            offset,
            limit,
        })
    }

    /// Send the request to the listing API and get the decoded page.
    ///
    /// # Errors
    ///
    /// See [`fetch_blocking`].
    pub fn run(self) -> Result<Page, FetchError> {
        fetch_blocking(self.client, page_url(self.base, self.offset, self.limit))
    }
}
