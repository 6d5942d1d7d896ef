//! Fetch strategies that decide between cached and live responses.
//!
//! Every strategy works against the partition it is handed. Successful
//! (status 200) network responses are written back through [`CacheWrites`]
//! without delaying the caller.

use color_eyre::Result;
use std::future::Future;
use tracing::{debug, warn};

use super::partition::Partition;
use super::storage::CacheStorage;
use super::traits::{CacheResult, CachedEntry};
use super::writes::CacheWrites;
use crate::net::{Request, Response};

/// Served when a navigation fails and the offline page itself is not cached.
const BUILTIN_OFFLINE_PAGE: &str = "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Offline</title></head>\
<body><h1>You are offline</h1><p>Check your connection and try again.</p></body></html>\n";

/// Cache-first.
///
/// 1. Return a stored response if there is one (no revalidation)
/// 2. Otherwise fetch from network and store a 200 response
/// 3. If the network fails, check the partition once more before giving up
pub async fn cache_first<S, F, Fut>(
  partition: &Partition<S>,
  request: &Request,
  writes: &CacheWrites,
  fetcher: F,
) -> Result<CacheResult<Response>>
where
  S: CacheStorage + 'static,
  F: FnOnce() -> Fut,
  Fut: Future<Output = Result<Response>>,
{
  if let Some(entry) = cached(partition, request) {
    debug!(partition = partition.name(), url = %request.url, "Cache hit");
    return Ok(CacheResult::from_cache(entry.response, entry.cached_at));
  }

  match fetcher().await {
    Ok(response) => {
      store_if_cacheable(partition, request, &response, writes);
      Ok(CacheResult::from_network(response))
    }
    Err(err) => match cached(partition, request) {
      Some(entry) => Ok(CacheResult::offline(entry.response, entry.cached_at)),
      None => Err(err),
    },
  }
}

/// Network-first.
///
/// Any network response is returned (only a 200 is stored). When the
/// network fails the partition is consulted; a miss propagates the failure.
pub async fn network_first<S, F, Fut>(
  partition: &Partition<S>,
  request: &Request,
  writes: &CacheWrites,
  fetcher: F,
) -> Result<CacheResult<Response>>
where
  S: CacheStorage + 'static,
  F: FnOnce() -> Fut,
  Fut: Future<Output = Result<Response>>,
{
  match fetcher().await {
    Ok(response) => {
      store_if_cacheable(partition, request, &response, writes);
      Ok(CacheResult::from_network(response))
    }
    Err(err) => {
      debug!(url = %request.url, error = %err, "Network failed, trying cache");
      match cached(partition, request) {
        Some(entry) => Ok(CacheResult::offline(entry.response, entry.cached_at)),
        None => Err(err),
      }
    }
  }
}

/// Network-first for navigations: never fails, the offline page is the
/// last resort.
pub async fn network_first_or_offline<S, F, Fut>(
  partition: &Partition<S>,
  request: &Request,
  writes: &CacheWrites,
  offline: &OfflinePage<S>,
  fetcher: F,
) -> CacheResult<Response>
where
  S: CacheStorage + 'static,
  F: FnOnce() -> Fut,
  Fut: Future<Output = Result<Response>>,
{
  match network_first(partition, request, writes, fetcher).await {
    Ok(result) => result,
    Err(err) => {
      debug!(url = %request.url, error = %err, "Serving offline page");
      offline.response()
    }
  }
}

/// Where the offline document lives.
pub struct OfflinePage<S: CacheStorage> {
  partition: Partition<S>,
  request: Request,
}

impl<S: CacheStorage> OfflinePage<S> {
  pub fn new(partition: Partition<S>, request: Request) -> Self {
    Self { partition, request }
  }

  /// The cached offline document, or a minimal built-in page if it was
  /// never precached.
  pub fn response(&self) -> CacheResult<Response> {
    match cached(&self.partition, &self.request) {
      Some(entry) => CacheResult::offline_page(entry.response, Some(entry.cached_at)),
      None => {
        warn!(url = %self.request.url, "Offline page missing from cache");
        let response = Response::new(503, BUILTIN_OFFLINE_PAGE)
          .with_header("Content-Type", "text/html; charset=utf-8");
        CacheResult::offline_page(response, None)
      }
    }
  }
}

/// Lookup that treats a storage error as a miss.
fn cached<S: CacheStorage>(partition: &Partition<S>, request: &Request) -> Option<CachedEntry> {
  match partition.lookup(request) {
    Ok(entry) => entry,
    Err(e) => {
      warn!(partition = partition.name(), url = %request.url, error = %e, "Cache lookup failed");
      None
    }
  }
}

fn store_if_cacheable<S: CacheStorage + 'static>(
  partition: &Partition<S>,
  request: &Request,
  response: &Response,
  writes: &CacheWrites,
) {
  if response.is_cacheable() && request.is_get() {
    writes.put(partition, request, response);
  } else {
    debug!(url = %request.url, status = response.status, "Response not cached");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, SqliteStorage};
  use crate::net::fake::FakeNetwork;
  use crate::net::{Destination, Fetch};
  use color_eyre::eyre::eyre;
  use std::sync::Arc;
  use url::Url;

  fn request(path: &str, destination: Destination) -> Request {
    let url = Url::parse("http://localhost:3000").unwrap().join(path).unwrap();
    Request::get(url, destination)
  }

  fn partition(name: &str) -> Partition<SqliteStorage> {
    Partition::new(Arc::new(SqliteStorage::open_in_memory().unwrap()), name)
  }

  #[tokio::test]
  async fn test_cache_first_serves_image_offline_after_first_fetch() {
    let network = FakeNetwork::new();
    network.respond("GET", "/img/shoe.png", Response::new(200, vec![0x89, 0x50]));
    let images = partition("images");
    let writes = CacheWrites::new();
    let req = request("/img/shoe.png", Destination::Image);

    let first = cache_first(&images, &req, &writes, || network.fetch(&req))
      .await
      .unwrap();
    assert_eq!(first.source, CacheSource::Network);
    writes.settle().await;

    network.set_online(false);
    let second = cache_first(&images, &req, &writes, || network.fetch(&req))
      .await
      .unwrap();
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(second.data.body, vec![0x89, 0x50]);
    // The hit never touched the network
    assert_eq!(network.calls().len(), 1);
  }

  #[tokio::test]
  async fn test_cache_first_miss_while_offline_propagates() {
    let network = FakeNetwork::new();
    network.set_online(false);
    let images = partition("images");
    let writes = CacheWrites::new();
    let req = request("/img/hat.png", Destination::Image);

    let result = cache_first(&images, &req, &writes, || network.fetch(&req)).await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_cache_first_rechecks_cache_after_network_failure() {
    let images = partition("images");
    let writes = CacheWrites::new();
    let req = request("/img/bag.png", Destination::Image);

    // Slot filled between the first lookup and the failing fetch
    let result = cache_first(&images, &req, &writes, || {
      images.put(&req, &Response::new(200, "late")).unwrap();
      async { Err(eyre!("network unreachable")) }
    })
    .await
    .unwrap();

    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data.text(), "late");
  }

  #[tokio::test]
  async fn test_non_200_responses_are_never_stored() {
    let network = FakeNetwork::new();
    network.respond("GET", "/api/products/9", Response::new(404, "gone"));
    network.respond("GET", "/api/moved", Response::new(301, ""));
    let dynamic = partition("dynamic");
    let writes = CacheWrites::new();

    for path in ["/api/products/9", "/api/moved"] {
      let req = request(path, Destination::Empty);
      let result = network_first(&dynamic, &req, &writes, || network.fetch(&req))
        .await
        .unwrap();
      assert_eq!(result.source, CacheSource::Network);
    }
    writes.settle().await;

    network.set_online(false);
    let req = request("/api/products/9", Destination::Empty);
    assert!(dynamic.lookup(&req).unwrap().is_none());
    assert!(network_first(&dynamic, &req, &writes, || network.fetch(&req))
      .await
      .is_err());
  }

  #[tokio::test]
  async fn test_network_first_prefers_fresh_data() {
    let network = FakeNetwork::new();
    let dynamic = partition("dynamic");
    let writes = CacheWrites::new();
    let req = request("/api/products", Destination::Empty);
    dynamic.put(&req, &Response::new(200, "stale")).unwrap();

    network.respond("GET", "/api/products", Response::new(200, "fresh"));
    let result = network_first(&dynamic, &req, &writes, || network.fetch(&req))
      .await
      .unwrap();
    assert_eq!(result.data.text(), "fresh");
    writes.settle().await;

    network.set_online(false);
    let result = network_first(&dynamic, &req, &writes, || network.fetch(&req))
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data.text(), "fresh");
  }

  #[tokio::test]
  async fn test_offline_fallback_is_idempotent() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let dynamic = Partition::new(Arc::clone(&storage), "dynamic");
    let shell = Partition::new(storage, "static");
    let offline_req = request("/offline.html", Destination::Document);
    shell
      .put(&offline_req, &Response::new(200, "<h1>Offline</h1>"))
      .unwrap();
    let offline = OfflinePage::new(shell, offline_req);

    let network = FakeNetwork::new();
    network.set_online(false);
    let writes = CacheWrites::new();
    let req = request("/checkout", Destination::Document);

    let first =
      network_first_or_offline(&dynamic, &req, &writes, &offline, || network.fetch(&req)).await;
    let second =
      network_first_or_offline(&dynamic, &req, &writes, &offline, || network.fetch(&req)).await;

    assert_eq!(first.source, CacheSource::OfflinePage);
    assert_eq!(first.data.text(), "<h1>Offline</h1>");
    assert_eq!(first.data, second.data);
  }

  #[tokio::test]
  async fn test_offline_fallback_without_precached_page() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let dynamic = Partition::new(Arc::clone(&storage), "dynamic");
    let offline = OfflinePage::new(
      Partition::new(storage, "static"),
      request("/offline.html", Destination::Document),
    );
    let writes = CacheWrites::new();
    let req = request("/", Destination::Document);

    let result = network_first_or_offline(&dynamic, &req, &writes, &offline, || async {
      Err(eyre!("network unreachable"))
    })
    .await;

    assert_eq!(result.source, CacheSource::OfflinePage);
    assert_eq!(result.data.status, 503);
    assert!(result.data.text().contains("You are offline"));
  }
}
