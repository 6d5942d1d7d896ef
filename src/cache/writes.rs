//! Fire-and-forget cache writes.

use std::sync::{Mutex, MutexGuard};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::partition::Partition;
use super::storage::CacheStorage;
use crate::net::{Request, Response};

/// Background cache writes spawned by strategies.
///
/// The response path never waits on these; failures are logged and dropped.
/// `settle` lets the host drain them before shutting down.
#[derive(Default)]
pub struct CacheWrites {
  tasks: Mutex<JoinSet<()>>,
}

impl CacheWrites {
  pub fn new() -> Self {
    Self::default()
  }

  fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
    // A panic while holding the lock leaves the set itself intact
    self
      .tasks
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Spawn a write of `response` for `request` into `partition`.
  pub fn put<S: CacheStorage + 'static>(
    &self,
    partition: &Partition<S>,
    request: &Request,
    response: &Response,
  ) {
    let partition = partition.clone();
    let request = request.clone();
    let response = response.clone();

    let mut tasks = self.tasks();
    // Reap finished writes so a long-running host does not accumulate them
    while tasks.try_join_next().is_some() {}

    tasks.spawn(async move {
      match partition.put(&request, &response) {
        Ok(()) => debug!(partition = partition.name(), url = %request.url, "Cached response"),
        Err(e) => warn!(
          partition = partition.name(),
          url = %request.url,
          error = %e,
          "Cache write failed"
        ),
      }
    });
  }

  /// Number of writes that have not been reaped yet.
  pub fn pending(&self) -> usize {
    self.tasks().len()
  }

  /// Wait for every spawned write to finish.
  pub async fn settle(&self) {
    let mut tasks = std::mem::take(&mut *self.tasks());

    while let Some(result) = tasks.join_next().await {
      if let Err(e) = result {
        warn!(error = %e, "Cache write task did not complete");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::net::Destination;
  use std::sync::Arc;
  use url::Url;

  #[tokio::test]
  async fn test_settle_waits_for_writes() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let partition = Partition::new(storage, "dyn");
    let writes = CacheWrites::new();
    let request = Request::get(
      Url::parse("http://localhost:3000/api/products").unwrap(),
      Destination::Empty,
    );

    writes.put(&partition, &request, &Response::new(200, "[]"));
    writes.settle().await;

    assert_eq!(writes.pending(), 0);
    assert!(partition.lookup(&request).unwrap().is_some());
  }

  #[tokio::test]
  async fn test_failed_write_is_swallowed() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let partition = Partition::new(storage, "dyn");
    let writes = CacheWrites::new();
    let post = Request::new(
      "POST",
      Url::parse("http://localhost:3000/api/cart").unwrap(),
      Destination::Empty,
    );

    writes.put(&partition, &post, &Response::new(200, "{}"));
    writes.settle().await;

    assert!(partition.requests().unwrap().is_empty());
  }
}
