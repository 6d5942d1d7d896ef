//! Background replay of mutations that failed while offline.
//!
//! Delivery is at-least-once: an entry is only dropped after the server
//! answered with a 2xx, and no idempotency key is attached.

use color_eyre::Result;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::cache::{CacheStorage, Partition, SqliteStorage};
use crate::net::{Fetch, Request};

/// Recognized background sync tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTag {
  /// `sync-cart`
  Cart,
  /// `sync-order`
  Order,
  Unknown(String),
}

impl SyncTag {
  pub fn parse(tag: &str) -> Self {
    match tag.trim() {
      "sync-cart" => Self::Cart,
      "sync-order" => Self::Order,
      other => Self::Unknown(other.to_string()),
    }
  }
}

/// Outcome of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  /// Entries delivered and removed
  pub replayed: usize,
  /// Entries left for a later sync
  pub remaining: usize,
}

pub fn matches_any(path: &str, patterns: &[String]) -> bool {
  patterns.iter().any(|pattern| path.starts_with(pattern.as_str()))
}

/// Replay every cart/checkout request stored in the dynamic partition.
pub async fn replay_cart<S, N>(
  partition: &Partition<S>,
  network: &N,
  patterns: &[String],
) -> Result<SyncReport>
where
  S: CacheStorage,
  N: Fetch,
{
  let pending: Vec<Request> = partition
    .requests()?
    .into_iter()
    .filter(|request| matches_any(request.path(), patterns))
    .collect();

  if pending.is_empty() {
    debug!("No pending cart requests");
    return Ok(SyncReport::default());
  }

  info!(count = pending.len(), "Replaying cart requests");

  let attempts = join_all(pending.iter().map(|request| async move {
    (request, network.fetch(request).await)
  }))
  .await;

  let mut report = SyncReport::default();
  for (request, outcome) in attempts {
    match outcome {
      Ok(response) if response.is_ok() => {
        partition.delete(request)?;
        report.replayed += 1;
      }
      Ok(response) => {
        warn!(url = %request.url, status = response.status, "Cart replay rejected, keeping entry");
        report.remaining += 1;
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "Cart replay failed, keeping entry");
        report.remaining += 1;
      }
    }
  }

  Ok(report)
}

/// Deliver queued order mutations from the outbox.
pub async fn replay_orders<N: Fetch>(storage: &SqliteStorage, network: &N) -> Result<SyncReport> {
  let queued = storage.queued()?;

  if queued.is_empty() {
    debug!("Order outbox is empty");
    return Ok(SyncReport::default());
  }

  info!(count = queued.len(), "Replaying queued orders");

  let attempts = join_all(queued.iter().map(|entry| async move {
    (entry, network.fetch(&entry.request).await)
  }))
  .await;

  let mut report = SyncReport::default();
  for (entry, outcome) in attempts {
    let error = match outcome {
      Ok(response) if response.is_ok() => {
        storage.dequeue(entry.id)?;
        report.replayed += 1;
        continue;
      }
      Ok(response) => format!("HTTP {}", response.status),
      Err(e) => e.to_string(),
    };

    warn!(
      id = entry.id,
      url = %entry.request.url,
      attempts = entry.attempts + 1,
      error = %error,
      "Order replay failed, keeping in outbox"
    );
    storage.record_attempt(entry.id, &error)?;
    report.remaining += 1;
  }

  Ok(report)
}
