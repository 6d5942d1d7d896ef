//! The cache worker.
//!
//! One `Worker` exists per process. It owns the partitions of the configured
//! version, runs the install/activate lifecycle and answers fetch, sync,
//! message and push events.

mod clients;
mod messages;
mod notify;
mod router;
mod sync;

pub use clients::{ClientInfo, Clients};
pub use messages::{ClientMessage, MessageOutcome};
pub use notify::{ClickTarget, Notification};
pub use router::{route, Route};
pub use sync::{SyncReport, SyncTag};

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{
  cache_first, carries_version, network_first, network_first_or_offline, CacheResult,
  CacheStorage, CacheWrites, OfflinePage, Partition, PartitionKind, SqliteStorage,
};
use crate::config::Config;
use crate::net::{Destination, Fetch, Request, Response};

/// Lifecycle of a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
  /// Created, not installed yet
  Parsed,
  Installing,
  /// Installed, waiting to activate
  Waiting,
  Activating,
  Active,
  /// Failed to install, or superseded
  Redundant,
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Parsed => "parsed",
      Self::Installing => "installing",
      Self::Waiting => "waiting",
      Self::Activating => "activating",
      Self::Active => "active",
      Self::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionStatus {
  pub name: String,
  pub entries: usize,
  /// Carries the configured version tag
  pub current: bool,
}

/// An order mutation waiting in the outbox.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedOrder {
  pub id: i64,
  pub method: String,
  pub url: String,
  pub attempts: u32,
  pub last_error: Option<String>,
  pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
  pub state: LifecycleState,
  pub version: String,
  pub active_version: Option<String>,
  pub partitions: Vec<PartitionStatus>,
  pub queued_orders: Vec<QueuedOrder>,
  /// Cache writes spawned but not yet reaped
  pub pending_writes: usize,
  pub clients: Vec<ClientInfo>,
}

pub struct Worker<N: Fetch> {
  config: Config,
  origin: Url,
  storage: Arc<SqliteStorage>,
  network: N,
  writes: CacheWrites,
  clients: Clients,
  state: Mutex<LifecycleState>,
  skip_waiting: AtomicBool,
}

impl<N: Fetch> Worker<N> {
  pub fn new(config: Config, storage: SqliteStorage, network: N) -> Result<Self> {
    let origin = config.origin_url()?;

    Ok(Self {
      config,
      origin,
      storage: Arc::new(storage),
      network,
      writes: CacheWrites::new(),
      clients: Clients::new(),
      state: Mutex::new(LifecycleState::Parsed),
      skip_waiting: AtomicBool::new(false),
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn state(&self) -> LifecycleState {
    *self
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn set_state(&self, next: LifecycleState) {
    let mut state = self
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    let previous = *state;
    if previous != next {
      debug!(from = %previous, to = %next, version = %self.config.version, "Lifecycle transition");
      *state = next;
    }
  }

  /// Handle to one of this version's partitions.
  pub fn partition(&self, kind: PartitionKind) -> Partition<SqliteStorage> {
    Partition::new(Arc::clone(&self.storage), self.config.partition_name(kind))
  }

  /// Resolve a path (or absolute URL) against the storefront origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid URL {}: {}", path, e))
  }

  fn offline_page(&self) -> Result<OfflinePage<SqliteStorage>> {
    let request = Request::get(self.resolve(&self.config.offline_page)?, Destination::Document);
    Ok(OfflinePage::new(self.partition(PartitionKind::Static), request))
  }

  /// Bring the worker up at process start.
  ///
  /// If this version already completed activation, it is active right away.
  /// Otherwise it installs and, once skip-waiting was signalled, activates.
  pub async fn boot(&self) -> Result<()> {
    if self.restore()? {
      return Ok(());
    }

    match &self.storage.active_version()? {
      Some(previous) => info!(previous = %previous, version = %self.config.version, "Installing new worker version"),
      None => info!(version = %self.config.version, "Installing worker"),
    }

    self.install().await?;
    if self.skip_waiting.load(Ordering::SeqCst) {
      self.activate()?;
    }

    Ok(())
  }

  /// Mark the worker active if this version already activated on an earlier
  /// run. Never touches the network.
  pub fn restore(&self) -> Result<bool> {
    let active = self.storage.active_version()?;
    if active.as_deref() != Some(self.config.version.as_str()) {
      return Ok(false);
    }

    debug!(version = %self.config.version, "Worker version already active");
    self.set_state(LifecycleState::Active);
    Ok(true)
  }

  /// Precache the shell into the static partition. All or nothing.
  pub async fn install(&self) -> Result<()> {
    self.set_state(LifecycleState::Installing);

    match self.precache().await {
      Ok(count) => {
        info!(count, partition = %self.config.partition_name(PartitionKind::Static), "Precached shell assets");
        self.skip_waiting();
        self.set_state(LifecycleState::Waiting);
        Ok(())
      }
      Err(e) => {
        error!(error = %e, version = %self.config.version, "Install failed");
        self.set_state(LifecycleState::Redundant);
        Err(e)
      }
    }
  }

  async fn precache(&self) -> Result<usize> {
    let requests = self
      .config
      .precache
      .iter()
      .map(|path| Ok(Request::get(self.resolve(path)?, Destination::Empty)))
      .collect::<Result<Vec<_>>>()?;

    let network = &self.network;
    let entries = try_join_all(requests.into_iter().map(|request| async move {
      let response = network.fetch(&request).await?;
      if !response.is_cacheable() {
        return Err(eyre!(
          "Precache of {} returned HTTP {}",
          request.url,
          response.status
        ));
      }
      Ok::<_, color_eyre::Report>((request, response))
    }))
    .await?;

    for kind in PartitionKind::ALL {
      let partition = self.partition(kind);
      if !self.storage.has_partition(partition.name())? {
        partition.open()?;
        debug!(partition = partition.name(), "Opened partition");
      }
    }
    self.partition(PartitionKind::Static).put_all(&entries)?;

    Ok(entries.len())
  }

  /// Ask to activate without waiting for open clients to close.
  pub fn skip_waiting(&self) {
    self.skip_waiting.store(true, Ordering::SeqCst);
  }

  /// Evict partitions of other versions and claim all clients.
  /// Returns the names of the evicted partitions.
  pub fn activate(&self) -> Result<Vec<String>> {
    self.set_state(LifecycleState::Activating);

    match self.evict_stale_partitions() {
      Ok(evicted) => {
        self.storage.set_active_version(&self.config.version)?;
        let claimed = self.clients.claim(&self.config.version);
        self.set_state(LifecycleState::Active);
        info!(
          version = %self.config.version,
          evicted = evicted.len(),
          claimed,
          "Worker activated"
        );
        Ok(evicted)
      }
      Err(e) => {
        error!(error = %e, "Activation failed");
        self.set_state(LifecycleState::Redundant);
        Err(e)
      }
    }
  }

  fn evict_stale_partitions(&self) -> Result<Vec<String>> {
    let mut evicted = Vec::new();
    for name in self.storage.partition_names()? {
      if !carries_version(&name, &self.config.version) {
        self.storage.delete_partition(&name)?;
        info!(partition = %name, "Evicted stale partition");
        evicted.push(name);
      }
    }
    Ok(evicted)
  }

  /// Answer a request.
  pub async fn handle_fetch(&self, request: &Request) -> Result<CacheResult<Response>> {
    if self.state() != LifecycleState::Active {
      debug!(url = %request.url, state = %self.state(), "Worker not active, passing through");
      return self.passthrough(request).await;
    }

    let route = route(request, &self.origin, &self.config.api_prefix);
    debug!(method = %request.method, url = %request.url, ?route, "Routing request");

    let fetcher = || self.network.fetch(request);
    let result = match route {
      Route::Passthrough => return self.passthrough(request).await,
      Route::NetworkFirst(kind) => {
        network_first(&self.partition(kind), request, &self.writes, fetcher).await
      }
      Route::CacheFirst(kind) => {
        cache_first(&self.partition(kind), request, &self.writes, fetcher).await
      }
      Route::Navigation(kind) => {
        let offline = self.offline_page()?;
        Ok(network_first_or_offline(&self.partition(kind), request, &self.writes, &offline, fetcher).await)
      }
    };

    if result.is_err() {
      self.queue_if_order(request);
    }

    result
  }

  async fn passthrough(&self, request: &Request) -> Result<CacheResult<Response>> {
    self
      .network
      .fetch(request)
      .await
      .map(CacheResult::passthrough)
  }

  fn queue_if_order(&self, request: &Request) {
    if request.is_get() || !sync::matches_any(request.path(), &self.config.sync.order_paths) {
      return;
    }

    match self.storage.enqueue(request) {
      Ok(id) => info!(id, method = %request.method, url = %request.url, "Queued order for background sync"),
      Err(e) => warn!(url = %request.url, error = %e, "Failed to queue order"),
    }
  }

  /// Handle a background sync event.
  pub async fn handle_sync(&self, tag: &str) -> Result<SyncReport> {
    let report = match SyncTag::parse(tag) {
      SyncTag::Cart => {
        sync::replay_cart(
          &self.partition(PartitionKind::Dynamic),
          &self.network,
          &self.config.sync.cart_patterns,
        )
        .await?
      }
      SyncTag::Order => sync::replay_orders(&self.storage, &self.network).await?,
      SyncTag::Unknown(tag) => {
        debug!(tag = %tag, "Ignoring unknown sync tag");
        return Ok(SyncReport::default());
      }
    };

    info!(tag, replayed = report.replayed, remaining = report.remaining, "Background sync finished");
    Ok(report)
  }

  /// Handle a message posted by a page.
  pub fn handle_message(&self, payload: &Value) -> Result<MessageOutcome> {
    match ClientMessage::parse(payload) {
      Some(ClientMessage::SkipWaiting) => {
        self.skip_waiting();
        if self.state() == LifecycleState::Waiting {
          self.activate()?;
          Ok(MessageOutcome::Activated)
        } else {
          Ok(MessageOutcome::NothingWaiting)
        }
      }
      Some(ClientMessage::ClearCache) => Ok(MessageOutcome::CachesCleared(self.clear_caches()?)),
      Some(ClientMessage::Unknown) | None => {
        debug!(%payload, "Ignoring message");
        Ok(MessageOutcome::Ignored)
      }
    }
  }

  /// Delete every partition regardless of version.
  pub fn clear_caches(&self) -> Result<Vec<String>> {
    let names = self.storage.partition_names()?;
    for name in &names {
      self.storage.delete_partition(name)?;
    }
    warn!(count = names.len(), "Cleared all caches");
    Ok(names)
  }

  /// Handle a push event.
  pub fn handle_push(&self, payload: Option<&str>) -> Notification {
    let notification = Notification::from_push(&self.config.notifications, payload);
    info!(title = %notification.title, body = %notification.body, "Showing notification");
    notification
  }

  /// Handle a click on a shown notification (`action` is `None` for the body).
  pub fn handle_notification_click(&self, action: Option<&str>) -> Result<Option<ClientInfo>> {
    match ClickTarget::for_action(&self.config.notifications, action) {
      ClickTarget::Open(path) => {
        let url = self.resolve(&path)?;
        let client = self.clients.open_window(url.as_str(), self.controller());
        info!(url = %client.url, client = client.id, "Opened window from notification");
        Ok(Some(client))
      }
      ClickTarget::Dismiss => Ok(None),
    }
  }

  /// Register a page opened by the user.
  pub fn open_client(&self, path: &str) -> Result<ClientInfo> {
    let url = self.resolve(path)?;
    Ok(self.clients.register(url.as_str(), self.controller()))
  }

  fn controller(&self) -> Option<&str> {
    (self.state() == LifecycleState::Active).then_some(self.config.version.as_str())
  }

  pub fn status(&self) -> Result<Status> {
    let partitions = self
      .storage
      .partition_names()?
      .into_iter()
      .map(|name| {
        Ok(PartitionStatus {
          entries: self.storage.entry_count(&name)?,
          current: carries_version(&name, &self.config.version),
          name,
        })
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(Status {
      state: self.state(),
      version: self.config.version.clone(),
      active_version: self.storage.active_version()?,
      partitions,
      queued_orders: self
        .storage
        .queued()?
        .into_iter()
        .map(|entry| QueuedOrder {
          id: entry.id,
          method: entry.request.method,
          url: entry.request.url.to_string(),
          attempts: entry.attempts,
          last_error: entry.last_error,
          queued_at: entry.queued_at,
        })
        .collect(),
      pending_writes: self.writes.pending(),
      clients: self.clients.list(),
    })
  }

  /// Wait for outstanding cache writes.
  pub async fn settle(&self) {
    self.writes.settle().await;
  }
}
