//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;
use url::Url;

use super::traits::{CachedEntry, Cacheable};
use crate::net::{Destination, Request, Response};

/// Trait for partitioned cache storage backends.
///
/// Implementations must be safe to share between concurrently running
/// strategies; concurrent writes to the same request are last-write-wins.
pub trait CacheStorage: Send + Sync {
  /// Create the partition if it does not exist.
  fn open_partition(&self, name: &str) -> Result<()>;

  fn has_partition(&self, name: &str) -> Result<bool>;

  /// Names of every existing partition, sorted.
  fn partition_names(&self) -> Result<Vec<String>>;

  /// Drop a partition with all of its entries. Returns whether it existed.
  fn delete_partition(&self, name: &str) -> Result<bool>;

  /// Get the stored response for a request, if any.
  fn lookup(&self, partition: &str, request: &Request) -> Result<Option<CachedEntry>>;

  /// Store a response, replacing any previous entry for the same request.
  /// Creates the partition on demand.
  fn store(&self, partition: &str, request: &Request, response: &Response) -> Result<()>;

  /// Store all pairs in one transaction.
  fn store_all(&self, partition: &str, entries: &[(Request, Response)]) -> Result<()>;

  /// Remove the entry for a request. Returns whether one existed.
  fn remove(&self, partition: &str, request: &Request) -> Result<bool>;

  /// Requests with a stored entry, oldest first.
  fn requests(&self, partition: &str) -> Result<Vec<Request>>;

  fn entry_count(&self, partition: &str) -> Result<usize>;
}

/// An order mutation waiting in the outbox.
#[derive(Debug, Clone)]
pub struct QueuedRequest {
  pub id: i64,
  pub request: Request,
  pub attempts: u32,
  pub last_error: Option<String>,
  pub queued_at: DateTime<Utc>,
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Database that lives only as long as the process.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Version whose activation completed most recently.
  pub fn active_version(&self) -> Result<Option<String>> {
    let conn = self.lock()?;

    conn
      .query_row(
        "SELECT value FROM registration WHERE key = 'active_version'",
        [],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read active version: {}", e))
  }

  pub fn set_active_version(&self, version: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO registration (key, value) VALUES ('active_version', ?)",
        params![version],
      )
      .map_err(|e| eyre!("Failed to record active version: {}", e))?;

    Ok(())
  }

  /// Append a request to the order outbox.
  pub fn enqueue(&self, request: &Request) -> Result<i64> {
    let conn = self.lock()?;
    let headers = encode_headers(&request.headers)?;

    conn
      .execute(
        "INSERT INTO outbox (method, url, request_headers, body, queued_at)
         VALUES (?, ?, ?, ?, datetime('now'))",
        params![request.method, request.url.as_str(), headers, request.body],
      )
      .map_err(|e| eyre!("Failed to queue {} {}: {}", request.method, request.url, e))?;

    Ok(conn.last_insert_rowid())
  }

  /// Queued requests in arrival order.
  pub fn queued(&self) -> Result<Vec<QueuedRequest>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT id, method, url, request_headers, body, attempts, last_error, queued_at
         FROM outbox ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare outbox query: {}", e))?;

    #[allow(clippy::type_complexity)]
    let rows: Vec<(i64, String, String, String, Option<Vec<u8>>, u32, Option<String>, String)> =
      stmt
        .query_map([], |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
          ))
        })
        .map_err(|e| eyre!("Failed to query outbox: {}", e))?
        .collect::<rusqlite::Result<_>>()
        .map_err(|e| eyre!("Failed to read outbox row: {}", e))?;

    let mut queued = Vec::with_capacity(rows.len());
    for (id, method, url, headers, body, attempts, last_error, queued_at) in rows {
      let url = match Url::parse(&url) {
        Ok(url) => url,
        Err(e) => {
          warn!(id, url, error = %e, "Skipping outbox row with invalid URL");
          continue;
        }
      };
      let mut request = Request::new(&method, url, Destination::Empty);
      request.headers = decode_headers(&headers)?;
      request.body = body;

      queued.push(QueuedRequest {
        id,
        request,
        attempts,
        last_error,
        queued_at: parse_datetime(&queued_at)?,
      });
    }

    Ok(queued)
  }

  /// Remove a request from the outbox after it was delivered.
  pub fn dequeue(&self, id: i64) -> Result<bool> {
    let conn = self.lock()?;

    let removed = conn
      .execute("DELETE FROM outbox WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to dequeue outbox entry {}: {}", id, e))?;

    Ok(removed > 0)
  }

  /// Record a failed delivery attempt.
  pub fn record_attempt(&self, id: i64, error: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "UPDATE outbox SET attempts = attempts + 1, last_error = ? WHERE id = ?",
        params![error, id],
      )
      .map_err(|e| eyre!("Failed to update outbox entry {}: {}", id, e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per named partition
CREATE TABLE IF NOT EXISTS partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses, one per request identity per partition
CREATE TABLE IF NOT EXISTS entries (
    partition TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    destination TEXT NOT NULL,
    request_headers TEXT NOT NULL,
    status INTEGER NOT NULL,
    response_headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition, request_key)
);

CREATE INDEX IF NOT EXISTS idx_entries_partition ON entries(partition);

-- Order mutations waiting for connectivity
CREATE TABLE IF NOT EXISTS outbox (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    request_headers TEXT NOT NULL,
    body BLOB,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Worker registration state
CREATE TABLE IF NOT EXISTS registration (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

impl CacheStorage for SqliteStorage {
  fn open_partition(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open partition {}: {}", name, e))?;

    Ok(())
  }

  fn has_partition(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM partitions WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to check partition {}: {}", name, e))?;

    Ok(count > 0)
  }

  fn partition_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM partitions ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;

    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE partition = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;

    let removed = tx
      .execute("DELETE FROM partitions WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn lookup(&self, partition: &str, request: &Request) -> Result<Option<CachedEntry>> {
    // Only GET identities are ever stored
    if !request.is_get() {
      return Ok(None);
    }

    let conn = self.lock()?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, response_headers, body, cached_at FROM entries
         WHERE partition = ? AND request_key = ?",
        params![partition, request.cache_key()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", request.url, partition, e))?;

    match row {
      Some((status, headers, body, cached_at)) => Ok(Some(CachedEntry {
        response: Response {
          status,
          headers: decode_headers(&headers)?,
          body,
        },
        cached_at: parse_datetime(&cached_at)?,
      })),
      None => Ok(None),
    }
  }

  fn store(&self, partition: &str, request: &Request, response: &Response) -> Result<()> {
    let conn = self.lock()?;
    insert_entry(&conn, partition, request, response)
  }

  fn store_all(&self, partition: &str, entries: &[(Request, Response)]) -> Result<()> {
    let conn = self.lock()?;

    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (request, response) in entries {
      insert_entry(&tx, partition, request, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn remove(&self, partition: &str, request: &Request) -> Result<bool> {
    let conn = self.lock()?;

    let removed = conn
      .execute(
        "DELETE FROM entries WHERE partition = ? AND request_key = ?",
        params![partition, request.cache_key()],
      )
      .map_err(|e| eyre!("Failed to delete {} from {}: {}", request.url, partition, e))?;

    Ok(removed > 0)
  }

  fn requests(&self, partition: &str) -> Result<Vec<Request>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT method, url, destination, request_headers FROM entries
         WHERE partition = ?
         ORDER BY cached_at, rowid",
      )
      .map_err(|e| eyre!("Failed to prepare entry query: {}", e))?;

    let rows: Vec<(String, String, String, String)> = stmt
      .query_map(params![partition], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .map_err(|e| eyre!("Failed to query entries: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    let mut requests = Vec::with_capacity(rows.len());
    for (method, url, destination, headers) in rows {
      let url = match Url::parse(&url) {
        Ok(url) => url,
        Err(e) => {
          warn!(partition, url, error = %e, "Skipping entry with invalid URL");
          continue;
        }
      };
      let destination = destination.parse().unwrap_or_default();
      let mut request = Request::new(&method, url, destination);
      request.headers = decode_headers(&headers)?;
      requests.push(request);
    }

    Ok(requests)
  }

  fn entry_count(&self, partition: &str) -> Result<usize> {
    let conn = self.lock()?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE partition = ?",
        params![partition],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", partition, e))?;

    Ok(count as usize)
  }
}

fn insert_entry(
  conn: &Connection,
  partition: &str,
  request: &Request,
  response: &Response,
) -> Result<()> {
  if !request.is_get() {
    return Err(eyre!(
      "Only GET requests can be cached, got {} {}",
      request.method,
      request.url
    ));
  }

  let request_headers = encode_headers(&request.headers)?;
  let response_headers = encode_headers(&response.headers)?;

  conn
    .execute(
      "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
      params![partition],
    )
    .map_err(|e| eyre!("Failed to open partition {}: {}", partition, e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO entries
         (partition, request_key, method, url, destination, request_headers,
          status, response_headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        partition,
        request.cache_key(),
        request.method,
        request.url.as_str(),
        request.destination.as_str(),
        request_headers,
        response.status,
        response_headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in {}: {}", request.url, partition, e))?;

  Ok(())
}

fn encode_headers(headers: &[(String, String)]) -> Result<String> {
  serde_json::to_string(headers).map_err(|e| eyre!("Failed to serialize headers: {}", e))
}

fn decode_headers(s: &str) -> Result<Vec<(String, String)>> {
  serde_json::from_str(s).map_err(|e| eyre!("Failed to deserialize headers: {}", e))
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn get(path: &str) -> Request {
    let url = Url::parse("http://localhost:3000").unwrap().join(path).unwrap();
    Request::get(url, Destination::Empty)
  }

  #[test]
  fn test_store_and_lookup() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let request = get("/api/products");
    let response = Response::new(200, r#"[{"id":1}]"#).with_header("Content-Type", "application/json");

    storage.store("dyn", &request, &response).unwrap();

    let entry = storage.lookup("dyn", &request).unwrap().unwrap();
    assert_eq!(entry.response, response);
    assert!(storage.has_partition("dyn").unwrap());
    assert!(storage.lookup("other", &request).unwrap().is_none());
  }

  #[test]
  fn test_last_write_wins() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let request = get("/api/products");

    storage.store("dyn", &request, &Response::new(200, "old")).unwrap();
    storage.store("dyn", &request, &Response::new(200, "new")).unwrap();

    let entry = storage.lookup("dyn", &request).unwrap().unwrap();
    assert_eq!(entry.response.text(), "new");
    assert_eq!(storage.entry_count("dyn").unwrap(), 1);
  }

  #[test]
  fn test_non_get_requests_are_rejected() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let post = Request::new("POST", get("/api/cart").url, Destination::Empty);

    assert!(storage.store("dyn", &post, &Response::new(200, "")).is_err());
    assert!(storage.lookup("dyn", &post).unwrap().is_none());
  }

  #[test]
  fn test_store_all_is_atomic() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let post = Request::new("POST", get("/bad").url, Destination::Empty);
    let entries = vec![
      (get("/"), Response::new(200, "home")),
      (post, Response::new(200, "nope")),
    ];

    assert!(storage.store_all("static", &entries).is_err());
    assert!(storage.lookup("static", &get("/")).unwrap().is_none());
  }

  #[test]
  fn test_delete_partition_drops_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.store("a", &get("/x"), &Response::new(200, "x")).unwrap();
    storage.open_partition("b").unwrap();

    assert_eq!(storage.partition_names().unwrap(), vec!["a", "b"]);
    assert!(storage.delete_partition("a").unwrap());
    assert!(!storage.delete_partition("a").unwrap());
    assert_eq!(storage.partition_names().unwrap(), vec!["b"]);
    assert_eq!(storage.entry_count("a").unwrap(), 0);
  }

  #[test]
  fn test_requests_round_trip_metadata() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let request = Request::get(get("/logo.png").url, Destination::Image)
      .with_header("Accept", "image/png");
    storage.store("img", &request, &Response::new(200, vec![1, 2, 3])).unwrap();
    assert!(storage.remove("img", &get("/missing")).is_ok_and(|removed| !removed));

    let requests = storage.requests("img").unwrap();
    assert_eq!(requests, vec![request.clone()]);

    assert!(storage.remove("img", &request).unwrap());
    assert!(storage.requests("img").unwrap().is_empty());
  }

  #[test]
  fn test_outbox_lifecycle() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let order = Request::new("POST", get("/api/orders").url, Destination::Empty)
      .with_header("Content-Type", "application/json")
      .with_body(r#"{"sku":"A1"}"#);

    let id = storage.enqueue(&order).unwrap();
    storage.record_attempt(id, "connection refused").unwrap();

    let queued = storage.queued().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].request, order);
    assert_eq!(queued[0].attempts, 1);
    assert_eq!(queued[0].last_error.as_deref(), Some("connection refused"));

    assert!(storage.dequeue(id).unwrap());
    assert!(storage.queued().unwrap().is_empty());
  }

  #[test]
  fn test_active_version_persists_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let storage = SqliteStorage::open(&path).unwrap();
      assert_eq!(storage.active_version().unwrap(), None);
      storage.set_active_version("v3").unwrap();
    }

    let storage = SqliteStorage::open(&path).unwrap();
    assert_eq!(storage.active_version().unwrap().as_deref(), Some("v3"));
  }
}
