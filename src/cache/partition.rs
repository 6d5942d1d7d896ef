//! Named partitions and the handle strategies operate on.

use color_eyre::Result;
use std::sync::Arc;

use super::storage::CacheStorage;
use super::traits::CachedEntry;
use crate::net::{Request, Response};

/// The three partitions a worker version owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKind {
  /// Shell assets, styles, scripts and fonts
  Static,
  /// API responses and pages
  Dynamic,
  Image,
}

impl PartitionKind {
  pub const ALL: [PartitionKind; 3] = [Self::Static, Self::Dynamic, Self::Image];

  fn label(&self) -> &'static str {
    match self {
      Self::Static => "static",
      Self::Dynamic => "dynamic",
      Self::Image => "images",
    }
  }

  /// `<prefix>-<kind>-<version>`, e.g. `storefront-static-v1`.
  pub fn partition_name(&self, prefix: &str, version: &str) -> String {
    format!("{}-{}-{}", prefix, self.label(), version)
  }
}

/// Whether a partition name was created by the given version.
pub fn carries_version(name: &str, version: &str) -> bool {
  name
    .strip_suffix(version)
    .is_some_and(|rest| rest.ends_with('-'))
}

/// Handle to one named partition.
pub struct Partition<S: CacheStorage> {
  storage: Arc<S>,
  name: String,
}

impl<S: CacheStorage> Partition<S> {
  pub fn new(storage: Arc<S>, name: impl Into<String>) -> Self {
    Self {
      storage,
      name: name.into(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn open(&self) -> Result<()> {
    self.storage.open_partition(&self.name)
  }

  pub fn lookup(&self, request: &Request) -> Result<Option<CachedEntry>> {
    self.storage.lookup(&self.name, request)
  }

  pub fn put(&self, request: &Request, response: &Response) -> Result<()> {
    self.storage.store(&self.name, request, response)
  }

  /// Store every pair or none of them.
  pub fn put_all(&self, entries: &[(Request, Response)]) -> Result<()> {
    self.storage.store_all(&self.name, entries)
  }

  pub fn delete(&self, request: &Request) -> Result<bool> {
    self.storage.remove(&self.name, request)
  }

  /// Requests currently stored, oldest first.
  pub fn requests(&self) -> Result<Vec<Request>> {
    self.storage.requests(&self.name)
  }
}

impl<S: CacheStorage> Clone for Partition<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      name: self.name.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_partition_names() {
    assert_eq!(
      PartitionKind::Image.partition_name("storefront", "v2"),
      "storefront-images-v2"
    );
    assert_eq!(
      PartitionKind::Dynamic.partition_name("shop", "2024.1"),
      "shop-dynamic-2024.1"
    );
  }

  #[test]
  fn test_carries_version() {
    assert!(carries_version("storefront-static-v2", "v2"));
    assert!(carries_version("storefront-static-build-7", "build-7"));
    assert!(!carries_version("storefront-static-v1", "v2"));
    assert!(!carries_version("storefront-static-v12", "2"));
    assert!(!carries_version("v2", "v2"));
    assert!(!carries_version("legacy-cache", "v2"));
  }
}
