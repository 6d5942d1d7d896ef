//! Open client contexts (tabs/windows) the worker can control.

use serde::Serialize;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
  pub id: u64,
  pub url: String,
  pub focused: bool,
  /// Version of the worker controlling this client, if any
  pub controller: Option<String>,
}

#[derive(Default)]
struct Registry {
  next_id: u64,
  clients: Vec<ClientInfo>,
}

#[derive(Default)]
pub struct Clients {
  inner: Mutex<Registry>,
}

impl Clients {
  pub fn new() -> Self {
    Self::default()
  }

  fn registry(&self) -> MutexGuard<'_, Registry> {
    self
      .inner
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Track a client that was opened outside the worker.
  pub fn register(&self, url: &str, controller: Option<&str>) -> ClientInfo {
    let mut registry = self.registry();
    registry.next_id += 1;
    let client = ClientInfo {
      id: registry.next_id,
      url: url.to_string(),
      focused: false,
      controller: controller.map(String::from),
    };
    registry.clients.push(client.clone());
    client
  }

  /// Take control of every open client. Returns how many changed controller.
  pub fn claim(&self, version: &str) -> usize {
    let mut registry = self.registry();
    let mut claimed = 0;
    for client in &mut registry.clients {
      if client.controller.as_deref() != Some(version) {
        client.controller = Some(version.to_string());
        claimed += 1;
      }
    }
    claimed
  }

  /// Focus the client showing `url`, or open a new one there.
  pub fn open_window(&self, url: &str, controller: Option<&str>) -> ClientInfo {
    let mut registry = self.registry();
    for client in &mut registry.clients {
      client.focused = false;
    }

    if let Some(existing) = registry.clients.iter_mut().find(|c| c.url == url) {
      existing.focused = true;
      return existing.clone();
    }

    registry.next_id += 1;
    let client = ClientInfo {
      id: registry.next_id,
      url: url.to_string(),
      focused: true,
      controller: controller.map(String::from),
    };
    registry.clients.push(client.clone());
    client
  }

  pub fn list(&self) -> Vec<ClientInfo> {
    self.registry().clients.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_claim_takes_over_uncontrolled_and_stale_clients() {
    let clients = Clients::new();
    clients.register("/", None);
    clients.register("/collection", Some("v1"));
    clients.register("/checkout", Some("v2"));

    assert_eq!(clients.claim("v2"), 2);
    assert!(clients
      .list()
      .iter()
      .all(|c| c.controller.as_deref() == Some("v2")));
  }

  #[test]
  fn test_open_window_focuses_existing_client() {
    let clients = Clients::new();
    let home = clients.register("/", Some("v1"));

    let opened = clients.open_window("/collection", Some("v1"));
    assert!(opened.focused);
    assert_ne!(opened.id, home.id);

    let refocused = clients.open_window("/", Some("v1"));
    assert_eq!(refocused.id, home.id);
    assert!(refocused.focused);

    let list = clients.list();
    assert_eq!(list.len(), 2);
    assert_eq!(list.iter().filter(|c| c.focused).count(), 1);
  }
}
