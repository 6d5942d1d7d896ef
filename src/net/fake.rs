//! Scripted network for tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use url::Position;

use super::client::Fetch;
use super::types::{Request, Response};

/// Answers from a fixed table keyed by `METHOD /path?query`; unknown routes get a 404.
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, Response>>,
  online: AtomicBool,
  calls: Mutex<Vec<String>>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self {
      routes: Mutex::new(HashMap::new()),
      online: AtomicBool::new(true),
      calls: Mutex::new(Vec::new()),
    }
  }

  pub fn respond(&self, method: &str, path: &str, response: Response) -> &Self {
    self
      .routes
      .lock()
      .unwrap()
      .insert(format!("{} {}", method, path), response);
    self
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  /// Every request seen so far, as `METHOD /path?query`.
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  fn route_key(request: &Request) -> String {
    format!("{} {}", request.method, &request.url[Position::BeforePath..])
  }
}

impl Fetch for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let key = Self::route_key(request);
    self.calls.lock().unwrap().push(key.clone());

    if !self.online.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to fetch {}: network unreachable", request.url));
    }

    let response = self.routes.lock().unwrap().get(&key).cloned();
    Ok(response.unwrap_or_else(|| Response::new(404, "Not Found")))
  }
}
