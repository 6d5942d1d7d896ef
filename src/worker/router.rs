//! Request classification.

use url::Url;

use crate::cache::PartitionKind;
use crate::net::{Destination, Request};

/// How a request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Straight to the network, never intercepted
  Passthrough,
  NetworkFirst(PartitionKind),
  CacheFirst(PartitionKind),
  /// Network-first, falling back to the offline page
  Navigation(PartitionKind),
}

/// Pick the strategy for a request. The first matching rule wins.
pub fn route(request: &Request, origin: &Url, api_prefix: &str) -> Route {
  if request.url.origin() != origin.origin() {
    return Route::Passthrough;
  }

  if request.path().starts_with(api_prefix) {
    return Route::NetworkFirst(PartitionKind::Dynamic);
  }

  match request.destination {
    Destination::Image => Route::CacheFirst(PartitionKind::Image),
    Destination::Document => Route::Navigation(PartitionKind::Dynamic),
    Destination::Style | Destination::Script | Destination::Font => {
      Route::CacheFirst(PartitionKind::Static)
    }
    Destination::Empty => Route::NetworkFirst(PartitionKind::Dynamic),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn origin() -> Url {
    Url::parse("http://localhost:3000").unwrap()
  }

  fn classify(url: &str, destination: Destination) -> Route {
    let request = Request::get(Url::parse(url).unwrap(), destination);
    route(&request, &origin(), "/api/")
  }

  #[test]
  fn test_cross_origin_is_never_intercepted() {
    assert_eq!(
      classify("https://cdn.example.com/logo.png", Destination::Image),
      Route::Passthrough
    );
    assert_eq!(
      classify("http://localhost:4000/", Destination::Document),
      Route::Passthrough
    );
    assert_eq!(
      classify("data:text/plain,hello", Destination::Empty),
      Route::Passthrough
    );
  }

  #[test]
  fn test_api_prefix_beats_destination() {
    assert_eq!(
      classify("http://localhost:3000/api/products/1/image", Destination::Image),
      Route::NetworkFirst(PartitionKind::Dynamic)
    );
    assert_eq!(
      classify("http://localhost:3000/api/orders", Destination::Document),
      Route::NetworkFirst(PartitionKind::Dynamic)
    );
  }

  #[test]
  fn test_destination_rules() {
    assert_eq!(
      classify("http://localhost:3000/img/hero.jpg", Destination::Image),
      Route::CacheFirst(PartitionKind::Image)
    );
    assert_eq!(
      classify("http://localhost:3000/checkout", Destination::Document),
      Route::Navigation(PartitionKind::Dynamic)
    );
    for destination in [Destination::Style, Destination::Script, Destination::Font] {
      assert_eq!(
        classify("http://localhost:3000/assets/app.bin", destination),
        Route::CacheFirst(PartitionKind::Static)
      );
    }
    assert_eq!(
      classify("http://localhost:3000/manifest.json", Destination::Empty),
      Route::NetworkFirst(PartitionKind::Dynamic)
    );
  }

  #[test]
  fn test_prefix_match_is_literal() {
    // "/apiary" is not under "/api/"
    assert_eq!(
      classify("http://localhost:3000/apiary.png", Destination::Image),
      Route::CacheFirst(PartitionKind::Image)
    );
  }
}
