//! Network side of the worker: request/response snapshots and the HTTP client.

mod client;
#[cfg(test)]
pub mod fake;
mod types;

pub use client::{Fetch, HttpClient};
pub use types::{Destination, Request, Response};
