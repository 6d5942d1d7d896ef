use color_eyre::{eyre::eyre, Report, Result};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Declared resource kind of a request, as a page would report it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Destination {
  /// Full page navigation
  Document,
  Image,
  Style,
  Script,
  Font,
  /// Anything else (fetch/XHR calls, manifests, ...)
  #[default]
  Empty,
}

impl Destination {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Document => "document",
      Self::Image => "image",
      Self::Style => "style",
      Self::Script => "script",
      Self::Font => "font",
      Self::Empty => "empty",
    }
  }
}

impl fmt::Display for Destination {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Destination {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_lowercase().as_str() {
      "document" | "navigate" | "page" => Ok(Self::Document),
      "image" | "img" => Ok(Self::Image),
      "style" | "css" => Ok(Self::Style),
      "script" | "js" => Ok(Self::Script),
      "font" => Ok(Self::Font),
      "" | "empty" | "other" => Ok(Self::Empty),
      other => Err(eyre!("Unknown resource kind: {}", other)),
    }
  }
}

/// A request as seen by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  /// Uppercase HTTP method
  pub method: String,
  pub url: Url,
  pub destination: Destination,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: &str, url: Url, destination: Destination) -> Self {
    Self {
      method: method.trim().to_uppercase(),
      url,
      destination,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(url: Url, destination: Destination) -> Self {
    Self::new("GET", url, destination)
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn is_get(&self) -> bool {
    self.method == "GET"
  }

  pub fn path(&self) -> &str {
    self.url.path()
  }
}

/// Snapshot of a response: status, headers and the fully read body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// 2xx status.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Only an exact 200 is ever written to a partition.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}
