//! Push notifications and what clicking them does.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::NotificationConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub actions: Vec<NotificationAction>,
  pub arrived_at: DateTime<Utc>,
}

impl Notification {
  /// Build the notification for a push; an absent or blank payload uses the
  /// configured fallback body.
  pub fn from_push(config: &NotificationConfig, payload: Option<&str>) -> Self {
    let body = payload
      .map(str::trim)
      .filter(|text| !text.is_empty())
      .unwrap_or(config.fallback_body.as_str())
      .to_string();

    Self {
      title: config.title.clone(),
      body,
      icon: config.icon.clone(),
      badge: config.badge.clone(),
      vibrate: vec![100, 50, 100],
      actions: vec![
        NotificationAction {
          action: EXPLORE.to_string(),
          title: "View Collection".to_string(),
        },
        NotificationAction {
          action: CLOSE.to_string(),
          title: "Close".to_string(),
        },
      ],
      arrived_at: Utc::now(),
    }
  }
}

const EXPLORE: &str = "explore";
const CLOSE: &str = "close";

/// Result of clicking a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickTarget {
  /// Open or focus a window at this path
  Open(String),
  Dismiss,
}

impl ClickTarget {
  /// `explore` leads to the collection, `close` only dismisses, anything
  /// else (including a click on the body) leads home.
  pub fn for_action(config: &NotificationConfig, action: Option<&str>) -> Self {
    match action.map(str::trim) {
      Some(EXPLORE) => Self::Open(config.action_path.clone()),
      Some(CLOSE) => Self::Dismiss,
      _ => Self::Open(config.default_path.clone()),
    }
  }
}
