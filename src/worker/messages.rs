use serde::Deserialize;
use serde_json::Value;

/// Commands a page can post to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  /// Activate a waiting worker immediately
  SkipWaiting,
  /// Delete every partition, whatever its version
  ClearCache,
  #[serde(other)]
  Unknown,
}

impl ClientMessage {
  /// `None` for payloads that are not objects with a string `type`.
  pub fn parse(payload: &Value) -> Option<Self> {
    Self::deserialize(payload).ok()
  }
}

/// What the worker did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
  Activated,
  /// SKIP_WAITING while nothing was waiting
  NothingWaiting,
  /// Names of the deleted partitions
  CachesCleared(Vec<String>),
  Ignored,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_known_messages() {
    assert_eq!(
      ClientMessage::parse(&json!({"type": "SKIP_WAITING"})),
      Some(ClientMessage::SkipWaiting)
    );
    assert_eq!(
      ClientMessage::parse(&json!({"type": "CLEAR_CACHE", "extra": true})),
      Some(ClientMessage::ClearCache)
    );
  }

  #[test]
  fn test_other_payloads_are_not_commands() {
    assert_eq!(
      ClientMessage::parse(&json!({"type": "REFRESH"})),
      Some(ClientMessage::Unknown)
    );
    assert_eq!(ClientMessage::parse(&json!({"kind": "CLEAR_CACHE"})), None);
    assert_eq!(ClientMessage::parse(&json!("CLEAR_CACHE")), None);
  }
}
