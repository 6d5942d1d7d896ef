/// Commands understood by the interactive host, with alias resolution
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};

use crate::net::Destination;

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub usage: &'static str,
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "install",
    aliases: &["i"],
    usage: "install [--force]",
    description: "Install and activate the configured version",
  },
  Command {
    name: "fetch",
    aliases: &["f", "get"],
    usage: "fetch <url> [kind]",
    description: "GET a URL through the worker (kind: document, image, style, script, font)",
  },
  Command {
    name: "post",
    aliases: &[],
    usage: "post <url> [body]",
    description: "POST a body through the worker",
  },
  Command {
    name: "sync",
    aliases: &["s"],
    usage: "sync <tag>",
    description: "Fire a background sync (sync-cart, sync-order)",
  },
  Command {
    name: "message",
    aliases: &["m", "msg"],
    usage: "message <TYPE|json>",
    description: "Post a message to the worker (SKIP_WAITING, CLEAR_CACHE)",
  },
  Command {
    name: "push",
    aliases: &[],
    usage: "push [text]",
    description: "Deliver a push event",
  },
  Command {
    name: "click",
    aliases: &["c"],
    usage: "click [action]",
    description: "Click the last notification (explore, close, or the body)",
  },
  Command {
    name: "open",
    aliases: &["o"],
    usage: "open <path>",
    description: "Open a client window",
  },
  Command {
    name: "status",
    aliases: &["st"],
    usage: "status",
    description: "Show lifecycle state, partitions and queued orders",
  },
  Command {
    name: "help",
    aliases: &["h", "?"],
    usage: "help",
    description: "List commands",
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    usage: "quit",
    description: "Exit shellcache",
  },
];

/// A parsed command, shared by the CLI and the interactive host.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
  Install { force: bool },
  Fetch {
    url: String,
    method: String,
    kind: Destination,
    body: Option<String>,
  },
  Sync { tag: String },
  Message { payload: Value },
  Push { body: Option<String> },
  Click { action: Option<String> },
  Open { path: String },
  Status,
  Help,
  Quit,
}

fn ranked(input: &str) -> Vec<(&'static Command, u32)> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().map(|cmd| (cmd, 0)).collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    // Exact match on name
    if cmd.name == input_lower {
      matches.push((cmd, 0)); // Highest priority
      continue;
    }

    // Exact match on alias
    if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
      continue;
    }

    // Prefix match on name
    if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 2));
      continue;
    }

    // Prefix match on alias
    if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
      continue;
    }

    // Fuzzy match (contains)
    if cmd.name.contains(&input_lower) {
      matches.push((cmd, 4));
    }
  }

  // Sort by priority
  matches.sort_by_key(|(_, priority)| *priority);
  matches
}

/// Get suggestions for a partially typed command
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  ranked(input).into_iter().map(|(cmd, _)| cmd).collect()
}

/// Resolve a command word. Fuzzy and ambiguous prefix matches do not resolve.
pub fn resolve(input: &str) -> Option<&'static Command> {
  if input.is_empty() {
    return None;
  }

  let matches = ranked(input);
  let (best, priority) = *matches.first()?;
  if priority >= 4 {
    return None;
  }

  let tied = matches.iter().filter(|(_, p)| *p == priority).count();
  (priority < 2 || tied == 1).then_some(best)
}

pub fn help() -> String {
  COMMANDS
    .iter()
    .map(|cmd| format!("  {:<22} {}", cmd.usage, cmd.description))
    .collect::<Vec<_>>()
    .join("\n")
}

/// Turn a `message` argument into a payload: JSON as-is, anything else as `{"type": arg}`.
pub fn message_payload(arg: &str) -> Result<Value> {
  let arg = arg.trim();
  if arg.starts_with('{') {
    serde_json::from_str(arg).map_err(|e| eyre!("Invalid message JSON: {}", e))
  } else {
    Ok(json!({ "type": arg }))
  }
}

/// Split off the first word; the rest keeps its inner spacing.
fn split_word(s: &str) -> (&str, &str) {
  let s = s.trim_start();
  match s.find(char::is_whitespace) {
    Some(idx) => (&s[..idx], s[idx..].trim()),
    None => (s, ""),
  }
}

fn non_empty(s: &str) -> Option<String> {
  (!s.is_empty()).then(|| s.to_string())
}

/// Parse one input line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Invocation>> {
  let line = line.trim();
  if line.is_empty() || line.starts_with('#') {
    return Ok(None);
  }

  let (word, rest) = split_word(line);
  let command = resolve(word).ok_or_else(|| {
    let suggestions: Vec<&str> = get_suggestions(word).iter().map(|cmd| cmd.name).collect();
    if suggestions.is_empty() {
      eyre!("Unknown command: {} (try `help`)", word)
    } else {
      eyre!("Unknown command: {} (did you mean {}?)", word, suggestions.join(", "))
    }
  })?;

  let invocation = match command.name {
    "install" => Invocation::Install {
      force: rest == "--force",
    },
    "fetch" => {
      let (url, kind) = split_word(rest);
      if url.is_empty() {
        return Err(eyre!("Usage: {}", command.usage));
      }
      Invocation::Fetch {
        url: url.to_string(),
        method: "GET".to_string(),
        kind: kind.parse()?,
        body: None,
      }
    }
    "post" => {
      let (url, body) = split_word(rest);
      if url.is_empty() {
        return Err(eyre!("Usage: {}", command.usage));
      }
      Invocation::Fetch {
        url: url.to_string(),
        method: "POST".to_string(),
        kind: Destination::Empty,
        body: non_empty(body),
      }
    }
    "sync" => {
      if rest.is_empty() {
        return Err(eyre!("Usage: {}", command.usage));
      }
      Invocation::Sync {
        tag: rest.to_string(),
      }
    }
    "message" => {
      if rest.is_empty() {
        return Err(eyre!("Usage: {}", command.usage));
      }
      Invocation::Message {
        payload: message_payload(rest)?,
      }
    }
    "push" => Invocation::Push {
      body: non_empty(rest),
    },
    "click" => Invocation::Click {
      action: non_empty(rest),
    },
    "open" => Invocation::Open {
      path: non_empty(rest).unwrap_or_else(|| "/".to_string()),
    },
    "status" => Invocation::Status,
    "help" => Invocation::Help,
    _ => Invocation::Quit,
  };

  Ok(Some(invocation))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_input_returns_all() {
    let suggestions = get_suggestions("");
    assert_eq!(suggestions.len(), COMMANDS.len());
  }

  #[test]
  fn test_exact_and_alias_match() {
    assert_eq!(resolve("fetch").unwrap().name, "fetch");
    assert_eq!(resolve("get").unwrap().name, "fetch");
    assert_eq!(resolve("s").unwrap().name, "sync");
    assert_eq!(resolve("exit").unwrap().name, "quit");
  }

  #[test]
  fn test_prefix_match() {
    assert_eq!(resolve("mess").unwrap().name, "message");
    assert_eq!(resolve("pu").unwrap().name, "push");
    // "p" is a prefix of both push and post
    assert!(resolve("p").is_none());
  }

  #[test]
  fn test_fuzzy_match_suggests_but_does_not_resolve() {
    let suggestions = get_suggestions("tall");
    assert_eq!(suggestions[0].name, "install");
    assert!(resolve("tall").is_none());
  }

  #[test]
  fn test_parse_fetch() {
    let invocation = parse_line("fetch /img/hero.jpg image").unwrap().unwrap();
    assert_eq!(
      invocation,
      Invocation::Fetch {
        url: "/img/hero.jpg".to_string(),
        method: "GET".to_string(),
        kind: Destination::Image,
        body: None,
      }
    );

    assert!(parse_line("fetch").is_err());
    assert!(parse_line("fetch /x video").is_err());
  }

  #[test]
  fn test_parse_post_keeps_body_spacing() {
    let invocation = parse_line(r#"post /api/orders {"sku": "A1", "qty": 2}"#)
      .unwrap()
      .unwrap();
    match invocation {
      Invocation::Fetch { method, body, .. } => {
        assert_eq!(method, "POST");
        assert_eq!(body.as_deref(), Some(r#"{"sku": "A1", "qty": 2}"#));
      }
      other => panic!("unexpected invocation: {other:?}"),
    }
  }

  #[test]
  fn test_parse_message_forms() {
    assert_eq!(
      parse_line("message CLEAR_CACHE").unwrap(),
      Some(Invocation::Message {
        payload: json!({"type": "CLEAR_CACHE"})
      })
    );
    assert_eq!(
      parse_line(r#"msg {"type":"SKIP_WAITING"}"#).unwrap(),
      Some(Invocation::Message {
        payload: json!({"type": "SKIP_WAITING"})
      })
    );
    assert!(parse_line("message {oops").is_err());
  }

  #[test]
  fn test_parse_misc() {
    assert_eq!(parse_line("   ").unwrap(), None);
    assert_eq!(parse_line("# comment").unwrap(), None);
    assert_eq!(
      parse_line("push").unwrap(),
      Some(Invocation::Push { body: None })
    );
    assert_eq!(
      parse_line("click explore").unwrap(),
      Some(Invocation::Click {
        action: Some("explore".to_string())
      })
    );
    assert_eq!(
      parse_line("install --force").unwrap(),
      Some(Invocation::Install { force: true })
    );
    assert!(parse_line("launch").is_err());
    let ambiguous = parse_line("p /x").unwrap_err().to_string();
    assert_eq!(ambiguous, "Unknown command: p (did you mean post, push, open, help?)");
  }
}
