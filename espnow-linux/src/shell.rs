//! Line commands read from stdin.

use espnow_core::{MacAddress, MacParseError};

pub const HELP: &str = "commands: add <name> <mac> [channel] | remove <name> | send <name> <text> | sendall <text> | bcast <text> | peers | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add {
        name: String,
        mac: MacAddress,
        channel: Option<u8>,
    },
    Remove { name: String },
    Send { name: String, text: String },
    SendAll { text: String },
    Broadcast { text: String },
    Peers,
    Help,
    Quit,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("bad mac: {0}")]
    Mac(#[from] MacParseError),
    #[error("bad channel {0:?}")]
    Channel(String),
}

/// Parse one line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = split_word(line);
    let cmd = match verb {
        "add" => {
            let mut words = rest.split_whitespace();
            let (Some(name), Some(mac)) = (words.next(), words.next()) else {
                return Err(CommandError::Usage("add <name> <mac> [channel]"));
            };
            let channel = match words.next() {
                Some(c) => Some(
                    c.parse::<u8>()
                        .map_err(|_| CommandError::Channel(c.to_string()))?,
                ),
                None => None,
            };
            if words.next().is_some() {
                return Err(CommandError::Usage("add <name> <mac> [channel]"));
            }
            Command::Add {
                name: name.to_string(),
                mac: mac.parse()?,
                channel,
            }
        }
        "remove" | "rm" => {
            if rest.is_empty() || rest.contains(char::is_whitespace) {
                return Err(CommandError::Usage("remove <name>"));
            }
            Command::Remove {
                name: rest.to_string(),
            }
        }
        "send" => {
            let (name, text) = split_word(rest);
            if name.is_empty() {
                return Err(CommandError::Usage("send <name> <text>"));
            }
            Command::Send {
                name: name.to_string(),
                text: text.to_string(),
            }
        }
        "sendall" => Command::SendAll {
            text: rest.to_string(),
        },
        "bcast" => Command::Broadcast {
            text: rest.to_string(),
        },
        "peers" => Command::Peers,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(cmd))
}

/// First whitespace-separated word and the trimmed remainder.
fn split_word(s: &str) -> (&str, &str) {
    match s.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim()),
        None => (s, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_with_and_without_channel() {
        assert_eq!(
            parse_command("add lamp 24:0a:c4:00:00:01").unwrap(),
            Some(Command::Add {
                name: "lamp".into(),
                mac: "24:0a:c4:00:00:01".parse().unwrap(),
                channel: None,
            })
        );
        assert_eq!(
            parse_command("  add lamp 24:0a:c4:00:00:01 11 ").unwrap(),
            Some(Command::Add {
                name: "lamp".into(),
                mac: "24:0a:c4:00:00:01".parse().unwrap(),
                channel: Some(11),
            })
        );
    }

    #[test]
    fn add_errors() {
        assert!(matches!(parse_command("add lamp"), Err(CommandError::Usage(_))));
        assert!(matches!(
            parse_command("add lamp 24:0a:c4:00:00"),
            Err(CommandError::Mac(_))
        ));
        assert_eq!(
            parse_command("add lamp 24:0a:c4:00:00:01 300"),
            Err(CommandError::Channel("300".into()))
        );
    }

    #[test]
    fn send_keeps_text_spacing() {
        assert_eq!(
            parse_command("send lamp turn  on").unwrap(),
            Some(Command::Send {
                name: "lamp".into(),
                text: "turn  on".into(),
            })
        );
        assert!(matches!(parse_command("send"), Err(CommandError::Usage(_))));
    }

    #[test]
    fn simple_commands() {
        assert_eq!(parse_command("").unwrap(), None);
        assert_eq!(parse_command("peers").unwrap(), Some(Command::Peers));
        assert_eq!(parse_command("quit").unwrap(), Some(Command::Quit));
        assert_eq!(
            parse_command("remove lamp").unwrap(),
            Some(Command::Remove { name: "lamp".into() })
        );
        assert_eq!(
            parse_command("bcast hi all").unwrap(),
            Some(Command::Broadcast { text: "hi all".into() })
        );
        assert_eq!(
            parse_command("frobnicate"),
            Err(CommandError::Unknown("frobnicate".into()))
        );
    }
}
