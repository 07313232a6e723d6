// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stdin command grammar for the host and join modes

use anyhow::{anyhow, bail, Context, Result};
use lanlink_core::Message;

/// One line typed by the user
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Send an object placement
    Send(Message),
    /// Send a line verbatim
    Raw(String),
    /// Print the number of open connections
    Peers,
    /// Shut down and exit
    Quit,
    /// Print the command list
    Help,
}

/// Short usage text printed by `help`
pub const HELP: &str = "\
Commands:
  place <id> <x> <y>   send an object placement
  raw <line>           send a line as-is
  peers                show open connections
  quit                 shut down and exit";

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(input: &str) -> Result<Option<Command>> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }

    let (verb, rest) = match input.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (input, ""),
    };

    let command = match verb.to_lowercase().as_str() {
        "place" => {
            let parts: Vec<&str> = rest.split_whitespace().collect();
            let [id, x, y] = parts.as_slice() else {
                bail!("Usage: place <id> <x> <y>");
            };
            let id = id.parse::<i32>().with_context(|| format!("Invalid id: {}", id))?;
            let x = parse_coord(x)?;
            let y = parse_coord(y)?;
            Command::Send(Message::place(id, x, y))
        }
        "raw" => {
            if rest.is_empty() {
                bail!("Usage: raw <line>");
            }
            Command::Raw(rest.to_string())
        }
        "peers" => Command::Peers,
        "quit" | "exit" => Command::Quit,
        "help" | "?" => Command::Help,
        other => return Err(anyhow!("Unknown command '{}', type 'help'", other)),
    };

    Ok(Some(command))
}

fn parse_coord(value: &str) -> Result<f32> {
    match value.parse::<f32>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(anyhow!("Invalid coordinate: {}", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_place() {
        assert_eq!(
            parse_command("place 7 12.5 -3").unwrap(),
            Some(Command::Send(Message::place(7, 12.5, -3.0)))
        );
        assert_eq!(
            parse_command("  PLACE   1 0 0  ").unwrap(),
            Some(Command::Send(Message::place(1, 0.0, 0.0)))
        );
    }

    #[test]
    fn test_parse_other_commands() {
        assert_eq!(parse_command("").unwrap(), None);
        assert_eq!(
            parse_command("raw 2,#ff0000").unwrap(),
            Some(Command::Raw("2,#ff0000".to_string()))
        );
        assert_eq!(parse_command("peers").unwrap(), Some(Command::Peers));
        assert_eq!(parse_command("quit").unwrap(), Some(Command::Quit));
        assert_eq!(parse_command("?").unwrap(), Some(Command::Help));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_command("place 1 2").is_err());
        assert!(parse_command("place x 1 2").is_err());
        assert!(parse_command("place 1 inf 2").is_err());
        assert!(parse_command("raw").is_err());
        assert!(parse_command("jump").is_err());
    }
}
