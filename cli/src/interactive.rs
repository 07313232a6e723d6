// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command loop shared by the host and join modes

use crate::command::{parse_command, Command, HELP};
use lanlink_network::Session;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Why [`run_commands`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The user typed `quit`
    Quit,
    /// Input reached EOF
    EndOfInput,
    /// Reading input failed
    InputError,
}

/// Execute commands read line by line from `input` until `quit`, EOF or a read error
pub async fn run_commands<R>(session: &Session, input: R) -> Exit
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return Exit::EndOfInput,
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                return Exit::InputError;
            }
        };

        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        let sent = match command {
            Command::Send(message) => session.send(&message),
            Command::Raw(line) => session.send_line(&line),
            Command::Peers => {
                println!("{} open connection(s)", session.connection_count());
                continue;
            }
            Command::Help => {
                println!("{}", HELP);
                continue;
            }
            Command::Quit => return Exit::Quit,
        };

        match sent {
            Ok(n) => tracing::debug!(connections = n, "Sent"),
            Err(e) => eprintln!("Failed to send: {}", e),
        }
    }
}
