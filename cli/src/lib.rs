// SPDX-License-Identifier: MIT OR Apache-2.0

//! Headless lanlink consumer: stdin commands and terminal rendering

pub mod command;
pub mod interactive;
pub mod preflight;
pub mod render;

pub use command::{parse_command, Command};
