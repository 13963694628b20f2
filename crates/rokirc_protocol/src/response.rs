#![forbid(unsafe_code)]

//! Peer-visible response texts.

use core::fmt;

use crate::command::Verb;

pub const INCORRECT_ARG_COUNT: &str = "Error: Incorrect number of arguments.";
pub const INVALID_PORT: &str = "Error: Invalid port.";
pub const SERVER_NOT_JOINED: &str = "Something went wrong. Server not joined.";
pub const SERVER_NOT_YET_JOINED: &str = "Server not yet joined.";
pub const NOT_IMPLEMENTED: &str = "Sorry, this isn't implemented yet.";
pub const TERMINATING: &str = "Terminating connection. IRC manager will keep listening in the meantime.";
pub const CLOSE_FAILED: &str = "Error closing socket. If you see this, something is weird.";
pub const INVALID_VERB: &str = "Invalid argument. Valid arguments are: ";

/// `Usage: <Verb> <synopsis>`.
pub fn usage_line(verb: Verb) -> String {
	match verb.synopsis() {
		Some(synopsis) => format!("Usage: {verb} {synopsis}"),
		None => format!("Usage: {verb}"),
	}
}

/// Comma-separated list of every verb.
pub fn valid_verbs_line() -> String {
	Verb::ALL.iter().map(|v| v.as_str()).collect::<Vec<_>>().join(", ")
}

/// The two-line reply to an unknown verb.
pub fn help_lines() -> [String; 2] {
	[INVALID_VERB.to_string(), valid_verbs_line()]
}

/// The two-line reply to an argument-count mismatch.
pub fn usage_lines(verb: Verb) -> [String; 2] {
	[INCORRECT_ARG_COUNT.to_string(), usage_line(verb)]
}

pub fn join_channel_failed(detail: impl fmt::Display) -> String {
	format!("Error joining channel: {detail}")
}

pub fn generate_failed(detail: impl fmt::Display) -> String {
	format!("Error generating markov message: {detail}")
}

pub fn leave_server_failed(detail: impl fmt::Display) -> String {
	format!("Error leaving server: {detail}")
}
