#![forbid(unsafe_code)]

//! Upstream IRC message model: `[@tags] [:prefix] command params... [:trailing]`.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
	/// Server name or `nick!user@host`.
	pub prefix: Option<String>,
	pub command: String,
	/// The trailing parameter, if any, is the last element.
	pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageParseError {
	#[error("empty message")]
	Empty,
	#[error("missing command")]
	MissingCommand,
}

impl Message {
	pub fn new<I, S>(command: impl Into<String>, params: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			prefix: None,
			command: command.into(),
			params: params.into_iter().map(Into::into).collect(),
		}
	}

	/// Parse one line without its terminator. IRCv3 tags are skipped.
	pub fn parse(line: &str) -> Result<Self, MessageParseError> {
		let mut rest = line.trim_end_matches(['\r', '\n']);

		if rest.starts_with('@') {
			rest = match rest.split_once(' ') {
				Some((_tags, after)) => after.trim_start_matches(' '),
				None => return Err(MessageParseError::MissingCommand),
			};
		}

		if rest.is_empty() {
			return Err(MessageParseError::Empty);
		}

		let prefix = match rest.strip_prefix(':') {
			Some(after) => {
				let (prefix, after) = after.split_once(' ').ok_or(MessageParseError::MissingCommand)?;
				rest = after.trim_start_matches(' ');
				Some(prefix.to_string())
			}
			None => None,
		};

		let (command, mut params_str) = rest.split_once(' ').unwrap_or((rest, ""));
		if command.is_empty() {
			return Err(MessageParseError::MissingCommand);
		}

		let mut params = Vec::new();
		while !params_str.is_empty() {
			if let Some(trailing) = params_str.strip_prefix(':') {
				params.push(trailing.to_string());
				break;
			}
			match params_str.split_once(' ') {
				Some((param, after)) => {
					if !param.is_empty() {
						params.push(param.to_string());
					}
					params_str = after;
				}
				None => {
					params.push(params_str.to_string());
					break;
				}
			}
		}

		Ok(Self {
			prefix,
			command: command.to_ascii_uppercase(),
			params,
		})
	}

	/// Nickname part of a `nick!user@host` prefix.
	pub fn source_nick(&self) -> Option<&str> {
		let prefix = self.prefix.as_deref()?;
		Some(prefix.split_once('!').map_or(prefix, |(nick, _)| nick))
	}

	/// Wire form without terminator. The last parameter is always sent as trailing.
	pub fn to_wire(&self) -> String {
		let mut out = String::new();
		if let Some(prefix) = &self.prefix {
			out.push(':');
			out.push_str(prefix);
			out.push(' ');
		}
		out.push_str(&self.command);

		let last = self.params.len().saturating_sub(1);
		for (idx, param) in self.params.iter().enumerate() {
			out.push(' ');
			if idx == last {
				out.push(':');
			}
			out.push_str(param);
		}
		out
	}
}

impl fmt::Display for Message {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_wire())
	}
}

/// Remove mIRC formatting codes (bold, italics, underline, reverse, reset, colors).
pub fn strip_formatting(text: &str) -> String {
	let mut out = String::with_capacity(text.len());
	let mut chars = text.chars().peekable();

	while let Some(c) = chars.next() {
		match c {
			'\u{2}' | '\u{1d}' | '\u{1f}' | '\u{1e}' | '\u{11}' | '\u{16}' | '\u{f}' => {}
			'\u{3}' => {
				if skip_digits(&mut chars) > 0 && chars.peek() == Some(&',') {
					let mut lookahead = chars.clone();
					lookahead.next();
					if lookahead.peek().is_some_and(char::is_ascii_digit) {
						chars.next();
						skip_digits(&mut chars);
					}
				}
			}
			other => out.push(other),
		}
	}
	out
}

/// Skip up to two color digits, returning how many were skipped.
fn skip_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> usize {
	let mut skipped = 0;
	while skipped < 2 && chars.peek().is_some_and(char::is_ascii_digit) {
		chars.next();
		skipped += 1;
	}
	skipped
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_privmsg_with_prefix() {
		let msg = Message::parse(":alice!a@host PRIVMSG #rust :hello there").unwrap();
		assert_eq!(msg.prefix.as_deref(), Some("alice!a@host"));
		assert_eq!(msg.source_nick(), Some("alice"));
		assert_eq!(msg.command, "PRIVMSG");
		assert_eq!(msg.params, vec!["#rust", "hello there"]);
	}

	#[test]
	fn parse_numeric_and_ping() {
		let msg = Message::parse(":irc.example.org 001 mybot :Welcome").unwrap();
		assert_eq!(msg.command, "001");
		assert_eq!(msg.params, vec!["mybot", "Welcome"]);

		let ping = Message::parse("PING :irc.example.org\r\n").unwrap();
		assert_eq!(ping.command, "PING");
		assert_eq!(ping.params, vec!["irc.example.org"]);
	}

	#[test]
	fn parse_skips_tags_and_uppercases_command() {
		let msg = Message::parse("@badge-info=;color=#FF0000 :bob!b@h privmsg #chan :hi").unwrap();
		assert_eq!(msg.command, "PRIVMSG");
		assert_eq!(msg.source_nick(), Some("bob"));
		assert_eq!(msg.params, vec!["#chan", "hi"]);
	}

	#[test]
	fn parse_trailing_edge_cases() {
		assert_eq!(Message::parse("TOPIC #c :").unwrap().params, vec!["#c", ""]);
		assert_eq!(Message::parse("PRIVMSG #c ::)").unwrap().params, vec!["#c", ":)"]);
		assert_eq!(Message::parse("MODE #c  +o x").unwrap().params, vec!["#c", "+o", "x"]);
	}

	#[test]
	fn parse_errors() {
		assert_eq!(Message::parse(""), Err(MessageParseError::Empty));
		assert_eq!(Message::parse(":prefix"), Err(MessageParseError::MissingCommand));
		assert_eq!(Message::parse("@tags"), Err(MessageParseError::MissingCommand));
	}

	#[test]
	fn wire_form_uses_trailing_for_last_param() {
		assert_eq!(Message::new("QUIT", Vec::<String>::new()).to_wire(), "QUIT");
		assert_eq!(Message::new("JOIN", ["#rust"]).to_wire(), "JOIN :#rust");
		assert_eq!(
			Message::new("USER", ["rokirc", "0", "*", "rokirc bot"]).to_wire(),
			"USER rokirc 0 * :rokirc bot"
		);
	}

	#[test]
	fn strips_formatting_codes() {
		assert_eq!(strip_formatting("\u{2}bold\u{2} text"), "bold text");
		assert_eq!(strip_formatting("\u{3}04,12red\u{f} plain"), "red plain");
		assert_eq!(strip_formatting("\u{3}3green"), "green");
		assert_eq!(strip_formatting("score\u{3},5"), "score,5");
	}
}
