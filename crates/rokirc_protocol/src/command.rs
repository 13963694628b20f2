#![forbid(unsafe_code)]

use core::fmt;

/// Control verbs understood by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
	JoinServer,
	LeaveServer,
	JoinChannel,
	LeaveChannel,
	SetChat,
	GenMessage,
	EndSession,
}

impl Verb {
	/// Every verb, in help-listing order.
	pub const ALL: [Verb; 7] = [
		Verb::JoinServer,
		Verb::LeaveServer,
		Verb::JoinChannel,
		Verb::LeaveChannel,
		Verb::SetChat,
		Verb::GenMessage,
		Verb::EndSession,
	];

	/// Canonical spelling.
	pub const fn as_str(self) -> &'static str {
		match self {
			Verb::JoinServer => "JoinServer",
			Verb::LeaveServer => "LeaveServer",
			Verb::JoinChannel => "JoinChannel",
			Verb::LeaveChannel => "LeaveChannel",
			Verb::SetChat => "SetChat",
			Verb::GenMessage => "GenMessage",
			Verb::EndSession => "EndSession",
		}
	}

	/// Lowercase label for metrics.
	pub const fn label(self) -> &'static str {
		match self {
			Verb::JoinServer => "joinserver",
			Verb::LeaveServer => "leaveserver",
			Verb::JoinChannel => "joinchannel",
			Verb::LeaveChannel => "leavechannel",
			Verb::SetChat => "setchat",
			Verb::GenMessage => "genmessage",
			Verb::EndSession => "endsession",
		}
	}

	/// Argument synopsis shown in usage lines, for verbs that take arguments.
	pub const fn synopsis(self) -> Option<&'static str> {
		match self {
			Verb::JoinServer => Some("server port nick auth"),
			Verb::LeaveServer => Some("server"),
			Verb::JoinChannel | Verb::LeaveChannel | Verb::GenMessage => Some("server channel"),
			Verb::SetChat | Verb::EndSession => None,
		}
	}

	/// Case-insensitive lookup.
	pub fn parse(s: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|v| v.as_str().eq_ignore_ascii_case(s))
	}
}

impl fmt::Display for Verb {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One control line split into its verb and raw argument remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command<'a> {
	/// First space-delimited token, as typed.
	pub verb: &'a str,
	/// Everything after the first space, untouched.
	pub args: &'a str,
}

impl<'a> Command<'a> {
	/// Split a line; `None` for an empty line.
	pub fn parse(line: &'a str) -> Option<Self> {
		if line.is_empty() {
			return None;
		}

		let (verb, args) = line.split_once(' ').unwrap_or((line, ""));
		Some(Self { verb, args })
	}

	/// Resolved verb, if known.
	pub fn verb(&self) -> Option<Verb> {
		Verb::parse(self.verb)
	}

	/// Argument tokens per [`split_args`].
	pub fn arg_tokens(&self) -> Vec<&'a str> {
		split_args(self.args)
	}
}

/// Split an argument remainder into tokens.
///
/// Splits on every single space and drops trailing empty tokens. An empty remainder
/// yields one empty token; a remainder of only spaces yields none.
pub fn split_args(args: &str) -> Vec<&str> {
	if args.is_empty() {
		return vec![""];
	}

	let mut tokens: Vec<&str> = args.split(' ').collect();
	while tokens.last().is_some_and(|t| t.is_empty()) {
		tokens.pop();
	}
	tokens
}
