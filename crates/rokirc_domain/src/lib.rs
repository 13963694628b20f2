#![forbid(unsafe_code)]

use core::fmt;

use thiserror::Error;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid character {ch:?} in {value:?}")]
	InvalidChar { value: String, ch: char },
}

/// Upstream network identifier (the server address an operator joined).
///
/// Not validated: an empty identifier is representable because `LeaveServer`
/// forwards whatever the operator typed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkId(String);

impl NetworkId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for NetworkId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// IRC channel name, ASCII-lowercased so lookups match however the server echoes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelName(String);

impl ChannelName {
	/// Create a channel name; rejects empty names and characters IRC forbids.
	pub fn new(name: impl Into<String>) -> Result<Self, ParseIdError> {
		let name = name.into();
		if name.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		if let Some(ch) = name
			.chars()
			.find(|c| c.is_whitespace() || matches!(c, ',' | '\u{7}' | '\0'))
		{
			return Err(ParseIdError::InvalidChar { value: name, ch });
		}
		Ok(Self(name.to_ascii_lowercase()))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ChannelName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Unique channel key: `(network, channel)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
	pub network: NetworkId,
	pub channel: ChannelName,
}

impl ChannelKey {
	pub fn new(network: NetworkId, channel: ChannelName) -> Self {
		Self { network, channel }
	}
}

impl fmt::Display for ChannelKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.network, self.channel)
	}
}
