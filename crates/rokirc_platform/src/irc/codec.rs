#![forbid(unsafe_code)]

use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use super::message::{Message, MessageParseError};

/// Longest accepted line excluding its terminator.
pub const MAX_LINE_LENGTH: usize = 8191;

#[derive(Debug, Error)]
pub enum CodecError {
	#[error("line too long: {0} bytes")]
	LineTooLong(usize),
	#[error("parse error: {0}")]
	Parse(#[from] MessageParseError),
	#[error("i/o error: {0}")]
	Io(#[from] std::io::Error),
}

/// Frames upstream IRC traffic. Lines end in `\n` with an optional `\r`; blank lines are skipped.
#[derive(Debug, Default)]
pub struct IrcCodec {
	next_index: usize,
}

impl IrcCodec {
	pub fn new() -> Self {
		Self::default()
	}
}

impl Decoder for IrcCodec {
	type Item = Message;
	type Error = CodecError;

	fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
		loop {
			let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') else {
				self.next_index = src.len();
				if src.len() > MAX_LINE_LENGTH {
					return Err(CodecError::LineTooLong(src.len()));
				}
				return Ok(None);
			};

			let end = self.next_index + offset;
			self.next_index = 0;
			let raw = src.split_to(end + 1);

			let mut body = &raw[..end];
			if body.last() == Some(&b'\r') {
				body = &body[..body.len() - 1];
			}
			if body.len() > MAX_LINE_LENGTH {
				return Err(CodecError::LineTooLong(body.len()));
			}
			if body.is_empty() {
				continue;
			}

			let line = String::from_utf8_lossy(body);
			return Ok(Some(Message::parse(&line)?));
		}
	}
}

impl Encoder<Message> for IrcCodec {
	type Error = CodecError;

	fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), CodecError> {
		let wire = msg.to_wire();
		let wire = wire.split(['\r', '\n']).next().unwrap_or_default();
		if wire.len() > MAX_LINE_LENGTH {
			return Err(CodecError::LineTooLong(wire.len()));
		}

		dst.reserve(wire.len() + 2);
		dst.put_slice(wire.as_bytes());
		dst.put_slice(b"\r\n");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decodes_crlf_and_bare_lf() {
		let mut codec = IrcCodec::new();
		let mut buf = BytesMut::from(&b"PING :a\r\n:srv 001 me :hi\n"[..]);

		let first = codec.decode(&mut buf).unwrap().unwrap();
		assert_eq!(first.command, "PING");
		let second = codec.decode(&mut buf).unwrap().unwrap();
		assert_eq!(second.command, "001");
		assert!(codec.decode(&mut buf).unwrap().is_none());
	}

	#[test]
	fn waits_for_complete_line() {
		let mut codec = IrcCodec::new();
		let mut buf = BytesMut::from(&b"PRIVMSG #c :hel"[..]);
		assert!(codec.decode(&mut buf).unwrap().is_none());

		buf.extend_from_slice(b"lo\r\n");
		let msg = codec.decode(&mut buf).unwrap().unwrap();
		assert_eq!(msg.params, vec!["#c", "hello"]);
	}

	#[test]
	fn skips_blank_lines() {
		let mut codec = IrcCodec::new();
		let mut buf = BytesMut::from(&b"\r\n\nPING x\r\n"[..]);
		assert_eq!(codec.decode(&mut buf).unwrap().unwrap().command, "PING");
	}

	#[test]
	fn rejects_overlong_lines() {
		let mut codec = IrcCodec::new();
		let mut buf = BytesMut::from(&vec![b'a'; MAX_LINE_LENGTH + 1][..]);
		assert!(matches!(codec.decode(&mut buf), Err(CodecError::LineTooLong(_))));
	}

	#[test]
	fn encode_appends_crlf_and_drops_injected_lines() {
		let mut codec = IrcCodec::new();
		let mut buf = BytesMut::new();
		codec.encode(Message::new("PRIVMSG", ["#c", "hi\r\nQUIT"]), &mut buf).unwrap();
		assert_eq!(&buf[..], b"PRIVMSG #c :hi\r\n");
	}
}
