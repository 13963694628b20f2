#![forbid(unsafe_code)]

use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Default maximum length of one control line, terminator excluded.
pub const DEFAULT_MAX_LINE_BYTES: usize = 8 * 1024;

/// Line terminator written after every response line.
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

#[derive(Debug, Error)]
pub enum FramingError {
	#[error("line exceeds maximum size: len={len} max={max}")]
	LineTooLong {
		len: usize,
		max: usize,
	},

	#[error("i/o error: {0}")]
	Io(#[from] std::io::Error),
}

/// Content of `msg` up to (not including) the first `\r` or `\n`.
pub fn sanitize_line(msg: &str) -> &str {
	match msg.find(['\r', '\n']) {
		Some(idx) => &msg[..idx],
		None => msg,
	}
}

/// Encode a response line: sanitized content followed by `\r\n`.
pub fn encode_line(msg: &str) -> Vec<u8> {
	let content = sanitize_line(msg);
	let mut out = Vec::with_capacity(content.len() + LINE_TERMINATOR.len());
	out.extend_from_slice(content.as_bytes());
	out.extend_from_slice(LINE_TERMINATOR);
	out
}

/// Append an encoded response line into the provided buffer.
pub fn encode_line_into(buf: &mut BytesMut, msg: &str) {
	let content = sanitize_line(msg);
	buf.reserve(content.len() + LINE_TERMINATOR.len());
	buf.put_slice(content.as_bytes());
	buf.put_slice(LINE_TERMINATOR);
}

/// Read one line from `reader`.
///
/// The `\n` terminator is consumed, and a `\r` right before it is stripped. A final
/// unterminated line is returned as-is at end of stream. Returns `Ok(None)` on end of
/// stream with nothing buffered. Invalid UTF-8 is replaced, not rejected.
pub async fn read_line<R>(reader: &mut R, max_line_bytes: usize) -> Result<Option<String>, FramingError>
where
	R: AsyncBufRead + Unpin,
{
	let mut line = BytesMut::new();

	loop {
		let available = reader.fill_buf().await?;
		if available.is_empty() {
			if line.is_empty() {
				return Ok(None);
			}
			break;
		}

		match available.iter().position(|b| *b == b'\n') {
			Some(pos) => {
				let len = line.len() + pos;
				if len > max_line_bytes {
					reader.consume(pos + 1);
					return Err(FramingError::LineTooLong { len, max: max_line_bytes });
				}
				line.extend_from_slice(&available[..pos]);
				reader.consume(pos + 1);
				break;
			}
			None => {
				let n = available.len();
				let len = line.len() + n;
				if len > max_line_bytes {
					return Err(FramingError::LineTooLong { len, max: max_line_bytes });
				}
				line.extend_from_slice(available);
				reader.consume(n);
			}
		}
	}

	if line.last() == Some(&b'\r') {
		line.truncate(line.len() - 1);
	}

	Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}
