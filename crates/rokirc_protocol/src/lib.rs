#![forbid(unsafe_code)]

pub mod command;
pub mod framing;
pub mod response;

pub use command::{Command, Verb, split_args};
pub use framing::{
	DEFAULT_MAX_LINE_BYTES, FramingError, LINE_TERMINATOR, encode_line, encode_line_into, read_line, sanitize_line,
};

