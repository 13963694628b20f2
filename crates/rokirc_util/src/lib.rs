#![forbid(unsafe_code)]

pub mod endpoint {
	use std::net::SocketAddr;

	/// Default control listener host.
	pub const DEFAULT_BIND_HOST: &str = "127.0.0.1";

	/// Parsed control bind endpoint, `host:port` with an optional `tcp://` scheme.
	#[derive(Debug, Clone, PartialEq, Eq, Hash)]
	pub struct BindEndpoint {
		pub host: String,
		pub port: u16,
	}

	impl BindEndpoint {
		pub fn new(host: impl Into<String>, port: u16) -> Self {
			Self {
				host: host.into(),
				port,
			}
		}

		/// Returns `host:port` (IPv6 stays bracketed).
		pub fn hostport(&self) -> String {
			if self.host.contains(':') && !self.host.starts_with('[') {
				format!("[{}]:{}", self.host, self.port)
			} else {
				format!("{}:{}", self.host, self.port)
			}
		}

		/// Convert to `SocketAddr`; the host must be an IP literal.
		pub fn to_socket_addr(&self) -> Result<SocketAddr, String> {
			self.hostport()
				.parse()
				.map_err(|_| format!("host must be an IP literal (DNS names not supported here): {}", self.host))
		}

		/// Parse `host:port` or `tcp://host:port`.
		pub fn parse(s: &str) -> Result<Self, String> {
			let s = s.trim();
			if s.is_empty() {
				return Err("endpoint must be non-empty (expected host:port)".to_string());
			}

			let rest = s.strip_prefix("tcp://").unwrap_or(s);

			if rest.contains('/') || rest.contains('?') || rest.contains('#') {
				return Err(format!("invalid endpoint (expected host:port without path/query/fragment): {s}"));
			}

			let (host, port_str) = rest
				.rsplit_once(':')
				.ok_or_else(|| format!("invalid endpoint (missing :port, expected host:port): {s}"))?;

			let host = host.trim();
			if host.is_empty() {
				return Err(format!("invalid endpoint host (expected host:port): {s}"));
			}

			if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
				return Err(format!("invalid endpoint host (IPv6 must be bracketed like [::1]:7777): {s}"));
			}

			let port = parse_port(port_str).map_err(|_| format!("invalid endpoint port (expected 1..=65535): {s}"))?;

			Ok(Self {
				host: host.to_string(),
				port,
			})
		}
	}

	/// Parse a TCP port in `1..=65535`.
	pub fn parse_port(s: &str) -> Result<u16, String> {
		let port: u16 = s
			.trim()
			.parse()
			.map_err(|_| format!("invalid port (expected 1..=65535): {s}"))?;
		if port == 0 {
			return Err(format!("invalid port (expected 1..=65535): {s}"));
		}
		Ok(port)
	}

}
