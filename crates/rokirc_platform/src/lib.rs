#![forbid(unsafe_code)]

pub mod irc;
pub mod markov;
pub mod store;

use std::fmt;
use std::sync::Arc;

use rokirc_domain::{ChannelKey, NetworkId, ParseIdError};
use thiserror::Error;
use uuid::Uuid;

pub use markov::{MarkovChain, Transition};
pub use store::ModelStore;

/// Shared handle to one channel's generative model.
///
/// Ingestion takes the write lock per message; generation takes the read lock.
pub type ChannelModel = Arc<parking_lot::RwLock<MarkovChain>>;

/// Parameters of a `JoinServer` request.
#[derive(Debug, Clone)]
pub struct ConnectParams {
	pub network: NetworkId,
	pub port: u16,
	pub nick: String,
	pub auth: SecretString,
}

/// Failures surfaced by a [`ConnectionRegistry`].
#[derive(Debug, Error)]
pub enum RegistryError {
	#[error("unknown network: {0}")]
	UnknownNetwork(NetworkId),

	#[error("no model data for {0}")]
	NoData(ChannelKey),

	#[error("invalid channel: {0}")]
	InvalidChannel(#[from] ParseIdError),

	#[error("i/o error: {0}")]
	Io(#[from] std::io::Error),

	#[error("internal error: {0}")]
	Internal(String),
}

/// Shared registry of upstream networks, their joined channels and channel models.
///
/// Every operation may be called concurrently from any control session. Operations on
/// the same network are linearizable; operations on different networks do not contend.
#[async_trait::async_trait]
pub trait ConnectionRegistry: Send + Sync + 'static {
	/// Create (or keep) the entry for `params.network` and start its upstream connection.
	async fn connect(&self, params: ConnectParams) -> Result<(), RegistryError>;

	/// Tear down a network entry and everything under it. `Ok(false)` if it was unknown.
	async fn disconnect(&self, network: &NetworkId) -> Result<bool, RegistryError>;

	/// Join `channel` on an active network.
	///
	/// `channel` is validated only once the network is known, so an unknown network wins
	/// over a malformed channel name.
	async fn join_channel(&self, network: &NetworkId, channel: &str) -> Result<(), RegistryError>;

	/// Generate one line of text from the channel's model. Same validation order as
	/// [`ConnectionRegistry::join_channel`].
	async fn generate_text(&self, network: &NetworkId, channel: &str) -> Result<String, RegistryError>;
}

/// Wrapper that redacts in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

/// Generate an opaque session id.
pub fn new_session_id() -> String {
	Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
	use rokirc_domain::ChannelName;

	use super::*;

	#[test]
	fn secret_string_redacts() {
		let s = SecretString::new("oauth:hunter2");
		assert_eq!(format!("{s}"), "<redacted>");
		assert_eq!(format!("{s:?}"), "SecretString(<redacted>)");
		assert_eq!(s.expose(), "oauth:hunter2");
	}

	#[test]
	fn connect_params_debug_hides_auth() {
		let params = ConnectParams {
			network: NetworkId::new("irc.example.org"),
			port: 6667,
			nick: "mybot".to_string(),
			auth: SecretString::new("secret123"),
		};
		let dbg = format!("{params:?}");
		assert!(dbg.contains("irc.example.org"));
		assert!(!dbg.contains("secret123"));
	}

	#[test]
	fn registry_errors_render_detail() {
		let key = ChannelKey::new(NetworkId::new("irc.example.org"), ChannelName::new("#rust").unwrap());
		assert_eq!(
			RegistryError::NoData(key).to_string(),
			"no model data for irc.example.org/#rust"
		);
		assert_eq!(
			RegistryError::UnknownNetwork(NetworkId::new("x")).to_string(),
			"unknown network: x"
		);
	}
}
