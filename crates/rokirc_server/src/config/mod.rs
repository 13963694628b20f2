#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use rokirc_protocol::DEFAULT_MAX_LINE_BYTES;
use rokirc_util::endpoint::DEFAULT_BIND_HOST;
use serde::Deserialize;
use tracing::{info, warn};

/// Default control port.
pub const DEFAULT_PORT: u16 = 7777;

/// Default config path: `~/.rokirc/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".rokirc").join("config.toml"))
}

/// Load the server config from TOML and env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());

	Ok(cfg)
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub storage: StorageSettings,
	pub irc: IrcSettings,
}

/// Control listener settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
	pub bind_address: String,
	pub port: u16,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Longest accepted control line in bytes.
	pub max_line_bytes: usize,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			bind_address: DEFAULT_BIND_HOST.to_string(),
			port: DEFAULT_PORT,
			metrics_bind: None,
			max_line_bytes: DEFAULT_MAX_LINE_BYTES,
		}
	}
}

/// Model persistence. No data dir means in-memory models only.
#[derive(Debug, Clone, Default)]
pub struct StorageSettings {
	pub data_dir: Option<PathBuf>,
}

/// Upstream IRC client settings shared by every network.
#[derive(Debug, Clone)]
pub struct IrcSettings {
	pub username: String,
	pub realname: String,
	pub connect_timeout: Duration,
	pub reconnect_min_delay: Duration,
	pub reconnect_max_delay: Duration,
	pub max_reconnect_attempts: u32,
	pub max_generated_words: usize,
}

impl Default for IrcSettings {
	fn default() -> Self {
		Self {
			username: "rokirc".to_string(),
			realname: "rokirc markov bot".to_string(),
			connect_timeout: Duration::from_millis(10_000),
			reconnect_min_delay: Duration::from_millis(500),
			reconnect_max_delay: Duration::from_secs(30),
			max_reconnect_attempts: 8,
			max_generated_words: rokirc_platform::markov::DEFAULT_MAX_WORDS,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	storage: FileStorageSettings,

	#[serde(default)]
	irc: FileIrcSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	bind_address: Option<String>,
	port: Option<u16>,
	metrics_bind: Option<String>,
	max_line_bytes: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileStorageSettings {
	data_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileIrcSettings {
	username: Option<String>,
	realname: Option<String>,
	connect_timeout_ms: Option<u64>,
	reconnect_min_delay_ms: Option<u64>,
	reconnect_max_delay_ms: Option<u64>,
	max_reconnect_attempts: Option<u32>,
	max_generated_words: Option<usize>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let server_defaults = ServerSettings::default();
		let irc_defaults = IrcSettings::default();

		Self {
			server: ServerSettings {
				bind_address: file
					.server
					.bind_address
					.filter(|s| !s.trim().is_empty())
					.unwrap_or(server_defaults.bind_address),
				port: file.server.port.filter(|p| *p > 0).unwrap_or(server_defaults.port),
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				max_line_bytes: file
					.server
					.max_line_bytes
					.filter(|n| *n > 0)
					.unwrap_or(server_defaults.max_line_bytes),
			},
			storage: StorageSettings {
				data_dir: file.storage.data_dir.filter(|s| !s.trim().is_empty()).map(PathBuf::from),
			},
			irc: IrcSettings {
				username: file
					.irc
					.username
					.filter(|s| !s.trim().is_empty())
					.unwrap_or(irc_defaults.username),
				realname: file
					.irc
					.realname
					.filter(|s| !s.trim().is_empty())
					.unwrap_or(irc_defaults.realname),
				connect_timeout: file
					.irc
					.connect_timeout_ms
					.map(Duration::from_millis)
					.unwrap_or(irc_defaults.connect_timeout),
				reconnect_min_delay: file
					.irc
					.reconnect_min_delay_ms
					.map(Duration::from_millis)
					.unwrap_or(irc_defaults.reconnect_min_delay),
				reconnect_max_delay: file
					.irc
					.reconnect_max_delay_ms
					.map(Duration::from_millis)
					.unwrap_or(irc_defaults.reconnect_max_delay),
				max_reconnect_attempts: file
					.irc
					.max_reconnect_attempts
					.unwrap_or(irc_defaults.max_reconnect_attempts),
				max_generated_words: file
					.irc
					.max_generated_words
					.filter(|n| *n > 0)
					.unwrap_or(irc_defaults.max_generated_words),
			},
		}
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig, env: impl Fn(&str) -> Option<String>) {
	let var = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

	if let Some(v) = var("ROKIRC_BIND_ADDRESS") {
		cfg.server.bind_address = v;
		info!("server config: bind_address overridden by env");
	}

	if let Some(v) = var("ROKIRC_PORT") {
		match rokirc_util::endpoint::parse_port(&v) {
			Ok(port) => {
				cfg.server.port = port;
				info!(port, "server config: port overridden by env");
			}
			Err(e) => warn!(error = %e, "server config: ignoring ROKIRC_PORT"),
		}
	}

	if let Some(v) = var("ROKIRC_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = var("ROKIRC_MAX_LINE_BYTES")
		&& let Ok(max) = v.parse::<usize>()
		&& max > 0
	{
		cfg.server.max_line_bytes = max;
		info!(max, "server config: max_line_bytes overridden by env");
	}

	if let Some(v) = var("ROKIRC_DATA_DIR") {
		cfg.storage.data_dir = Some(PathBuf::from(v));
		info!("storage config: data_dir overridden by env");
	}

	if let Some(v) = var("ROKIRC_IRC_USERNAME") {
		cfg.irc.username = v;
		info!("irc config: username overridden by env");
	}

	if let Some(v) = var("ROKIRC_IRC_CONNECT_TIMEOUT_MS")
		&& let Ok(ms) = v.parse::<u64>()
	{
		cfg.irc.connect_timeout = Duration::from_millis(ms);
		info!(ms, "irc config: connect_timeout overridden by env");
	}

	if cfg.irc.reconnect_min_delay > cfg.irc.reconnect_max_delay {
		warn!(
			min_ms = cfg.irc.reconnect_min_delay.as_millis(),
			max_ms = cfg.irc.reconnect_max_delay.as_millis(),
			"irc config: reconnect_min_delay > reconnect_max_delay; swapping"
		);
		std::mem::swap(&mut cfg.irc.reconnect_min_delay, &mut cfg.irc.reconnect_max_delay);
	}
}
