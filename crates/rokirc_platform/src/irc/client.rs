#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rokirc_domain::{ChannelKey, ChannelName, NetworkId};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::codec::{CodecError, IrcCodec};
use super::message::{Message, strip_formatting};
use crate::store::ModelStore;
use crate::{ChannelModel, SecretString, new_session_id};

const CONTROL_CAPACITY: usize = 64;
const QUIT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
	pub network: NetworkId,
	pub port: u16,
	pub nick: String,
	pub auth: SecretString,
	pub username: String,
	pub realname: String,
	pub connect_timeout: Duration,
	pub reconnect_min_delay: Duration,
	pub reconnect_max_delay: Duration,
	/// Consecutive failed reconnects before the client gives up.
	pub max_reconnect_attempts: u32,
}

impl UpstreamConfig {
	pub fn new(network: NetworkId, port: u16, nick: impl Into<String>, auth: SecretString) -> Self {
		Self {
			network,
			port,
			nick: nick.into(),
			auth,
			username: "rokirc".to_string(),
			realname: "rokirc markov bot".to_string(),
			connect_timeout: Duration::from_secs(10),
			reconnect_min_delay: Duration::from_millis(500),
			reconnect_max_delay: Duration::from_secs(30),
			max_reconnect_attempts: 8,
		}
	}
}

#[derive(Debug)]
pub enum UpstreamControl {
	Join {
		channel: ChannelName,
		model: ChannelModel,
		resp: oneshot::Sender<io::Result<()>>,
	},
	Quit {
		reason: String,
	},
}

/// Owner-side handle of one upstream connection task.
#[derive(Debug)]
pub struct UpstreamHandle {
	network: NetworkId,
	session_id: String,
	control_tx: mpsc::Sender<UpstreamControl>,
	task: JoinHandle<()>,
}

impl UpstreamHandle {
	/// Open the TCP connection and start the client task on it.
	pub async fn connect(cfg: UpstreamConfig, store: ModelStore) -> io::Result<Self> {
		let stream = connect_tcp(&cfg).await?;
		Ok(Self::spawn(cfg, store, stream))
	}

	/// Start the client task on an already-open stream.
	pub fn spawn<S>(cfg: UpstreamConfig, store: ModelStore, stream: S) -> Self
	where
		S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
	{
		let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
		let session_id = new_session_id();
		let network = cfg.network.clone();

		let client = UpstreamClient::new(cfg, store, session_id.clone());
		let task = tokio::spawn(client.run(stream, control_rx));

		Self {
			network,
			session_id,
			control_tx,
			task,
		}
	}

	pub fn session_id(&self) -> &str {
		&self.session_id
	}

	/// `false` once the client task has given up or exited.
	pub fn is_alive(&self) -> bool {
		!self.task.is_finished() && !self.control_tx.is_closed()
	}

	/// Ask the client to join `channel`, training `model` from its traffic.
	pub async fn join(&self, channel: ChannelName, model: ChannelModel) -> io::Result<()> {
		let (resp, rx) = oneshot::channel();
		self.control_tx
			.send(UpstreamControl::Join { channel, model, resp })
			.await
			.map_err(|_| closed())?;
		rx.await.map_err(|_| closed())?
	}

	/// Send QUIT and wait briefly for the task; abort it if it lingers.
	pub async fn shutdown(mut self, reason: &str) {
		let _ = self
			.control_tx
			.send(UpstreamControl::Quit {
				reason: reason.to_string(),
			})
			.await;

		if tokio::time::timeout(QUIT_GRACE, &mut self.task).await.is_err() {
			warn!(network = %self.network, "upstream did not quit in time; aborting");
			self.task.abort();
		}
	}
}

fn closed() -> io::Error {
	io::Error::new(io::ErrorKind::BrokenPipe, "upstream connection closed")
}

fn codec_to_io(err: CodecError) -> io::Error {
	match err {
		CodecError::Io(e) => e,
		other => io::Error::other(other),
	}
}

async fn connect_tcp(cfg: &UpstreamConfig) -> io::Result<TcpStream> {
	let addr = (cfg.network.as_str(), cfg.port);
	match tokio::time::timeout(cfg.connect_timeout, TcpStream::connect(addr)).await {
		Ok(res) => res,
		Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "upstream connect timed out")),
	}
}

pub(crate) fn backoff_delay(attempt: u32, min: Duration, max: Duration) -> Duration {
	let pow = attempt.min(16);
	let ms = min.as_millis().saturating_mul(1u128 << pow);
	let d = Duration::from_millis(ms.min(u64::MAX as u128) as u64);
	d.min(max).max(min)
}

enum SessionEnd {
	Quit,
	Disconnected(Option<CodecError>),
}

struct UpstreamClient {
	cfg: UpstreamConfig,
	store: ModelStore,
	session_id: String,
	nick: String,
	channels: HashMap<ChannelName, ChannelModel>,
}

impl UpstreamClient {
	fn new(cfg: UpstreamConfig, store: ModelStore, session_id: String) -> Self {
		let nick = cfg.nick.clone();
		Self {
			cfg,
			store,
			session_id,
			nick,
			channels: HashMap::new(),
		}
	}

	async fn run<S>(mut self, stream: S, mut control_rx: mpsc::Receiver<UpstreamControl>)
	where
		S: AsyncRead + AsyncWrite + Unpin,
	{
		let network = self.cfg.network.clone();
		info!(%network, session_id = %self.session_id, "upstream client starting");
		metrics::counter!("rokirc_upstream_connects_total").increment(1);

		match self.run_session(stream, &mut control_rx).await {
			SessionEnd::Quit => return,
			SessionEnd::Disconnected(err) => log_disconnect(&network, err),
		}

		let mut attempt: u32 = 0;
		loop {
			if attempt >= self.cfg.max_reconnect_attempts {
				warn!(%network, attempt, "upstream reconnect attempts exhausted");
				return;
			}

			let delay = backoff_delay(attempt, self.cfg.reconnect_min_delay, self.cfg.reconnect_max_delay);
			debug!(%network, ?delay, attempt, "upstream reconnecting");
			if self.wait_offline(delay, &mut control_rx).await.is_err() {
				return;
			}

			let stream = match connect_tcp(&self.cfg).await {
				Ok(s) => s,
				Err(e) => {
					attempt = attempt.saturating_add(1);
					warn!(%network, error = %e, attempt, "upstream reconnect failed");
					continue;
				}
			};

			attempt = 0;
			self.nick = self.cfg.nick.clone();
			metrics::counter!("rokirc_upstream_connects_total").increment(1);
			info!(%network, "upstream reconnected");

			match self.run_session(stream, &mut control_rx).await {
				SessionEnd::Quit => return,
				SessionEnd::Disconnected(err) => log_disconnect(&network, err),
			}
		}
	}

	/// Sleep out a backoff delay while still accepting control messages. `Err` means stop.
	async fn wait_offline(&mut self, delay: Duration, control_rx: &mut mpsc::Receiver<UpstreamControl>) -> Result<(), ()> {
		let deadline = sleep(delay);
		tokio::pin!(deadline);

		loop {
			tokio::select! {
				_ = &mut deadline => return Ok(()),
				cmd = control_rx.recv() => match cmd {
					Some(UpstreamControl::Join { channel, model, resp }) => {
						self.channels.insert(channel, model);
						let _ = resp.send(Ok(()));
					}
					Some(UpstreamControl::Quit { .. }) | None => return Err(()),
				},
			}
		}
	}

	async fn run_session<S>(&mut self, stream: S, control_rx: &mut mpsc::Receiver<UpstreamControl>) -> SessionEnd
	where
		S: AsyncRead + AsyncWrite + Unpin,
	{
		let (mut sink, mut lines) = Framed::new(stream, IrcCodec::new()).split();
		let mut registered = false;

		if let Err(e) = self.register(&mut sink).await {
			return SessionEnd::Disconnected(Some(e));
		}

		loop {
			tokio::select! {
				cmd = control_rx.recv() => match cmd {
					Some(UpstreamControl::Join { channel, model, resp }) => {
						let res = if registered {
							sink.send(Message::new("JOIN", [channel.as_str()])).await.map_err(codec_to_io)
						} else {
							Ok(())
						};
						if res.is_ok() {
							debug!(network = %self.cfg.network, %channel, registered, "channel joined");
							self.channels.insert(channel, model);
						}
						let _ = resp.send(res);
					}
					Some(UpstreamControl::Quit { reason }) => {
						let _ = sink.send(Message::new("QUIT", [reason])).await;
						let _ = sink.close().await;
						info!(network = %self.cfg.network, "upstream quit");
						return SessionEnd::Quit;
					}
					None => {
						let _ = sink.send(Message::new("QUIT", Vec::<String>::new())).await;
						return SessionEnd::Quit;
					}
				},
				frame = lines.next() => {
					let msg = match frame {
						Some(Ok(msg)) => msg,
						Some(Err(CodecError::Parse(e))) => {
							debug!(network = %self.cfg.network, error = %e, "skipping unparsable line");
							continue;
						}
						Some(Err(e)) => return SessionEnd::Disconnected(Some(e)),
						None => return SessionEnd::Disconnected(None),
					};

					if let Err(e) = self.handle_message(msg, &mut registered, &mut sink).await {
						return SessionEnd::Disconnected(Some(e));
					}
				}
			}
		}
	}

	async fn register<K>(&self, sink: &mut K) -> Result<(), CodecError>
	where
		K: futures::Sink<Message, Error = CodecError> + Unpin,
	{
		if !self.cfg.auth.is_empty() {
			sink.feed(Message::new("PASS", [self.cfg.auth.expose()])).await?;
		}
		sink.feed(Message::new("NICK", [self.nick.as_str()])).await?;
		sink.feed(Message::new(
			"USER",
			[self.cfg.username.as_str(), "0", "*", self.cfg.realname.as_str()],
		))
		.await?;
		sink.flush().await
	}

	async fn handle_message<K>(&mut self, msg: Message, registered: &mut bool, sink: &mut K) -> Result<(), CodecError>
	where
		K: futures::Sink<Message, Error = CodecError> + Unpin,
	{
		match msg.command.as_str() {
			"PING" => {
				sink.send(Message::new("PONG", msg.params)).await?;
			}
			"001" => {
				*registered = true;
				if let Some(nick) = msg.params.first() {
					self.nick = nick.clone();
				}
				info!(network = %self.cfg.network, nick = %self.nick, "upstream registered");
				for channel in self.channels.keys() {
					sink.feed(Message::new("JOIN", [channel.as_str()])).await?;
				}
				sink.flush().await?;
			}
			"433" if !*registered => {
				self.nick.push('_');
				debug!(network = %self.cfg.network, nick = %self.nick, "nick in use; retrying");
				sink.send(Message::new("NICK", [self.nick.as_str()])).await?;
			}
			"PRIVMSG" => self.ingest(&msg).await,
			"ERROR" => {
				warn!(network = %self.cfg.network, reason = ?msg.params.last(), "upstream sent ERROR");
			}
			_ => {}
		}
		Ok(())
	}

	async fn ingest(&self, msg: &Message) {
		let [target, text] = msg.params.as_slice() else {
			return;
		};
		if text.starts_with('\u{1}') || msg.source_nick() == Some(self.nick.as_str()) {
			return;
		}
		let Ok(channel) = ChannelName::new(target.as_str()) else {
			return;
		};
		let Some(model) = self.channels.get(&channel) else {
			return;
		};

		let added = model.write().train(&strip_formatting(text));
		if added.is_empty() {
			return;
		}
		metrics::counter!("rokirc_upstream_messages_total").increment(1);

		let key = ChannelKey::new(self.cfg.network.clone(), channel);
		if let Err(e) = self.store.record(&key, &added).await {
			warn!(channel = %key, error = %e, "failed to persist transitions");
		}
	}
}

fn log_disconnect(network: &NetworkId, err: Option<CodecError>) {
	match err {
		Some(e) => warn!(%network, error = %e, "upstream connection lost"),
		None => info!(%network, "upstream closed the connection"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn backoff_grows_and_is_clamped() {
		let min = Duration::from_millis(100);
		let max = Duration::from_secs(2);
		assert_eq!(backoff_delay(0, min, max), min);
		assert_eq!(backoff_delay(1, min, max), Duration::from_millis(200));
		assert_eq!(backoff_delay(3, min, max), Duration::from_millis(800));
		assert_eq!(backoff_delay(30, min, max), max);
	}

	#[test]
	fn config_defaults() {
		let cfg = UpstreamConfig::new(NetworkId::new("irc.example.org"), 6667, "mybot", SecretString::new(""));
		assert_eq!(cfg.username, "rokirc");
		assert_eq!(cfg.connect_timeout, Duration::from_secs(10));
		assert!(cfg.max_reconnect_attempts > 0);
	}

	#[tokio::test]
	async fn join_on_dead_handle_is_broken_pipe() {
		let (client, server) = tokio::io::duplex(1024);
		drop(server);
		let cfg = UpstreamConfig {
			max_reconnect_attempts: 0,
			..UpstreamConfig::new(NetworkId::new("irc.invalid"), 6667, "bot", SecretString::new(""))
		};
		let handle = UpstreamHandle::spawn(cfg, ModelStore::disabled(), client);

		tokio::time::timeout(Duration::from_secs(5), async {
			while handle.is_alive() {
				tokio::time::sleep(Duration::from_millis(10)).await;
			}
		})
		.await
		.expect("task exits");

		let model = ChannelModel::default();
		let err = handle.join(ChannelName::new("#rust").unwrap(), model).await.unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
	}
}
