#![forbid(unsafe_code)]

use std::sync::Arc;

use bytes::BytesMut;
use rokirc_domain::NetworkId;
use rokirc_platform::{ConnectParams, ConnectionRegistry, RegistryError, SecretString};
use rokirc_protocol::response::{self, usage_line, usage_lines};
use rokirc_protocol::{Command, FramingError, Verb, encode_line_into, read_line, sanitize_line, split_args};
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	Active,
	Terminated,
}

/// One control connection: reads command lines, dispatches them against the shared
/// registry and writes the reply lines. Commands are handled strictly one at a time.
pub struct ControlSession<R, W> {
	conn_id: u64,
	reader: R,
	writer: W,
	registry: Arc<dyn ConnectionRegistry>,
	max_line_bytes: usize,
	state: SessionState,
}

impl<R, W> ControlSession<R, W>
where
	R: AsyncBufRead + Unpin,
	W: AsyncWrite + Unpin,
{
	pub fn new(conn_id: u64, reader: R, writer: W, registry: Arc<dyn ConnectionRegistry>, max_line_bytes: usize) -> Self {
		Self {
			conn_id,
			reader,
			writer,
			registry,
			max_line_bytes,
			state: SessionState::Active,
		}
	}

	/// Serve until the peer disconnects, a read fails, or the peer ends the session.
	pub async fn run(mut self) -> SessionState {
		let conn_id = self.conn_id;

		while self.state == SessionState::Active {
			match read_line(&mut self.reader, self.max_line_bytes).await {
				Ok(Some(line)) => self.handle_line(&line).await,
				Ok(None) => {
					debug!(conn_id, "control peer closed the stream");
					self.state = SessionState::Terminated;
				}
				Err(FramingError::LineTooLong { len, max }) => {
					warn!(conn_id, len, max, "control line too long; closing session");
					self.state = SessionState::Terminated;
				}
				Err(FramingError::Io(e)) => {
					debug!(conn_id, error = %e, "control read failed");
					self.state = SessionState::Terminated;
				}
			}
		}

		info!(conn_id, "control session ended");
		self.state
	}

	async fn handle_line(&mut self, line: &str) {
		let Some(cmd) = Command::parse(line) else {
			return;
		};

		let Some(verb) = cmd.verb() else {
			metrics::counter!("rokirc_control_commands_total", "verb" => "unknown").increment(1);
			debug!(conn_id = self.conn_id, verb = %cmd.verb, "unknown control verb");
			let lines = response::help_lines();
			self.write_lines(&lines).await;
			return;
		};

		metrics::counter!("rokirc_control_commands_total", "verb" => verb.label()).increment(1);
		debug!(conn_id = self.conn_id, %verb, "control command");

		match verb {
			Verb::JoinServer => self.join_server(cmd.args).await,
			Verb::LeaveServer => self.leave_server(cmd.args).await,
			Verb::JoinChannel => self.join_channel(cmd.args).await,
			Verb::LeaveChannel | Verb::SetChat => self.write_line(response::NOT_IMPLEMENTED).await,
			Verb::GenMessage => self.gen_message(cmd.args).await,
			Verb::EndSession => self.end_session().await,
		}
	}

	async fn join_server(&mut self, args: &str) {
		let tokens = split_args(args);
		let [server, port, nick, auth] = tokens.as_slice() else {
			self.write_usage(Verb::JoinServer).await;
			return;
		};

		let port = match rokirc_util::endpoint::parse_port(port) {
			Ok(port) => port,
			Err(e) => {
				debug!(conn_id = self.conn_id, error = %e, "joinserver: bad port");
				self.write_lines(&[response::INVALID_PORT.to_string(), usage_line(Verb::JoinServer)])
					.await;
				return;
			}
		};

		if auth.is_empty() {
			self.write_line(response::SERVER_NOT_JOINED).await;
			return;
		}

		let params = ConnectParams {
			network: NetworkId::new(*server),
			port,
			nick: nick.to_string(),
			auth: SecretString::new(*auth),
		};

		if let Err(e) = self.registry.connect(params).await {
			self.record_failure(Verb::JoinServer, &e);
			self.write_line(response::SERVER_NOT_JOINED).await;
		}
	}

	async fn leave_server(&mut self, args: &str) {
		let tokens = split_args(args);
		let server = match tokens.as_slice() {
			[server] => *server,
			["", ..] => "",
			_ => {
				self.write_usage(Verb::LeaveServer).await;
				return;
			}
		};

		match self.registry.disconnect(&NetworkId::new(server)).await {
			Ok(true) => {}
			Ok(false) => debug!(conn_id = self.conn_id, network = %server, "leaveserver: not connected"),
			Err(e) => {
				self.record_failure(Verb::LeaveServer, &e);
				self.write_line(&response::leave_server_failed(&e)).await;
			}
		}
	}

	async fn join_channel(&mut self, args: &str) {
		let tokens = split_args(args);
		let [server, channel] = tokens.as_slice() else {
			self.write_usage(Verb::JoinChannel).await;
			return;
		};

		match self.registry.join_channel(&NetworkId::new(*server), channel).await {
			Ok(()) => {}
			Err(RegistryError::UnknownNetwork(network)) => {
				debug!(conn_id = self.conn_id, %network, "joinchannel: network not joined");
				self.write_line(response::SERVER_NOT_YET_JOINED).await;
			}
			Err(e) => {
				self.record_failure(Verb::JoinChannel, &e);
				self.write_line(&response::join_channel_failed(&e)).await;
			}
		}
	}

	async fn gen_message(&mut self, args: &str) {
		let tokens = split_args(args);
		let [server, channel] = tokens.as_slice() else {
			self.write_usage(Verb::GenMessage).await;
			return;
		};

		match self.registry.generate_text(&NetworkId::new(*server), channel).await {
			Ok(text) => {
				let line = sanitize_line(&text);
				if line.is_empty() {
					debug!(conn_id = self.conn_id, "genmessage: nothing to send");
				} else {
					self.write_line(line).await;
				}
			}
			Err(e) => {
				self.record_failure(Verb::GenMessage, &e);
				self.write_line(&response::generate_failed(&e)).await;
			}
		}
	}

	async fn end_session(&mut self) {
		self.write_line(response::TERMINATING).await;
		self.state = SessionState::Terminated;

		if let Err(e) = self.writer.shutdown().await {
			warn!(conn_id = self.conn_id, error = %e, "failed to close control stream");
			self.write_line(response::CLOSE_FAILED).await;
		}
	}

	fn record_failure(&self, verb: Verb, err: &RegistryError) {
		metrics::counter!("rokirc_control_command_errors_total").increment(1);
		warn!(conn_id = self.conn_id, %verb, error = %err, "control command failed");
	}

	async fn write_usage(&mut self, verb: Verb) {
		let lines = usage_lines(verb);
		self.write_lines(&lines).await;
	}

	async fn write_line(&mut self, line: &str) {
		self.write_lines(&[line]).await;
	}

	/// Best effort: write failures are logged and otherwise ignored.
	async fn write_lines<S: AsRef<str>>(&mut self, lines: &[S]) {
		let mut buf = BytesMut::new();
		for line in lines {
			encode_line_into(&mut buf, line.as_ref());
		}

		let res = async {
			self.writer.write_all(&buf).await?;
			self.writer.flush().await
		}
		.await;

		if let Err(e) = res {
			debug!(conn_id = self.conn_id, error = %e, "control write failed");
		}
	}
}
