#![forbid(unsafe_code)]

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use rokirc_platform::ConnectionRegistry;
use tokio::io::BufReader;
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{info, warn};

use crate::server::session::ControlSession;

/// Bound control listener.
pub struct ControlListener {
	listener: TcpListener,
	registry: Arc<dyn ConnectionRegistry>,
	max_line_bytes: usize,
}

impl ControlListener {
	/// Bind the control socket. Fails if the address cannot be bound.
	pub async fn bind(
		addr: impl ToSocketAddrs,
		registry: Arc<dyn ConnectionRegistry>,
		max_line_bytes: usize,
	) -> io::Result<Self> {
		let listener = TcpListener::bind(addr).await?;
		Ok(Self {
			listener,
			registry,
			max_line_bytes,
		})
	}

	pub fn local_addr(&self) -> io::Result<SocketAddr> {
		self.listener.local_addr()
	}

	/// Accept connections and run one session task per connection until `shutdown` resolves.
	pub async fn serve(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
		let local = self.local_addr().context("listener local addr")?;
		info!(%local, "control listener ready");

		tokio::pin!(shutdown);
		let mut next_conn_id: u64 = 1;

		loop {
			let accepted = tokio::select! {
				_ = &mut shutdown => {
					info!("control listener stopping");
					return Ok(());
				}
				accepted = self.listener.accept() => accepted,
			};

			let (socket, peer) = match accepted {
				Ok(v) => v,
				Err(e) => {
					warn!(error = %e, "control accept failed");
					continue;
				}
			};

			let conn_id = next_conn_id;
			next_conn_id += 1;
			metrics::counter!("rokirc_control_connections_total").increment(1);
			info!(conn_id, %peer, "accepted control connection");

			let (read, write) = socket.into_split();
			let session = ControlSession::new(
				conn_id,
				BufReader::new(read),
				write,
				Arc::clone(&self.registry),
				self.max_line_bytes,
			);
			tokio::spawn(session.run());
		}
	}
}

/// Bind `addr` and serve control sessions against `registry` until `shutdown` resolves.
pub async fn listen(
	addr: impl ToSocketAddrs,
	registry: Arc<dyn ConnectionRegistry>,
	max_line_bytes: usize,
	shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
	let listener = ControlListener::bind(addr, registry, max_line_bytes)
		.await
		.context("bind control listener")?;
	listener.serve(shutdown).await
}
