#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rokirc_domain::NetworkId;
use rokirc_platform::{ConnectParams, ConnectionRegistry, ModelStore, RegistryError, SecretString};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::config::IrcSettings;
use crate::server::registry::NetworkRegistry;

const LOCAL: &str = "127.0.0.1";

struct FakeIrc {
	port: u16,
	accepted: Arc<AtomicUsize>,
}

/// Minimal IRC server: welcomes on NICK and, on the first connection only, answers
/// each JOIN with one chat line in that channel.
async fn fake_irc() -> FakeIrc {
	let listener = TcpListener::bind((LOCAL, 0)).await.expect("bind fake irc");
	let port = listener.local_addr().expect("addr").port();
	let accepted = Arc::new(AtomicUsize::new(0));

	let counter = Arc::clone(&accepted);
	tokio::spawn(async move {
		while let Ok((socket, _)) = listener.accept().await {
			let index = counter.fetch_add(1, Ordering::SeqCst);
			tokio::spawn(serve_fake_client(socket, index == 0));
		}
	});

	FakeIrc { port, accepted }
}

async fn serve_fake_client(socket: TcpStream, talkative: bool) {
	let (read, mut write) = socket.into_split();
	let mut lines = BufReader::new(read).lines();

	while let Ok(Some(line)) = lines.next_line().await {
		let reply = if line.starts_with("NICK") {
			Some(":irc.test 001 mybot :Welcome".to_string())
		} else if let Some(channel) = line.strip_prefix("JOIN :") {
			talkative.then(|| format!(":alice!a@host PRIVMSG {channel} :hello world"))
		} else if line.starts_with("QUIT") {
			break;
		} else {
			None
		};

		if let Some(reply) = reply
			&& write.write_all(format!("{reply}\r\n").as_bytes()).await.is_err()
		{
			break;
		}
	}
}

fn settings() -> IrcSettings {
	IrcSettings {
		connect_timeout: Duration::from_secs(2),
		max_reconnect_attempts: 0,
		..IrcSettings::default()
	}
}

fn registry() -> NetworkRegistry {
	NetworkRegistry::new(ModelStore::disabled(), settings())
}

fn params(network: &str, port: u16) -> ConnectParams {
	ConnectParams {
		network: NetworkId::new(network),
		port,
		nick: "mybot".to_string(),
		auth: SecretString::new("secret123"),
	}
}

async fn closed_port() -> u16 {
	let listener = TcpListener::bind((LOCAL, 0)).await.expect("bind");
	listener.local_addr().expect("addr").port()
}

async fn generate_until_ok(registry: &NetworkRegistry, channel: &str) -> String {
	let network = NetworkId::new(LOCAL);
	timeout(Duration::from_secs(5), async {
		loop {
			match registry.generate_text(&network, channel).await {
				Ok(text) => return text,
				Err(RegistryError::NoData(_)) => tokio::time::sleep(Duration::from_millis(10)).await,
				Err(e) => panic!("unexpected error: {e}"),
			}
		}
	})
	.await
	.expect("model trained in time")
}

#[tokio::test]
async fn unknown_network_outcomes() {
	let registry = registry();
	let network = NetworkId::new("irc.example.org");

	assert!(matches!(
		registry.join_channel(&network, "#general").await,
		Err(RegistryError::UnknownNetwork(n)) if n == network
	));
	assert!(matches!(
		registry.generate_text(&network, "#general").await,
		Err(RegistryError::UnknownNetwork(_))
	));
	assert!(!registry.disconnect(&network).await.unwrap());
}

#[tokio::test]
async fn channel_names_are_checked_after_the_network() {
	let irc = fake_irc().await;
	let registry = registry();
	let unknown = NetworkId::new("irc.example.org");

	assert!(matches!(
		registry.join_channel(&unknown, "#a,#b").await,
		Err(RegistryError::UnknownNetwork(_))
	));
	assert!(matches!(
		registry.generate_text(&unknown, "bad chan").await,
		Err(RegistryError::UnknownNetwork(_))
	));

	registry.connect(params(LOCAL, irc.port)).await.expect("connect");
	let network = NetworkId::new(LOCAL);
	assert!(matches!(
		registry.join_channel(&network, "#a,#b").await,
		Err(RegistryError::InvalidChannel(_))
	));
	assert!(matches!(
		registry.generate_text(&network, "").await,
		Err(RegistryError::InvalidChannel(_))
	));
}

#[tokio::test]
async fn abandoned_connect_leaves_no_slot() {
	let registry = registry();

	// Non-routable address: the connect either hangs and is cancelled here, or fails fast.
	let _ = timeout(Duration::from_millis(50), registry.connect(params("10.255.255.1", 6667))).await;

	assert_eq!(registry.slot_count().await, 0);
	assert_eq!(registry.network_count().await, 0);
	assert!(!registry.disconnect(&NetworkId::new("10.255.255.1")).await.unwrap());
}

#[tokio::test]
async fn failed_connect_leaves_no_entry() {
	let registry = registry();
	let port = closed_port().await;

	let err = registry.connect(params(LOCAL, port)).await.unwrap_err();
	assert!(matches!(err, RegistryError::Io(_)), "{err:?}");
	assert_eq!(registry.network_count().await, 0);
	assert!(matches!(
		registry.join_channel(&NetworkId::new(LOCAL), "#rust").await,
		Err(RegistryError::UnknownNetwork(_))
	));
}

#[tokio::test]
async fn full_lifecycle() {
	let irc = fake_irc().await;
	let registry = registry();
	let network = NetworkId::new(LOCAL);

	registry.connect(params(LOCAL, irc.port)).await.expect("connect");
	assert_eq!(registry.network_count().await, 1);

	assert!(matches!(
		registry.generate_text(&network, "#rust").await,
		Err(RegistryError::NoData(_))
	));

	registry.join_channel(&network, "#rust").await.expect("join");
	registry.join_channel(&network, "#rust").await.expect("rejoin is a no-op");

	assert_eq!(generate_until_ok(&registry, "#rust").await, "hello world");

	assert!(registry.disconnect(&network).await.unwrap());
	assert_eq!(registry.network_count().await, 0);
	assert!(!registry.disconnect(&network).await.unwrap());
	assert!(matches!(
		registry.generate_text(&network, "#rust").await,
		Err(RegistryError::UnknownNetwork(_))
	));
}

#[tokio::test]
async fn connect_twice_keeps_live_entry() {
	let irc = fake_irc().await;
	let registry = registry();

	registry.connect(params(LOCAL, irc.port)).await.expect("first connect");
	registry.connect(params(LOCAL, irc.port)).await.expect("second connect");

	tokio::time::sleep(Duration::from_millis(50)).await;
	assert_eq!(irc.accepted.load(Ordering::SeqCst), 1);
	assert_eq!(registry.network_count().await, 1);
}

#[tokio::test]
async fn models_are_reloaded_from_store() {
	let dir = tempfile::tempdir().unwrap();
	let store = ModelStore::open(dir.path()).await.unwrap();
	let irc = fake_irc().await;
	let registry = NetworkRegistry::new(store, settings());
	let network = NetworkId::new(LOCAL);

	registry.connect(params(LOCAL, irc.port)).await.unwrap();
	registry.join_channel(&network, "#rust").await.unwrap();
	assert_eq!(generate_until_ok(&registry, "#rust").await, "hello world");
	assert!(registry.disconnect(&network).await.unwrap());

	// Second connection gets no chat traffic, so any text comes from the store.
	registry.connect(params(LOCAL, irc.port)).await.unwrap();
	registry.join_channel(&network, "#rust").await.unwrap();
	assert_eq!(registry.generate_text(&network, "#rust").await.unwrap(), "hello world");
}

#[tokio::test]
async fn slow_network_does_not_block_others() {
	let irc = fake_irc().await;
	let registry = Arc::new(registry());

	// Non-routable address: the connect either hangs until the timeout or fails fast.
	let slow = {
		let registry = Arc::clone(&registry);
		tokio::spawn(async move { registry.connect(params("10.255.255.1", 6667)).await })
	};
	tokio::time::sleep(Duration::from_millis(20)).await;

	let started = Instant::now();
	registry.connect(params(LOCAL, irc.port)).await.expect("fast network connects");
	registry
		.join_channel(&NetworkId::new(LOCAL), "#rust")
		.await
		.expect("fast network joins");
	assert!(started.elapsed() < Duration::from_secs(1));

	let _ = slow.await;
}

#[tokio::test]
async fn racing_join_and_leave_leave_consistent_state() {
	let irc = fake_irc().await;
	let registry = Arc::new(registry());
	let network = NetworkId::new(LOCAL);

	let mut tasks = Vec::new();
	for i in 0..16 {
		let registry = Arc::clone(&registry);
		let network = network.clone();
		let port = irc.port;
		tasks.push(tokio::spawn(async move {
			if i % 2 == 0 {
				let _ = registry.connect(params(LOCAL, port)).await;
			} else {
				let _ = registry.disconnect(&network).await;
			}
		}));
	}
	for task in tasks {
		task.await.expect("task");
	}

	match registry.network_count().await {
		1 => {
			registry.join_channel(&network, "#rust").await.expect("entry is usable");
			assert!(registry.disconnect(&network).await.unwrap());
		}
		0 => {
			assert!(matches!(
				registry.join_channel(&network, "#rust").await,
				Err(RegistryError::UnknownNetwork(_))
			));
			assert!(!registry.disconnect(&network).await.unwrap());
		}
		n => panic!("impossible network count {n}"),
	}
	assert_eq!(registry.network_count().await, 0);
}

#[tokio::test]
async fn shutdown_all_empties_registry() {
	let irc = fake_irc().await;
	let registry = registry();

	registry.connect(params(LOCAL, irc.port)).await.unwrap();
	registry.shutdown_all("Shutting down").await;

	assert_eq!(registry.network_count().await, 0);
	assert!(!registry.disconnect(&NetworkId::new(LOCAL)).await.unwrap());
}
