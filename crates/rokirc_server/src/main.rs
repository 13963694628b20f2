#![forbid(unsafe_code)]

mod config;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use rokirc_platform::{ConnectionRegistry, ModelStore};
use rokirc_util::endpoint::{BindEndpoint, parse_port};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::server::listener::listen;
use crate::server::registry::NetworkRegistry;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: rokirc_server [PORT [DATA_DIR]] [--bind host:port] [--data-dir DIR] [--config PATH]\n\
\n\
Options:\n\
\t--bind       Control endpoint (default: 127.0.0.1:7777)\n\
\t--data-dir   Directory for the model database (default: in-memory models)\n\
\t--config     Config file (default: ~/.rokirc/config.toml)\n\
\t--help       Show this help\n\
"
	);
	std::process::exit(2)
}

#[derive(Debug, Default)]
struct CliArgs {
	bind: Option<BindEndpoint>,
	port: Option<u16>,
	data_dir: Option<PathBuf>,
	config: Option<PathBuf>,
}

fn parse_args() -> CliArgs {
	let mut args = CliArgs::default();
	let mut positional = 0usize;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				let bind = BindEndpoint::parse(&v).unwrap_or_else(|e| {
					eprintln!("{e}");
					usage_and_exit();
				});
				args.bind = Some(bind);
			}
			"--data-dir" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--data-dir must be non-empty");
					usage_and_exit();
				}
				args.data_dir = Some(PathBuf::from(v));
			}
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				args.config = Some(PathBuf::from(v));
			}
			other if other.starts_with('-') => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
			other => {
				match positional {
					0 => {
						let port = parse_port(other).unwrap_or_else(|e| {
							eprintln!("{e}");
							usage_and_exit();
						});
						args.port = Some(port);
					}
					1 => args.data_dir = Some(PathBuf::from(other)),
					_ => {
						eprintln!("Unexpected argument: {other}");
						usage_and_exit();
					}
				}
				positional += 1;
			}
		}
	}

	args
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,rokirc_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("rokirc_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

async fn shutdown_signal() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		warn!(error = %e, "failed to listen for ctrl-c; running until killed");
		std::future::pending::<()>().await;
	}
	info!("ctrl-c received; shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let args = parse_args();

	let config_path = match args.config.clone() {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let mut server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	if let Some(dir) = args.data_dir {
		server_cfg.storage.data_dir = Some(dir);
	}
	let bind = match (args.bind, args.port) {
		(Some(bind), _) => bind,
		(None, Some(port)) => BindEndpoint::new(server_cfg.server.bind_address.clone(), port),
		(None, None) => BindEndpoint::new(server_cfg.server.bind_address.clone(), server_cfg.server.port),
	};

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let store = match server_cfg.storage.data_dir.as_deref() {
		Some(dir) => {
			let store = ModelStore::open(dir).await?;
			info!(path = %ModelStore::db_path(dir).display(), "model store opened");
			store
		}
		None => {
			info!("no data dir configured; models are in-memory only");
			ModelStore::disabled()
		}
	};

	let registry = Arc::new(NetworkRegistry::new(store.clone(), server_cfg.irc.clone()));
	let shared: Arc<dyn ConnectionRegistry> = registry.clone();

	let served = listen(
		bind.hostport(),
		shared,
		server_cfg.server.max_line_bytes,
		shutdown_signal(),
	)
	.await;
	if let Err(e) = &served {
		error!(error = %format!("{e:#}"), "control listener failed");
	}

	info!(networks = registry.network_count().await, "disconnecting upstream networks");
	registry.shutdown_all("Shutting down").await;
	store.close().await;

	served
}
