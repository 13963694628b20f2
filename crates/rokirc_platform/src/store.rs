#![forbid(unsafe_code)]

//! Durable per-channel transition counts in sqlite.

use std::path::{Path, PathBuf};

use anyhow::Context;
use rokirc_domain::ChannelKey;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::markov::{MarkovChain, Transition};

/// Database file created inside the data directory.
pub const DB_FILE_NAME: &str = "rokirc.sqlite";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS markov_transitions (\
	network TEXT NOT NULL, \
	channel TEXT NOT NULL, \
	prefix TEXT NOT NULL, \
	next TEXT NOT NULL, \
	count INTEGER NOT NULL, \
	PRIMARY KEY (network, channel, prefix, next))";

/// Model persistence. A disabled store keeps everything in memory only.
#[derive(Clone, Debug)]
pub struct ModelStore {
	pool: Option<SqlitePool>,
}

impl ModelStore {
	pub fn disabled() -> Self {
		Self { pool: None }
	}

	/// Open (creating if needed) `<data_dir>/rokirc.sqlite`.
	pub async fn open(data_dir: &Path) -> anyhow::Result<Self> {
		tokio::fs::create_dir_all(data_dir)
			.await
			.with_context(|| format!("create data dir {}", data_dir.display()))?;

		let path = Self::db_path(data_dir);
		let options = SqliteConnectOptions::new().filename(&path).create_if_missing(true);
		let pool = SqlitePoolOptions::new()
			.max_connections(4)
			.connect_with(options)
			.await
			.with_context(|| format!("open sqlite {}", path.display()))?;

		sqlx::query(SCHEMA)
			.execute(&pool)
			.await
			.context("create markov_transitions")?;

		Ok(Self { pool: Some(pool) })
	}

	pub fn db_path(data_dir: &Path) -> PathBuf {
		data_dir.join(DB_FILE_NAME)
	}

	/// Load the persisted chain for one channel. Empty when nothing is stored.
	pub async fn load(&self, key: &ChannelKey) -> anyhow::Result<MarkovChain> {
		let Some(pool) = &self.pool else {
			return Ok(MarkovChain::new());
		};

		let rows: Vec<(String, String, i64)> = sqlx::query_as(
			"SELECT prefix, next, count FROM markov_transitions WHERE network = ? AND channel = ?",
		)
		.bind(key.network.as_str())
		.bind(key.channel.as_str())
		.fetch_all(pool)
		.await
		.context("select markov_transitions")?;

		Ok(MarkovChain::from_counts(
			rows.into_iter()
				.map(|(prefix, next, count)| (prefix, next, u64::try_from(count).unwrap_or(0))),
		))
	}

	/// Add one to each transition's stored count.
	pub async fn record(&self, key: &ChannelKey, transitions: &[Transition]) -> anyhow::Result<()> {
		let Some(pool) = &self.pool else {
			return Ok(());
		};
		if transitions.is_empty() {
			return Ok(());
		}

		let mut tx = pool.begin().await.context("begin markov tx")?;
		for t in transitions {
			sqlx::query(
				"INSERT INTO markov_transitions (network, channel, prefix, next, count) VALUES (?, ?, ?, ?, 1) \
				ON CONFLICT(network, channel, prefix, next) DO UPDATE SET count = count + excluded.count",
			)
			.bind(key.network.as_str())
			.bind(key.channel.as_str())
			.bind(&t.prefix)
			.bind(&t.next)
			.execute(&mut *tx)
			.await
			.context("upsert markov_transitions")?;
		}
		tx.commit().await.context("commit markov tx")?;
		Ok(())
	}

	pub async fn close(&self) {
		if let Some(pool) = &self.pool {
			pool.close().await;
		}
	}
}
