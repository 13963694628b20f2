#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock as ModelLock;
use rokirc_domain::{ChannelKey, ChannelName, NetworkId};
use rokirc_platform::irc::{UpstreamConfig, UpstreamHandle};
use rokirc_platform::{ChannelModel, ConnectParams, ConnectionRegistry, ModelStore, RegistryError};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::config::IrcSettings;

struct NetworkEntry {
	upstream: UpstreamHandle,
	channels: HashMap<ChannelName, ChannelModel>,
}

/// Per-network lock target. A retired slot has been unlinked from the map and must
/// not be mutated; holders re-resolve instead.
#[derive(Default)]
struct NetworkSlot {
	entry: Option<NetworkEntry>,
	retired: bool,
}

type SlotRef = Arc<Mutex<NetworkSlot>>;

fn unlink(slots: &mut HashMap<NetworkId, SlotRef>, network: &NetworkId, slot: &SlotRef) {
	if slots.get(network).is_some_and(|current| Arc::ptr_eq(current, slot)) {
		slots.remove(network);
	}
}

/// Slot held by an in-flight `connect`. If the caller is cancelled before an entry is
/// installed, the slot is retired on drop and unlinked when the map is free; otherwise the
/// next lookup unlinks it.
struct PendingSlot<'a> {
	registry: &'a NetworkRegistry,
	network: NetworkId,
	guard: OwnedMutexGuard<NetworkSlot>,
}

impl Drop for PendingSlot<'_> {
	fn drop(&mut self) {
		if self.guard.entry.is_some() || self.guard.retired {
			return;
		}

		debug!(network = %self.network, "connect abandoned; retiring empty slot");
		self.guard.retired = true;
		if let Ok(mut slots) = self.registry.slots.try_write() {
			unlink(&mut slots, &self.network, OwnedMutexGuard::mutex(&self.guard));
		}
	}
}

/// Process-wide map of upstream networks.
///
/// The map lock is held only to look up or unlink a slot; all per-network work happens
/// under that network's slot mutex. Lock order is slot then map.
pub struct NetworkRegistry {
	slots: RwLock<HashMap<NetworkId, SlotRef>>,
	store: ModelStore,
	settings: IrcSettings,
}

impl NetworkRegistry {
	pub fn new(store: ModelStore, settings: IrcSettings) -> Self {
		Self {
			slots: RwLock::new(HashMap::new()),
			store,
			settings,
		}
	}

	/// Number of networks with a live entry.
	pub async fn network_count(&self) -> usize {
		let slots: Vec<SlotRef> = self.slots.read().await.values().cloned().collect();
		let mut count = 0;
		for slot in slots {
			if slot.lock().await.entry.is_some() {
				count += 1;
			}
		}
		count
	}

	/// Quit every upstream and empty the registry.
	pub async fn shutdown_all(&self, reason: &str) {
		let drained: Vec<(NetworkId, SlotRef)> = self.slots.write().await.drain().collect();

		for (network, slot) in drained {
			let mut guard = slot.lock_owned().await;
			guard.retired = true;
			if let Some(entry) = guard.entry.take() {
				drop(guard);
				info!(%network, "disconnecting upstream");
				entry.upstream.shutdown(reason).await;
				metrics::gauge!("rokirc_networks_active").decrement(1.0);
			}
		}
	}

	/// Lock the live slot for `network`, creating an empty one if asked.
	async fn lock_slot(&self, network: &NetworkId, create: bool) -> Option<OwnedMutexGuard<NetworkSlot>> {
		loop {
			let existing = self.slots.read().await.get(network).cloned();
			let slot = match existing {
				Some(slot) => slot,
				None if create => Arc::clone(
					self.slots
						.write()
						.await
						.entry(network.clone())
						.or_insert_with(|| Arc::new(Mutex::new(NetworkSlot::default()))),
				),
				None => return None,
			};

			let guard = Arc::clone(&slot).lock_owned().await;
			if guard.retired {
				debug!(%network, "slot retired while waiting; re-resolving");
				drop(guard);
				unlink(&mut *self.slots.write().await, network, &slot);
				continue;
			}
			return Some(guard);
		}
	}

	/// Mark the held slot retired and unlink it, unless the map already points elsewhere.
	async fn retire(&self, network: &NetworkId, guard: &mut OwnedMutexGuard<NetworkSlot>) {
		guard.retired = true;
		unlink(&mut *self.slots.write().await, network, OwnedMutexGuard::mutex(guard));
	}

	#[cfg(test)]
	pub(super) async fn slot_count(&self) -> usize {
		self.slots.read().await.len()
	}

	fn upstream_config(&self, params: ConnectParams) -> UpstreamConfig {
		UpstreamConfig {
			network: params.network,
			port: params.port,
			nick: params.nick,
			auth: params.auth,
			username: self.settings.username.clone(),
			realname: self.settings.realname.clone(),
			connect_timeout: self.settings.connect_timeout,
			reconnect_min_delay: self.settings.reconnect_min_delay,
			reconnect_max_delay: self.settings.reconnect_max_delay,
			max_reconnect_attempts: self.settings.max_reconnect_attempts,
		}
	}
}

#[async_trait]
impl ConnectionRegistry for NetworkRegistry {
	async fn connect(&self, params: ConnectParams) -> Result<(), RegistryError> {
		let network = params.network.clone();
		let Some(guard) = self.lock_slot(&network, true).await else {
			return Err(RegistryError::Internal(format!("no slot for {network}")));
		};
		let mut pending = PendingSlot {
			registry: self,
			network: network.clone(),
			guard,
		};
		let guard = &mut pending.guard;

		if guard.entry.as_ref().is_some_and(|e| e.upstream.is_alive()) {
			debug!(%network, "already connected; keeping existing entry");
			return Ok(());
		}

		if let Some(stale) = guard.entry.take() {
			info!(%network, "replacing dead upstream");
			stale.upstream.shutdown("Reconnecting").await;
			metrics::gauge!("rokirc_networks_active").decrement(1.0);
		}

		info!(%network, port = params.port, nick = %params.nick, "connecting upstream");
		match UpstreamHandle::connect(self.upstream_config(params), self.store.clone()).await {
			Ok(upstream) => {
				debug!(%network, session_id = upstream.session_id(), "upstream connected");
				guard.entry = Some(NetworkEntry {
					upstream,
					channels: HashMap::new(),
				});
				metrics::gauge!("rokirc_networks_active").increment(1.0);
				Ok(())
			}
			Err(e) => {
				warn!(%network, error = %e, "upstream connect failed");
				self.retire(&network, guard).await;
				Err(RegistryError::Io(e))
			}
		}
	}

	async fn disconnect(&self, network: &NetworkId) -> Result<bool, RegistryError> {
		let Some(mut guard) = self.lock_slot(network, false).await else {
			return Ok(false);
		};

		let entry = guard.entry.take();
		self.retire(network, &mut guard).await;
		drop(guard);

		let Some(entry) = entry else {
			return Ok(false);
		};

		info!(%network, channels = entry.channels.len(), "leaving network");
		entry.upstream.shutdown("Leaving").await;
		metrics::gauge!("rokirc_networks_active").decrement(1.0);
		Ok(true)
	}

	async fn join_channel(&self, network: &NetworkId, channel: &str) -> Result<(), RegistryError> {
		let Some(mut guard) = self.lock_slot(network, false).await else {
			return Err(RegistryError::UnknownNetwork(network.clone()));
		};
		let Some(entry) = guard.entry.as_mut() else {
			return Err(RegistryError::UnknownNetwork(network.clone()));
		};
		let channel = &ChannelName::new(channel)?;

		if entry.channels.contains_key(channel) {
			debug!(%network, %channel, "channel already joined");
			return Ok(());
		}

		let key = ChannelKey::new(network.clone(), channel.clone());
		let chain = self
			.store
			.load(&key)
			.await
			.map_err(|e| RegistryError::Internal(format!("{e:#}")))?;
		let model: ChannelModel = Arc::new(ModelLock::new(chain));

		entry.upstream.join(channel.clone(), Arc::clone(&model)).await?;
		entry.channels.insert(channel.clone(), model);
		info!(%network, %channel, "joined channel");
		Ok(())
	}

	async fn generate_text(&self, network: &NetworkId, channel: &str) -> Result<String, RegistryError> {
		let (channel, model) = {
			let Some(guard) = self.lock_slot(network, false).await else {
				return Err(RegistryError::UnknownNetwork(network.clone()));
			};
			let Some(entry) = guard.entry.as_ref() else {
				return Err(RegistryError::UnknownNetwork(network.clone()));
			};
			let channel = ChannelName::new(channel)?;
			let model = entry.channels.get(&channel).cloned();
			(channel, model)
		};

		let no_data = || RegistryError::NoData(ChannelKey::new(network.clone(), channel.clone()));
		let Some(model) = model else {
			return Err(no_data());
		};

		let chain = model.read();
		if chain.is_empty() {
			return Err(no_data());
		}
		Ok(chain.generate(&mut rand::rng(), self.settings.max_generated_words))
	}
}
