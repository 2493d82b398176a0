// Copyright (C) 2020-2021 Parity Technologies (UK) Ltd. & Centrality Investments Ltd
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Inbound pool: mirrors `CtxStore` with two differences (spec §4.4) — the
//! eviction heap orders ascending on `(blockNumber, index)` so `Discard` yields the
//! oldest entries, and it additionally tracks which thresholded bundles are ready
//! for remote execution (the `availableTaker` signal `handler.go`'s main loop
//! consumes to drive `GetTxForLockOut`).

use std::sync::Arc;

use alloy_primitives::B256;
use parking_lot::Mutex;

use crate::config::ChainRegistry;
use crate::error::{Error, Result};
use crate::keystore::{recover_signer, AnchorKeystore};
use crate::metrics::Metrics;
use crate::notification::{NotificationSender, NotificationStream};
use crate::tx::{RecTx, RecTxData, RecTxWithSigs, Status};

use super::priced::PricedItem;
use super::PricedPool;

impl PricedItem for RecTxWithSigs {
	type Id = B256;
	type Key = (u64, u64);

	fn id(&self) -> B256 {
		RecTxWithSigs::id(self)
	}

	fn key(&self) -> (u64, u64) {
		self.order_key()
	}
}

/// Fired exactly once per id, at the insertion that raises an aggregate's
/// signature count from `signConfirm - 1` to `signConfirm`.
#[derive(Debug, Clone)]
pub struct NewRWssEvent(pub RecTxWithSigs);

/// Current snapshot of thresholded bundles awaiting remote execution. An empty
/// list is the handler's signal to clear the remote-exec param cache (spec §4.6).
#[derive(Debug, Clone)]
pub struct AvailableTakerEvent(pub Vec<RecTxWithSigs>);

#[derive(Debug, Clone)]
pub struct RtxStoreConfig {
	pub capacity: usize,
}

impl Default for RtxStoreConfig {
	fn default() -> Self {
		Self { capacity: 4096 }
	}
}

pub struct RtxStore {
	pool: PricedPool<RecTxWithSigs>,
	registry: Arc<ChainRegistry>,
	keystore: Arc<AnchorKeystore>,
	config: RtxStoreConfig,
	metrics: Option<Arc<Metrics>>,
	threshold_sender: NotificationSender<NewRWssEvent>,
	threshold_stream: NotificationStream<NewRWssEvent>,
	available_sender: NotificationSender<AvailableTakerEvent>,
	available_stream: NotificationStream<AvailableTakerEvent>,
	merge_lock: Mutex<()>,
}

impl RtxStore {
	pub fn new(
		registry: Arc<ChainRegistry>,
		keystore: Arc<AnchorKeystore>,
		config: RtxStoreConfig,
		metrics: Option<Arc<Metrics>>,
	) -> Self {
		let (threshold_sender, threshold_stream) = NotificationStream::channel();
		let (available_sender, available_stream) = NotificationStream::channel();
		Self {
			pool: PricedPool::new(),
			registry,
			keystore,
			config,
			metrics,
			threshold_sender,
			threshold_stream,
			available_sender,
			available_stream,
			merge_lock: Mutex::new(()),
		}
	}

	pub fn len(&self) -> usize {
		self.pool.count()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Returns the stored aggregate if present, else `None`.
	pub fn read_from_locals(&self, id: &B256) -> Option<RecTxWithSigs> {
		self.pool.get(id)
	}

	pub fn subscribe_new_rwss_event(&self) -> tokio::sync::mpsc::UnboundedReceiver<NewRWssEvent> {
		self.threshold_stream.subscribe()
	}

	pub fn subscribe_available_taker_event(&self) -> tokio::sync::mpsc::UnboundedReceiver<AvailableTakerEvent> {
		self.available_stream.subscribe()
	}

	pub fn add_local(&self, data: RecTxData) -> Result<()> {
		let dest_id = data.dest_id;
		if self.registry.get(dest_id).is_none() {
			return Err(Error::UnknownChain(dest_id));
		}
		let content_hash = data.content_hash();
		let (v, r, s) = self.keystore.sign(content_hash)?;
		let rtx = RecTx::new(data, v, r, s);
		self.merge(rtx)
	}

	pub fn add_remote(&self, rtx: RecTx) -> Result<()> {
		self.validate_rtx(&rtx)?;
		self.merge(rtx)
	}

	pub fn add_rwss(&self, bundles: Vec<RecTxWithSigs>) -> Result<()> {
		for bundle in bundles {
			let _guard = self.merge_lock.lock();
			let is_new = !self.pool.contains(&bundle.id());
			self.pool.put(bundle);
			if is_new {
				self.evict_overflow();
			}
		}
		self.refresh_available();
		Ok(())
	}

	pub fn validate_rtx(&self, rtx: &RecTx) -> Result<()> {
		let entry = self.registry.get(rtx.dest_id()).ok_or(Error::UnknownChain(rtx.dest_id()))?;
		let signer = recover_signer(rtx.content_hash(), rtx.v, rtx.r, rtx.s)?;
		if !entry.contains_anchor(&signer) {
			return Err(Error::UnknownSigner(signer));
		}
		if let Some(existing) = self.pool.get(&rtx.id()) {
			if existing.signatures().any(|(_, r, _)| r == rtx.r) {
				if let Some(metrics) = &self.metrics {
					metrics.xchain_duplicate_signatures_total.inc();
				}
				return Err(Error::DuplicateSign);
			}
		}
		Ok(())
	}

	fn merge(&self, rtx: RecTx) -> Result<()> {
		let _guard = self.merge_lock.lock();
		let id = rtx.id();
		match self.pool.get(&id) {
			Some(mut bundle) => {
				let before = bundle.signature_count()?;
				if let Err(e) = bundle.add_signature(&rtx) {
					if let Some(metrics) = &self.metrics {
						match e {
							Error::DuplicateSign => metrics.xchain_duplicate_signatures_total.inc(),
							Error::InvalidSign => metrics.xchain_invalid_signatures_total.inc(),
							_ => {}
						}
					}
					return Err(e);
				}
				let after = bundle.signature_count()?;
				self.maybe_promote(&mut bundle, before, after)?;
				self.pool.put(bundle);
			}
			None => {
				let mut bundle = RecTxWithSigs::new(&rtx);
				self.maybe_promote(&mut bundle, 0, 1)?;
				self.pool.put(bundle);
				self.evict_overflow();
			}
		}
		if let Some(metrics) = &self.metrics {
			metrics.xchain_rtx_pool_size.set(self.len() as i64);
		}
		self.refresh_available();
		Ok(())
	}

	fn maybe_promote(&self, bundle: &mut RecTxWithSigs, before: usize, after: usize) -> Result<()> {
		let entry = self.registry.get(bundle.dest_id());
		let threshold = entry.map(|e| e.sign_confirm).unwrap_or(usize::MAX);
		if bundle.status == Status::Waiting && before < threshold && after >= threshold {
			bundle.set_status(Status::Executing)?;
			if let Some(metrics) = &self.metrics {
				metrics.xchain_rtx_threshold_total.inc();
			}
			self.threshold_sender.notify(NewRWssEvent(bundle.clone()));
		}
		Ok(())
	}

	/// Advance `ids` to `Finishing`, marking them as submitted for remote
	/// execution, then re-publish the availability snapshot.
	pub fn mark_finishing(&self, ids: &[B256]) {
		for id in ids {
			if let Some(mut bundle) = self.pool.get(id) {
				if bundle.set_status(Status::Finishing).is_ok() {
					self.pool.lookup.insert(*id, bundle);
				}
			}
		}
		self.refresh_available();
	}

	fn refresh_available(&self) {
		let pending: Vec<RecTxWithSigs> =
			self.pool.all_items().into_iter().filter(|bundle| bundle.status == Status::Executing).collect();
		self.available_sender.notify(AvailableTakerEvent(pending));
	}

	fn evict_overflow(&self) {
		let over = self.len().saturating_sub(self.config.capacity);
		if over == 0 {
			return;
		}
		let victims = self.pool.discard(over);
		for victim in victims {
			self.pool.remove(&victim.id());
			if let Some(metrics) = &self.metrics {
				metrics.xchain_rtx_evictions_total.inc();
			}
		}
	}

	pub fn remove_locals(&self, ids: &[B256]) {
		for id in ids {
			self.pool.remove(id);
		}
		if let Some(metrics) = &self.metrics {
			metrics.xchain_rtx_pool_size.set(self.len() as i64);
		}
		self.refresh_available();
	}

	pub fn remove_remotes(&self, ids: &[B256]) {
		self.remove_locals(ids);
	}
}
