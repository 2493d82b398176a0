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

//! Outbound pool: aggregates maker-side signatures toward `signConfirm` and evicts
//! the lowest-price entries when it grows past capacity. Grounded in
//! `examples/original_source/cross/handler.go`'s `ctxStore` call sites and
//! `core/rtx_list.go`'s heap/lookup split (mirrored here for the price-ordered case).

use std::sync::Arc;

use alloy_primitives::B256;
use parking_lot::Mutex;

use crate::config::ChainRegistry;
use crate::error::{Error, Result};
use crate::keystore::{recover_signer, AnchorKeystore};
use crate::metrics::Metrics;
use crate::notification::{NotificationSender, NotificationStream};
use crate::price::Price;
use crate::tx::{CrossTx, CrossTxData, CrossTxWithSigs, Status};

use super::priced::PricedItem;
use super::PricedPool;

impl PricedItem for CrossTxWithSigs {
	type Id = B256;
	type Key = Price;

	fn id(&self) -> B256 {
		CrossTxWithSigs::id(self)
	}

	fn key(&self) -> Price {
		self.price()
	}
}

/// Fired exactly once per id, at the insertion that raises an aggregate's
/// signature count from `signConfirm - 1` to `signConfirm`.
#[derive(Debug, Clone)]
pub struct CWssResultEvent(pub CrossTxWithSigs);

#[derive(Debug, Clone)]
pub struct CtxStoreConfig {
	pub capacity: usize,
}

impl Default for CtxStoreConfig {
	fn default() -> Self {
		Self { capacity: 4096 }
	}
}

pub struct CtxStore {
	pool: PricedPool<CrossTxWithSigs>,
	registry: Arc<ChainRegistry>,
	keystore: Arc<AnchorKeystore>,
	config: CtxStoreConfig,
	metrics: Option<Arc<Metrics>>,
	result_sender: NotificationSender<CWssResultEvent>,
	result_stream: NotificationStream<CWssResultEvent>,
	// Serializes the read-modify-write merge sequence per call; the pool itself is
	// internally locked but signature aggregation is a compound operation.
	merge_lock: Mutex<()>,
}

impl CtxStore {
	pub fn new(
		registry: Arc<ChainRegistry>,
		keystore: Arc<AnchorKeystore>,
		config: CtxStoreConfig,
		metrics: Option<Arc<Metrics>>,
	) -> Self {
		let (result_sender, result_stream) = NotificationStream::channel();
		Self {
			pool: PricedPool::new(),
			registry,
			keystore,
			config,
			metrics,
			result_sender,
			result_stream,
			merge_lock: Mutex::new(()),
		}
	}

	pub fn len(&self) -> usize {
		self.pool.count()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn get(&self, id: &B256) -> Option<CrossTxWithSigs> {
		self.pool.get(id)
	}

	pub fn subscribe_cwss_result_event(&self) -> tokio::sync::mpsc::UnboundedReceiver<CWssResultEvent> {
		self.result_stream.subscribe()
	}

	/// Sign `data` with this node's anchor key and merge it in as a local vote.
	/// Fails if this node holds no anchor key, or the destination chain is
	/// unregistered.
	pub fn add_local(&self, data: CrossTxData) -> Result<()> {
		let dest_id = data.dest_id;
		if self.registry.get(dest_id).is_none() {
			return Err(Error::UnknownChain(dest_id));
		}
		let content_hash = data.content_hash();
		let (v, r, s) = self.keystore.sign(content_hash)?;
		let ctx = CrossTx::new(data, v, r, s);
		self.merge(ctx, 0)
	}

	/// Merge a peer-signed `CrossTx` in as a remote vote. `block_num` is only used
	/// when the id is not yet present (first sighting seeds the aggregate).
	pub fn add_remote(&self, ctx: CrossTx, block_num: u64) -> Result<()> {
		self.validate_ctx(&ctx)?;
		self.merge(ctx, block_num)
	}

	/// Bulk-accept already-thresholded aggregates, e.g. from a peer's
	/// `CtxSignsMsg`/`CtxSignsInternalMsg` or the inter-chain channel.
	pub fn add_cwss(&self, bundles: Vec<CrossTxWithSigs>) -> Result<()> {
		for bundle in bundles {
			let _guard = self.merge_lock.lock();
			let is_new = !self.pool.contains(&bundle.id());
			self.pool.put(bundle);
			if is_new {
				self.evict_overflow();
			}
		}
		Ok(())
	}

	/// Recover the signer and reject if it is not a registered anchor for the
	/// destination chain, or if its signature is already present.
	pub fn validate_ctx(&self, ctx: &CrossTx) -> Result<()> {
		let entry = self.registry.get(ctx.dest_id()).ok_or(Error::UnknownChain(ctx.dest_id()))?;
		let signer = recover_signer(ctx.content_hash(), ctx.v, ctx.r, ctx.s)?;
		if !entry.contains_anchor(&signer) {
			return Err(Error::UnknownSigner(signer));
		}
		if let Some(existing) = self.pool.get(&ctx.id()) {
			if existing.signatures().any(|(_, r, _)| r == ctx.r) {
				if let Some(metrics) = &self.metrics {
					metrics.xchain_duplicate_signatures_total.inc();
				}
				return Err(Error::DuplicateSign);
			}
		}
		Ok(())
	}

	fn merge(&self, ctx: CrossTx, block_num: u64) -> Result<()> {
		let _guard = self.merge_lock.lock();
		let id = ctx.id();
		match self.pool.get(&id) {
			Some(mut bundle) => {
				let before = bundle.signature_count()?;
				if let Err(e) = bundle.add_signature(&ctx) {
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
				let mut bundle = CrossTxWithSigs::new(&ctx, block_num);
				self.maybe_promote(&mut bundle, 0, 1)?;
				self.pool.put(bundle);
				self.evict_overflow();
			}
		}
		if let Some(metrics) = &self.metrics {
			metrics.xchain_ctx_pool_size.set(self.len() as i64);
		}
		Ok(())
	}

	fn maybe_promote(&self, bundle: &mut CrossTxWithSigs, before: usize, after: usize) -> Result<()> {
		let entry = self.registry.get(bundle.dest_id());
		let threshold = entry.map(|e| e.sign_confirm).unwrap_or(usize::MAX);
		if bundle.status == Status::Waiting && before < threshold && after >= threshold {
			bundle.set_status(Status::Executing)?;
			if let Some(metrics) = &self.metrics {
				metrics.xchain_ctx_threshold_total.inc();
			}
			self.result_sender.notify(CWssResultEvent(bundle.clone()));
		}
		Ok(())
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
				metrics.xchain_ctx_evictions_total.inc();
			}
		}
	}

	/// Delete by id. Idempotent.
	pub fn remove_locals(&self, ids: &[B256]) {
		for id in ids {
			self.pool.remove(id);
		}
		if let Some(metrics) = &self.metrics {
			metrics.xchain_ctx_pool_size.set(self.len() as i64);
		}
	}

	/// Delete outbound entries whose id appears among the given (fully-signed)
	/// receipts — the "taker" drop once a receipt confirms the swap completed.
	pub fn remove_remotes(&self, rtxs: &[B256]) {
		self.remove_locals(rtxs);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::ChainEntry;
	use alloy_primitives::{Address, U256};
	use libsecp256k1::SecretKey;

	fn registry_with(dest_id: u64, anchors: Vec<Address>, sign_confirm: usize) -> Arc<ChainRegistry> {
		let registry = ChainRegistry::new();
		registry.register(dest_id, ChainEntry { anchors, sign_confirm });
		Arc::new(registry)
	}

	fn data(ctx_id: u8, dest_id: u64, value: u64, dest_value: u64) -> CrossTxData {
		CrossTxData {
			value: U256::from(value),
			ctx_id: B256::repeat_byte(ctx_id),
			tx_hash: B256::repeat_byte(0xAA),
			block_hash: B256::repeat_byte(0xBB),
			from: Address::repeat_byte(0x01),
			to: Address::repeat_byte(0x02),
			dest_id,
			dest_value: U256::from(dest_value),
			input: vec![],
		}
	}

	fn keystore(seed: u8) -> AnchorKeystore {
		AnchorKeystore::new(SecretKey::parse(&[seed; 32]).unwrap())
	}

	#[test]
	fn threshold_fires_exactly_once() {
		let a = keystore(0x11);
		let b = keystore(0x22);
		let anchors = vec![a.address().unwrap(), b.address().unwrap()];
		let registry = registry_with(7, anchors, 2);

		let store = CtxStore::new(registry, Arc::new(a), CtxStoreConfig::default(), None);
		let mut events = store.subscribe_cwss_result_event();

		store.add_local(data(1, 7, 100, 200)).unwrap();
		assert!(events.try_recv().is_err());

		let d = data(1, 7, 100, 200);
		let hash = d.content_hash();
		let (v, r, s) = b.sign(hash).unwrap();
		let ctx_b = CrossTx::new(d, v, r, s);
		store.add_remote(ctx_b, 1).unwrap();

		let event = events.try_recv().unwrap();
		assert_eq!(event.0.signature_count().unwrap(), 2);
		assert!(events.try_recv().is_err());
	}

	#[test]
	fn duplicate_and_invalid_sign_are_rejected() {
		let a = keystore(0x11);
		let b = keystore(0x22);
		let anchors = vec![a.address().unwrap(), b.address().unwrap()];
		let registry = registry_with(7, anchors, 2);
		let store = CtxStore::new(registry, Arc::new(a), CtxStoreConfig::default(), None);

		store.add_local(data(1, 7, 100, 200)).unwrap();

		let d = data(1, 7, 100, 200);
		let hash = d.content_hash();
		let (v, r, s) = b.sign(hash).unwrap();
		let ctx_b = CrossTx::new(d, v, r, s);
		store.add_remote(ctx_b.clone(), 1).unwrap();
		assert_eq!(store.add_remote(ctx_b, 1), Err(Error::DuplicateSign));

		let mismatched = data(1, 7, 100, 300);
		let hash2 = mismatched.content_hash();
		let (v2, r2, s2) = b.sign(hash2).unwrap();
		let ctx_c = CrossTx::new(mismatched, v2, r2, s2);
		assert_eq!(store.add_remote(ctx_c, 1), Err(Error::InvalidSign));
	}

	#[test]
	fn overflow_evicts_lowest_price() {
		let a = keystore(0x11);
		let anchors = vec![a.address().unwrap()];
		let registry = registry_with(7, anchors, 1);
		let config = CtxStoreConfig { capacity: 10 };
		let store = CtxStore::new(registry, Arc::new(a), config, None);

		for i in 1..=10u8 {
			store.add_local(data(i, 7, 1, i as u64)).unwrap();
		}
		assert_eq!(store.len(), 10);
		store.add_local(data(20, 7, 1, 20)).unwrap();
		assert_eq!(store.len(), 10);
		assert!(store.get(&B256::repeat_byte(1)).is_none());
		assert!(store.get(&B256::repeat_byte(20)).is_some());
	}
}
