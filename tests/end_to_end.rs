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

//! End-to-end coverage of the handler's two long-lived tasks and its peer-message
//! dispatch, built against two `Handler` instances wired together the way a real
//! deployment pairs an anchor's outbound writer to its counterpart's inbound
//! reader (spec §4.5, §8.2).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use libsecp256k1::SecretKey;
use tokio::sync::mpsc;

use xchain_anchor::collaborators::{
	ChainEventSource, GasHelper, GasPriceOracle, Peer, ProtocolManager, RawTransaction, TransactionSigner,
};
use xchain_anchor::config::{ChainEntry, ChainRegistry, HandlerConfig};
use xchain_anchor::pool::{CtxStore, CtxStoreConfig, RtxStore, RtxStoreConfig};
use xchain_anchor::remote_exec::RemoteExecDriver;
use xchain_anchor::tx::{CrossTx, CrossTxData, CrossTxWithSigs, RecTxData};
use xchain_anchor::{Handler, PeerMessage, Role};

struct MockProtocol {
	network_id: u64,
}

#[async_trait]
impl ProtocolManager for MockProtocol {
	fn network_id(&self) -> u64 {
		self.network_id
	}
	fn can_accept_txs(&self) -> bool {
		true
	}
	async fn get_nonce(&self, _address: Address) -> xchain_anchor::error::Result<u64> {
		Ok(0)
	}
	async fn get_anchor_txs(&self, _address: Address) -> xchain_anchor::error::Result<Vec<RawTransaction>> {
		Ok(vec![])
	}
	async fn add_remotes(&self, _txs: Vec<RawTransaction>) -> xchain_anchor::error::Result<()> {
		Ok(())
	}
	async fn broadcast_ctx(&self, _txs: Vec<CrossTx>) -> xchain_anchor::error::Result<()> {
		Ok(())
	}
	async fn broadcast_rtx(&self, _txs: Vec<xchain_anchor::tx::RecTx>) -> xchain_anchor::error::Result<()> {
		Ok(())
	}
	async fn broadcast_cwss(&self, _bundles: Vec<CrossTxWithSigs>) -> xchain_anchor::error::Result<()> {
		Ok(())
	}
	async fn broadcast_internal_cwss(&self, _bundles: Vec<CrossTxWithSigs>) -> xchain_anchor::error::Result<()> {
		Ok(())
	}
}

struct MockGasOracle;

#[async_trait]
impl GasPriceOracle for MockGasOracle {
	async fn suggest_price(&self) -> xchain_anchor::error::Result<U256> {
		Ok(U256::from(1u64))
	}
}

struct MockGasHelper;

#[async_trait]
impl GasHelper for MockGasHelper {
	fn construct_data(
		&self,
		_rws: &xchain_anchor::tx::RecTxWithSigs,
		_gas_used: u128,
	) -> xchain_anchor::error::Result<Vec<u8>> {
		Ok(vec![])
	}
	async fn estimate_gas(&self, _to: Address, _data: &[u8]) -> xchain_anchor::error::Result<Option<u64>> {
		Ok(Some(21_000))
	}
	async fn check_exec(&self, _to: Address, _data: &[u8], _nonce: u64) -> xchain_anchor::error::Result<bool> {
		Ok(true)
	}
}

struct MockSigner(Address);

#[async_trait]
impl TransactionSigner for MockSigner {
	fn address(&self) -> Address {
		self.0
	}
	async fn sign_transaction(
		&self,
		nonce: u64,
		_to: Address,
		_gas_limit: u64,
		_gas_price: U256,
		_data: Vec<u8>,
		_chain_id: u64,
	) -> xchain_anchor::error::Result<RawTransaction> {
		Ok(nonce.to_be_bytes().to_vec())
	}
}

#[derive(Default)]
struct MockPeer {
	marked_rec: AtomicUsize,
	marked_cwss: AtomicUsize,
	marked_internal_cwss: AtomicUsize,
}

impl Peer for MockPeer {
	fn mark_rec_transaction(&self, _hash: B256) {
		self.marked_rec.fetch_add(1, Ordering::SeqCst);
	}
	fn mark_cross_transaction_with_signatures(&self, _id: B256) {
		self.marked_cwss.fetch_add(1, Ordering::SeqCst);
	}
	fn mark_internal_cross_transaction_with_signatures(&self, _id: B256) {
		self.marked_internal_cwss.fetch_add(1, Ordering::SeqCst);
	}
}

/// Yields a single `next_new_ctx` event, then pends forever on every call so it
/// never again wins a `tokio::select!` race against the pool's own events.
struct OnceCtxSource {
	ctx: Option<CrossTx>,
}

#[async_trait]
impl ChainEventSource for OnceCtxSource {
	async fn next_new_ctx(&mut self) -> Option<CrossTx> {
		match self.ctx.take() {
			Some(ctx) => Some(ctx),
			None => std::future::pending().await,
		}
	}
	async fn next_new_rtx(&mut self) -> Option<xchain_anchor::tx::RecTx> {
		std::future::pending().await
	}
	async fn next_new_rtxs(&mut self) -> Option<Vec<xchain_anchor::tx::RecTxWithSigs>> {
		std::future::pending().await
	}
	async fn next_finish(&mut self) -> Option<Vec<B256>> {
		std::future::pending().await
	}
}

struct NeverSource;

#[async_trait]
impl ChainEventSource for NeverSource {
	async fn next_new_ctx(&mut self) -> Option<CrossTx> {
		std::future::pending().await
	}
	async fn next_new_rtx(&mut self) -> Option<xchain_anchor::tx::RecTx> {
		std::future::pending().await
	}
	async fn next_new_rtxs(&mut self) -> Option<Vec<xchain_anchor::tx::RecTxWithSigs>> {
		std::future::pending().await
	}
	async fn next_finish(&mut self) -> Option<Vec<B256>> {
		std::future::pending().await
	}
}

fn keystore(seed: u8) -> xchain_anchor::AnchorKeystore {
	xchain_anchor::AnchorKeystore::new(SecretKey::parse(&[seed; 32]).unwrap())
}

fn ctx_data(ctx_id: u8, dest_id: u64) -> CrossTxData {
	CrossTxData {
		value: U256::from(100u64),
		ctx_id: B256::repeat_byte(ctx_id),
		tx_hash: B256::repeat_byte(0xAA),
		block_hash: B256::repeat_byte(0xBB),
		from: Address::repeat_byte(0x01),
		to: Address::repeat_byte(0x02),
		dest_id,
		dest_value: U256::from(200u64),
		input: vec![],
	}
}

fn remote_exec_driver(network_id: u64) -> Arc<RemoteExecDriver> {
	Arc::new(RemoteExecDriver::new(
		Arc::new(MockProtocol { network_id }),
		Arc::new(MockGasOracle),
		Arc::new(MockGasHelper),
		Arc::new(MockSigner(Address::repeat_byte(0x09))),
		Address::repeat_byte(0x42),
		None,
	))
}

fn handler_for(
	network_id: u64,
	registry: Arc<ChainRegistry>,
	anchor_seed: Option<u8>,
	role: Role,
) -> Arc<Handler> {
	let keystore = Arc::new(match anchor_seed {
		Some(seed) => keystore(seed),
		None => xchain_anchor::AnchorKeystore::none(),
	});
	let ctx_store =
		Arc::new(CtxStore::new(registry.clone(), keystore.clone(), CtxStoreConfig::default(), None));
	let rtx_store = Arc::new(RtxStore::new(registry.clone(), keystore, RtxStoreConfig::default(), None));
	Arc::new(Handler {
		role,
		ctx_store,
		rtx_store,
		protocol: Arc::new(MockProtocol { network_id }),
		remote_exec: remote_exec_driver(network_id),
		registry,
		config: HandlerConfig::default(),
		metrics: None,
	})
}

async fn wait_until<F: Fn() -> bool>(predicate: F) -> bool {
	for _ in 0..200 {
		if predicate() {
			return true;
		}
		tokio::time::sleep(std::time::Duration::from_millis(5)).await;
	}
	predicate()
}

/// Scenario 1: a single local signature crossing `signConfirm` on node A (acting
/// as the sole registered anchor for node B's chain id) must produce exactly one
/// inter-chain write that node B's reader accepts into its own `CtxStore`.
#[tokio::test]
async fn threshold_write_crosses_the_inter_chain_channel() {
	let a_keystore_addr = keystore(0x11).address().unwrap();
	let registry_a = Arc::new(ChainRegistry::new());
	registry_a.register(2, ChainEntry { anchors: vec![a_keystore_addr], sign_confirm: 1 });
	let registry_b = Arc::new(ChainRegistry::new());

	let handler_a = handler_for(1, registry_a, Some(0x11), Role::Anchor);
	let handler_b = handler_for(2, registry_b, None, Role::Anchor);

	let maker_ctx = CrossTx::new(ctx_data(1, 2), 27, B256::repeat_byte(0), B256::repeat_byte(0));
	let chain_events_a: Box<dyn ChainEventSource> = Box::new(OnceCtxSource { ctx: Some(maker_ctx) });
	let chain_events_b: Box<dyn ChainEventSource> = Box::new(NeverSource);

	let (tx_a_out, rx_a_out) = mpsc::channel(16);
	let (tx_b_out, rx_b_out) = mpsc::channel(16);

	let handle_a = xchain_anchor::BridgeHandle::spawn(handler_a, chain_events_a, tx_a_out, rx_b_out);
	let handle_b = xchain_anchor::BridgeHandle::spawn(handler_b.clone(), chain_events_b, tx_b_out, rx_a_out);

	let id = B256::repeat_byte(1);
	let arrived = wait_until(|| handler_b.ctx_store.get(&id).is_some()).await;
	assert!(arrived, "node B never received the thresholded aggregate over the inter-chain channel");
	assert_eq!(handler_b.ctx_store.len(), 1);

	handle_a.shutdown().await;
	handle_b.shutdown().await;
}

/// An aggregate destined for a chain id that isn't this node's own network id
/// must never be absorbed by the inter-chain reader (the filter in §4.5).
#[tokio::test]
async fn mismatched_destination_is_dropped_by_the_reader() {
	let a_keystore_addr = keystore(0x11).address().unwrap();
	let registry_a = Arc::new(ChainRegistry::new());
	registry_a.register(99, ChainEntry { anchors: vec![a_keystore_addr], sign_confirm: 1 });
	let registry_b = Arc::new(ChainRegistry::new());

	let handler_a = handler_for(1, registry_a, Some(0x11), Role::Anchor);
	let handler_b = handler_for(2, registry_b, None, Role::Anchor);

	let maker_ctx = CrossTx::new(ctx_data(7, 99), 27, B256::repeat_byte(0), B256::repeat_byte(0));
	let chain_events_a: Box<dyn ChainEventSource> = Box::new(OnceCtxSource { ctx: Some(maker_ctx) });
	let chain_events_b: Box<dyn ChainEventSource> = Box::new(NeverSource);

	let (tx_a_out, rx_a_out) = mpsc::channel(16);
	let (tx_b_out, rx_b_out) = mpsc::channel(16);

	let handle_a = xchain_anchor::BridgeHandle::spawn(handler_a, chain_events_a, tx_a_out, rx_b_out);
	let handle_b = xchain_anchor::BridgeHandle::spawn(handler_b.clone(), chain_events_b, tx_b_out, rx_a_out);

	// Give the write every chance to arrive before asserting it did not.
	tokio::time::sleep(std::time::Duration::from_millis(100)).await;
	assert!(handler_b.ctx_store.is_empty());

	handle_a.shutdown().await;
	handle_b.shutdown().await;
}

/// Scenario 5: a finish confirmation for an id present in both stores removes it
/// from both.
#[test]
fn finish_confirmation_clears_both_stores() {
	let addr = keystore(0x11).address().unwrap();
	let registry = Arc::new(ChainRegistry::new());
	registry.register(7, ChainEntry { anchors: vec![addr], sign_confirm: 1 });

	let handler = handler_for(1, registry, Some(0x11), Role::Anchor);
	let id = B256::repeat_byte(3);

	handler.ctx_store.add_local(ctx_data(3, 7)).unwrap();
	handler
		.rtx_store
		.add_local(RecTxData {
			value: U256::from(1u64),
			ctx_id: id,
			tx_hash: B256::repeat_byte(0xAA),
			block_hash: B256::repeat_byte(0xBB),
			from: Address::repeat_byte(0x01),
			to: Address::repeat_byte(0x02),
			dest_id: 7,
			dest_value: U256::from(1u64),
			input: vec![],
			block_number: 1,
			index: 0,
		})
		.unwrap();
	assert!(handler.ctx_store.get(&id).is_some());
	assert!(handler.rtx_store.read_from_locals(&id).is_some());

	handler.clear_store(&[id]);

	assert!(handler.ctx_store.get(&id).is_none());
	assert!(handler.rtx_store.read_from_locals(&id).is_none());
}

/// A single signed `CtxSign` peer message is validated against the registry,
/// merged, and acknowledged to the originating peer.
#[tokio::test]
async fn peer_ctx_sign_is_validated_and_merged() {
	let signer = keystore(0x11);
	let addr = signer.address().unwrap();
	let registry = Arc::new(ChainRegistry::new());
	registry.register(7, ChainEntry { anchors: vec![addr], sign_confirm: 2 });

	let handler = handler_for(1, registry, None, Role::Relay);
	let data = ctx_data(4, 7);
	let hash = CrossTx::new(data.clone(), 0, B256::repeat_byte(0), B256::repeat_byte(0)).content_hash();
	let (v, r, s) = signer.sign(hash).unwrap();
	let ctx = CrossTx::new(data, v, r, s);

	let peer = MockPeer::default();
	handler.handle_msg(PeerMessage::CtxSign(ctx), &peer).await.unwrap();

	let id = B256::repeat_byte(4);
	assert!(handler.ctx_store.get(&id).is_some());
	assert_eq!(peer.marked_rec.load(Ordering::SeqCst), 1);
}

/// A bulk `CtxSigns` peer message (already-thresholded aggregates) is accepted
/// without re-validation and every id is acknowledged to the peer.
#[tokio::test]
async fn peer_ctx_signs_bulk_accepts_without_revalidation() {
	let registry = Arc::new(ChainRegistry::new());
	let handler = handler_for(1, registry, None, Role::Relay);

	let ctx = CrossTx::new(ctx_data(5, 7), 27, B256::repeat_byte(1), B256::repeat_byte(2));
	let bundle = CrossTxWithSigs::new(&ctx, 10);
	let id = bundle.id();

	let peer = MockPeer::default();
	handler.handle_msg(PeerMessage::CtxSigns(vec![bundle]), &peer).await.unwrap();

	assert!(handler.ctx_store.get(&id).is_some());
	assert_eq!(peer.marked_cwss.load(Ordering::SeqCst), 1);
}
