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

//! The message handler: one long-lived `tokio::select!` loop over chain events,
//! pool-emitted threshold events, and the inter-chain channel, plus a second task
//! draining the inter-chain reader. Grounded in
//! `examples/original_source/cross/handler.go`'s `MsgHandler.loop`/`ReadCrossMessage`
//! and the teacher's `worker.rs::run` cooperative `futures::select!` loop.

use std::sync::Arc;

use codec::{Decode, Encode};
use tokio::sync::{mpsc, watch};

use crate::collaborators::{Peer, ProtocolManager};
use crate::config::{ChainRegistry, HandlerConfig};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::pool::{CtxStore, RtxStore};
use crate::remote_exec::RemoteExecDriver;
use crate::tx::{CrossTx, CrossTxWithSigs, RecTx, RecTxWithSigs};

/// Whether this node signs and broadcasts locally-originated messages, or only
/// relays and stores (spec §4.5 "anchor gating").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
	Anchor,
	Relay,
}

impl Role {
	pub fn is_anchor(self) -> bool {
		matches!(self, Role::Anchor)
	}
}

/// Decoded peer message, switched on by `handle_msg` (spec §6.2/§4.5).
#[derive(Debug, Clone, Encode, Decode)]
pub enum PeerMessage {
	CtxSign(CrossTx),
	CtxSigns(Vec<CrossTxWithSigs>),
	RtxSign(RecTx),
	CtxSignsInternal(Vec<CrossTxWithSigs>),
}

impl PeerMessage {
	pub fn decode(code: u8, body: &[u8]) -> Result<Self> {
		let mut slice = body;
		match code {
			0 => CrossTx::decode(&mut slice).map(PeerMessage::CtxSign),
			1 => Vec::<CrossTxWithSigs>::decode(&mut slice).map(PeerMessage::CtxSigns),
			2 => RecTx::decode(&mut slice).map(PeerMessage::RtxSign),
			3 => Vec::<CrossTxWithSigs>::decode(&mut slice).map(PeerMessage::CtxSignsInternal),
			other => return Err(Error::InvalidMsgCode(other)),
		}
		.map_err(|e| Error::Decode(e.to_string()))
	}
}

/// A message routed over the inter-chain channel (spec §4.5's "inter-chain channel
/// reader"): an outbound aggregate headed to its destination chain's handler, or an
/// inbound receipt headed back to this one.
#[derive(Debug, Clone)]
pub enum InterChainMessage {
	Ctx(CrossTxWithSigs),
	Rtx(RecTxWithSigs),
}

/// Shared, `Arc`-able coordination state: both the main loop and `handle_msg`
/// (driven by the external peer-message dispatcher) operate on the same stores.
pub struct Handler {
	pub role: Role,
	pub ctx_store: Arc<CtxStore>,
	pub rtx_store: Arc<RtxStore>,
	pub protocol: Arc<dyn ProtocolManager>,
	pub remote_exec: Arc<RemoteExecDriver>,
	pub registry: Arc<ChainRegistry>,
	pub config: HandlerConfig,
	pub metrics: Option<Arc<Metrics>>,
}

impl Handler {
	/// Dispatch one decoded peer message. Returns `Err` only for decode/code
	/// errors the caller should act on (e.g. penalize the peer); every other
	/// failure is logged and absorbed, matching the propagation policy in §7.
	pub async fn handle_msg(&self, msg: PeerMessage, peer: &dyn Peer) -> Result<()> {
		if !self.protocol.can_accept_txs() {
			return Ok(());
		}
		match msg {
			PeerMessage::CtxSign(ctx) => {
				if self.ctx_store.validate_ctx(&ctx).is_ok() {
					peer.mark_rec_transaction(ctx.sign_hash());
					self.protocol.broadcast_ctx(vec![ctx.clone()]).await?;
					if let Err(e) = self.ctx_store.add_remote(ctx, 0) {
						log::debug!(target: "xchain", "add remote ctx: {e}");
					}
				}
			}
			PeerMessage::CtxSigns(cwss) => {
				self.ctx_store.add_cwss(cwss.clone())?;
				self.protocol.broadcast_cwss(cwss.clone()).await?;
				for cws in &cwss {
					peer.mark_cross_transaction_with_signatures(cws.id());
				}
			}
			PeerMessage::RtxSign(rtx) => {
				if self.rtx_store.validate_rtx(&rtx).is_ok() {
					peer.mark_rec_transaction(rtx.sign_hash());
					self.protocol.broadcast_rtx(vec![rtx.clone()]).await?;
					if let Err(e) = self.rtx_store.add_remote(rtx) {
						log::debug!(target: "xchain", "add remote rtx: {e}");
					}
				}
			}
			PeerMessage::CtxSignsInternal(cwss) => {
				self.ctx_store.add_cwss(cwss.clone())?;
				self.protocol.broadcast_internal_cwss(cwss.clone()).await?;
				for cws in &cwss {
					peer.mark_internal_cross_transaction_with_signatures(cws.id());
				}
			}
		}
		Ok(())
	}

	/// Drop ids confirmed finished on the remote chain from both stores. Logged,
	/// not retried — the next finish event supersedes (spec §7).
	pub fn clear_store(&self, finished: &[alloy_primitives::B256]) {
		self.ctx_store.remove_locals(finished);
		self.rtx_store.remove_locals(finished);
	}
}

/// Owns the handles for the two long-lived tasks spawned by `BridgeHandle::spawn`,
/// analogous to the teacher's `start_ethy_gadget` thin-shim entry point.
pub struct BridgeHandle {
	main_loop: tokio::task::JoinHandle<()>,
	inter_chain_reader: tokio::task::JoinHandle<()>,
	quit: watch::Sender<bool>,
}

impl BridgeHandle {
	/// Spawn the main select loop and the inter-chain channel reader.
	pub fn spawn(
		handler: Arc<Handler>,
		chain_events: Box<dyn crate::collaborators::ChainEventSource>,
		inter_chain_tx: mpsc::Sender<InterChainMessage>,
		inter_chain_rx: mpsc::Receiver<InterChainMessage>,
	) -> Self {
		let (quit_tx, quit_rx) = watch::channel(false);

		let main_loop = tokio::spawn(run_main_loop(handler.clone(), chain_events, inter_chain_tx, quit_rx.clone()));
		let inter_chain_reader = tokio::spawn(run_inter_chain_reader(handler, inter_chain_rx, quit_rx));

		Self { main_loop, inter_chain_reader, quit: quit_tx }
	}

	/// Signal both loops to exit on their next select and wait for them to finish.
	pub async fn shutdown(self) {
		let _ = self.quit.send(true);
		let _ = self.main_loop.await;
		let _ = self.inter_chain_reader.await;
	}
}

async fn run_main_loop(
	handler: Arc<Handler>,
	mut chain_events: Box<dyn crate::collaborators::ChainEventSource>,
	inter_chain_tx: mpsc::Sender<InterChainMessage>,
	mut quit: watch::Receiver<bool>,
) {
	let mut maker_signed = handler.ctx_store.subscribe_cwss_result_event();
	let mut taker_signed = handler.rtx_store.subscribe_new_rwss_event();
	let mut available_taker = handler.rtx_store.subscribe_available_taker_event();

	loop {
		tokio::select! {
			biased;

			_ = quit.changed() => {
				if *quit.borrow() {
					return;
				}
			}

			ctx = chain_events.next_new_ctx() => {
				let Some(ctx) = ctx else { return };
				if !handler.protocol.can_accept_txs() {
					continue;
				}
				if handler.role.is_anchor() {
					if let Err(e) = handler.ctx_store.add_local(ctx.data.clone()) {
						log::warn!(target: "xchain", "add local ctx: {e}");
					}
					if let Err(e) = handler.protocol.broadcast_ctx(vec![ctx]).await {
						log::warn!(target: "xchain", "broadcast ctx: {e}");
					}
				}
			}

			event = maker_signed.recv() => {
				let Some(event) = event else { return };
				let bundle = event.0;
				if let Err(e) = handler.protocol.broadcast_internal_cwss(vec![bundle.clone()]).await {
					log::warn!(target: "xchain", "broadcast internal cwss: {e}");
				}
				if handler.role.is_anchor() {
					write_cross_message(&inter_chain_tx, InterChainMessage::Ctx(bundle), &mut quit).await;
				}
			}

			rtx = chain_events.next_new_rtx() => {
				let Some(rtx) = rtx else { return };
				if !handler.protocol.can_accept_txs() {
					continue;
				}
				if handler.role.is_anchor() {
					if let Err(e) = handler.rtx_store.add_local(rtx.data.clone()) {
						log::warn!(target: "xchain", "add local rtx: {e}");
					}
					if let Err(e) = handler.protocol.broadcast_rtx(vec![rtx]).await {
						log::warn!(target: "xchain", "broadcast rtx: {e}");
					}
				}
			}

			event = taker_signed.recv() => {
				let Some(event) = event else { return };
				if handler.role.is_anchor() {
					write_cross_message(&inter_chain_tx, InterChainMessage::Rtx(event.0), &mut quit).await;
				}
			}

			event = available_taker.recv() => {
				let Some(event) = event else { return };
				if handler.role.is_anchor() {
					handle_available_taker(&handler, event.0).await;
				}
			}

			rtxs = chain_events.next_new_rtxs() => {
				let Some(rtxs) = rtxs else { return };
				let ids: Vec<_> = rtxs.iter().map(|rws| rws.id()).collect();
				handler.ctx_store.remove_remotes(&ids);
			}

			finished = chain_events.next_finish() => {
				let Some(finished) = finished else { return };
				handler.clear_store(&finished);
			}
		}
	}
}

async fn write_cross_message(
	tx: &mpsc::Sender<InterChainMessage>,
	msg: InterChainMessage,
	quit: &mut watch::Receiver<bool>,
) {
	tokio::select! {
		result = tx.send(msg) => {
			if let Err(e) = result {
				log::warn!(target: "xchain", "inter-chain channel closed: {e}");
			}
		}
		_ = quit.changed() => {}
	}
}

async fn handle_available_taker(handler: &Arc<Handler>, pending: Vec<RecTxWithSigs>) {
	if pending.is_empty() {
		handler.remote_exec.clear_param_cache();
		return;
	}
	let address = handler.remote_exec_address();
	let in_flight = match handler.protocol.get_anchor_txs(address).await {
		Ok(txs) => txs.len(),
		Err(e) => {
			log::error!(target: "xchain", "get_anchor_txs: {e}");
			return;
		}
	};
	if in_flight >= handler.config.remote_exec_pending_ceiling {
		return;
	}
	match handler.remote_exec.build_lockout_txs(&pending, &handler.config).await {
		Ok(batch) => {
			handler.rtx_store.mark_finishing(&batch.built);
			if let Err(e) = handler.protocol.add_remotes(batch.txs).await {
				log::warn!(target: "xchain", "add_remotes: {e}");
			}
		}
		Err(e) => log::info!(target: "xchain", "build_lockout_txs: {e}"),
	}
}

impl Handler {
	fn remote_exec_address(&self) -> alloy_primitives::Address {
		// The remote-exec driver's signer owns the address this is submitted as;
		// `ProtocolManager::get_anchor_txs` is queried for that same address.
		self.remote_exec.signer_address()
	}
}

async fn run_inter_chain_reader(
	handler: Arc<Handler>,
	mut inter_chain_rx: mpsc::Receiver<InterChainMessage>,
	mut quit: watch::Receiver<bool>,
) {
	let local_network_id = handler.protocol.network_id();
	loop {
		tokio::select! {
			biased;

			_ = quit.changed() => {
				if *quit.borrow() {
					return;
				}
			}

			msg = inter_chain_rx.recv() => {
				let Some(msg) = msg else { return };
				match msg {
					InterChainMessage::Ctx(cws) if cws.dest_id() == local_network_id => {
						if let Err(e) = handler.ctx_store.add_cwss(vec![cws.clone()]) {
							log::warn!(target: "xchain", "add_cwss: {e}");
							continue;
						}
						if let Err(e) = handler.protocol.broadcast_cwss(vec![cws]).await {
							log::warn!(target: "xchain", "broadcast_cwss: {e}");
						}
					}
					InterChainMessage::Rtx(rws) if rws.dest_id() == local_network_id => {
						if handler.rtx_store.read_from_locals(&rws.id()).is_none() {
							if let Err(e) = handler.rtx_store.add_rwss(vec![rws]) {
								log::warn!(target: "xchain", "add_rwss: {e}");
							}
						}
					}
					_ => {}
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::tx::{CrossTx, CrossTxData};
	use alloy_primitives::{Address, B256, U256};

	fn sample_ctx() -> CrossTx {
		let data = CrossTxData {
			value: U256::from(100u64),
			ctx_id: B256::repeat_byte(1),
			tx_hash: B256::repeat_byte(0xAA),
			block_hash: B256::repeat_byte(0xBB),
			from: Address::repeat_byte(0x01),
			to: Address::repeat_byte(0x02),
			dest_id: 7,
			dest_value: U256::from(200u64),
			input: vec![1, 2, 3],
		};
		CrossTx::new(data, 27, B256::repeat_byte(5), B256::repeat_byte(6))
	}

	#[test]
	fn decode_round_trips_every_known_code() {
		let ctx = sample_ctx();
		let encoded = ctx.encode();
		let decoded = PeerMessage::decode(0, &encoded).unwrap();
		assert!(matches!(decoded, PeerMessage::CtxSign(_)));
	}

	#[test]
	fn decode_rejects_unknown_code() {
		let err = PeerMessage::decode(99, &[]).unwrap_err();
		assert_eq!(err, Error::InvalidMsgCode(99));
	}

	#[test]
	fn decode_surfaces_malformed_body_as_decode_error() {
		let err = PeerMessage::decode(0, &[0xFF, 0x01]).unwrap_err();
		assert!(matches!(err, Error::Decode(_)));
	}
}
