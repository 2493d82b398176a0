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

//! `xchain-anchor` is the cross-chain transaction coordination core of a dual-chain
//! anchor bridge.
//!
//! An anchor node observes maker/taker events on its local chain, collects anchor
//! signatures on them in [`pool::CtxStore`] (outbound) and [`pool::RtxStore`]
//! (inbound), and once an aggregate crosses its destination chain's `signConfirm`
//! threshold, forwards it across an in-process inter-chain channel to the paired
//! handler running the other side of the bridge. [`remote_exec::RemoteExecDriver`]
//! turns fully-signed receipts into gas-estimated, signed destination-chain
//! transactions.
//!
//! The blockchain itself, its P2P peer set, the account keystore, RPC transport,
//! ABI encoder and gas oracle are external collaborators, reached only through the
//! traits in [`collaborators`]. This crate owns none of them.

use std::sync::Arc;

use log::debug;
use prometheus::Registry;

pub mod collaborators;
pub mod config;
pub mod error;
mod keystore;
pub mod metrics;
mod notification;
pub mod pool;
pub mod price;
pub mod remote_exec;
pub mod tx;

mod handler;

pub use handler::{BridgeHandle, Handler, InterChainMessage, PeerMessage, Role};
pub use keystore::{chain_id_from_v, recover_signer, AnchorKeystore};
pub use metrics::Metrics;

use collaborators::{ChainEventSource, GasHelper, GasPriceOracle, ProtocolManager, TransactionSigner};
use config::{ChainRegistry, HandlerConfig};
use pool::{CtxStore, CtxStoreConfig, RtxStore, RtxStoreConfig};
use remote_exec::RemoteExecDriver;

/// Everything needed to assemble one anchor node's coordination core.
///
/// Mirrors the teacher's `EthyParams`: a bag of collaborators and configuration
/// handed to a single entry point, which wires them into the long-lived tasks and
/// hands back a handle the caller uses to shut them down.
pub struct BridgeParams {
	pub role: Role,
	pub protocol: Arc<dyn ProtocolManager>,
	pub gas_oracle: Arc<dyn GasPriceOracle>,
	pub gas_helper: Arc<dyn GasHelper>,
	pub signer: Arc<dyn TransactionSigner>,
	pub remote_contract: alloy_primitives::Address,
	pub chain_events: Box<dyn ChainEventSource>,
	pub registry: Arc<ChainRegistry>,
	pub keystore: Arc<AnchorKeystore>,
	pub config: HandlerConfig,
	pub prometheus_registry: Option<Registry>,
}

/// Assembled stores plus the spawned handler tasks. Dropping this does not stop
/// the tasks; call [`BridgeCore::shutdown`] for a clean exit.
pub struct BridgeCore {
	pub ctx_store: Arc<CtxStore>,
	pub rtx_store: Arc<RtxStore>,
	pub remote_exec: Arc<RemoteExecDriver>,
	handle: BridgeHandle,
}

impl BridgeCore {
	pub async fn shutdown(self) {
		self.handle.shutdown().await;
	}
}

/// Build the two pools and the remote-exec driver, then spawn the main select
/// loop and the inter-chain reader.
///
/// This is a thin shim around constructing [`Handler`] and calling
/// [`BridgeHandle::spawn`], the same role the teacher's `start_ethy_gadget` plays
/// for its worker.
pub fn start_bridge_core(params: BridgeParams) -> BridgeCore {
	let BridgeParams {
		role,
		protocol,
		gas_oracle,
		gas_helper,
		signer,
		remote_contract,
		chain_events,
		registry,
		keystore,
		config,
		prometheus_registry,
	} = params;

	let metrics = prometheus_registry
		.as_ref()
		.map(Metrics::register)
		.and_then(|result| match result {
			Ok(metrics) => {
				debug!(target: "xchain", "registered metrics");
				Some(Arc::new(metrics))
			}
			Err(err) => {
				debug!(target: "xchain", "failed to register metrics: {err:?}");
				None
			}
		});

	let ctx_store = Arc::new(CtxStore::new(
		registry.clone(),
		keystore.clone(),
		CtxStoreConfig { capacity: config.pool_capacity },
		metrics.clone(),
	));
	let rtx_store = Arc::new(RtxStore::new(
		registry.clone(),
		keystore,
		RtxStoreConfig { capacity: config.pool_capacity },
		metrics.clone(),
	));
	let remote_exec = Arc::new(RemoteExecDriver::new(
		protocol.clone(),
		gas_oracle,
		gas_helper,
		signer,
		remote_contract,
		metrics.clone(),
	));

	let handler = Arc::new(Handler {
		role,
		ctx_store: ctx_store.clone(),
		rtx_store: rtx_store.clone(),
		protocol,
		remote_exec: remote_exec.clone(),
		registry,
		config: config.clone(),
		metrics,
	});

	let (inter_chain_tx, inter_chain_rx) = tokio::sync::mpsc::channel(config.channel_capacity);
	let handle = BridgeHandle::spawn(handler, chain_events, inter_chain_tx, inter_chain_rx);

	BridgeCore { ctx_store, rtx_store, remote_exec, handle }
}
