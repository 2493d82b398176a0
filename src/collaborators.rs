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

//! External collaborators this crate consumes but does not implement: the chain
//! client, the P2P peer set, the gas oracle/estimator, and the account signer.
//! Grounded in `other_examples`'s `cctp-rs` bridge trait design (`BlockchainProvider`,
//! `AttestationProvider`, `Clock` as swappable async traits) and in
//! `examples/original_source/cross/handler.go`'s collaborator call sites
//! (`pm.NetworkId()`, `pm.CanAcceptTxs()`, `gpo.SuggestPrice`, `gasHelper.EstimateGas`).

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;

use crate::error::Result;
use crate::tx::{CrossTx, CrossTxWithSigs, RecTx, RecTxWithSigs};

/// A raw on-chain transaction ready for broadcast. Opaque to this crate: only the
/// external RPC transport knows how to encode and send it.
pub type RawTransaction = Vec<u8>;

/// The local chain's peer-set/sync coordinator (`ProtocolManager` in §6.1).
#[async_trait]
pub trait ProtocolManager: Send + Sync {
	fn network_id(&self) -> u64;

	/// `false` while the node is syncing; every inbound message is discarded in
	/// that state rather than queued.
	fn can_accept_txs(&self) -> bool;

	async fn get_nonce(&self, address: Address) -> Result<u64>;

	/// Currently pending remote-exec transactions authored by `address`, used to
	/// gate how many more the `availableTaker` arm may submit this round.
	async fn get_anchor_txs(&self, address: Address) -> Result<Vec<RawTransaction>>;

	async fn add_remotes(&self, txs: Vec<RawTransaction>) -> Result<()>;

	async fn broadcast_ctx(&self, txs: Vec<CrossTx>) -> Result<()>;
	async fn broadcast_rtx(&self, txs: Vec<RecTx>) -> Result<()>;
	async fn broadcast_cwss(&self, bundles: Vec<CrossTxWithSigs>) -> Result<()>;
	async fn broadcast_internal_cwss(&self, bundles: Vec<CrossTxWithSigs>) -> Result<()>;
}

/// A single connected peer, as seen by the gossip dedup layer.
pub trait Peer: Send + Sync {
	fn mark_rec_transaction(&self, hash: B256);
	fn mark_cross_transaction_with_signatures(&self, id: B256);
	fn mark_internal_cross_transaction_with_signatures(&self, id: B256);
}

/// Suggests a gas price for a destination-chain transaction.
#[async_trait]
pub trait GasPriceOracle: Send + Sync {
	async fn suggest_price(&self) -> Result<U256>;
}

/// ABI-encodes receipts and estimates/checks their on-chain executability.
#[async_trait]
pub trait GasHelper: Send + Sync {
	/// ABI-encode `rws` for the destination contract call, budgeted by `gas_used`.
	fn construct_data(&self, rws: &RecTxWithSigs, gas_used: u128) -> Result<Vec<u8>>;

	/// Estimate gas for `data` against the destination contract. `Ok(None)` means
	/// the call reverted or the node declined to estimate; the receipt is skipped.
	async fn estimate_gas(&self, to: Address, data: &[u8]) -> Result<Option<u64>>;

	/// Re-verify that previously estimated `data` is still executable at the
	/// current nonce, without re-estimating gas.
	async fn check_exec(&self, to: Address, data: &[u8], nonce: u64) -> Result<bool>;
}

/// Builds and signs a destination-chain transaction. Modeled as a trait because
/// account/keystore and ABI encoding are external collaborators this crate never
/// implements directly.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
	/// The address whose nonce `ProtocolManager::get_nonce` should be read for.
	fn address(&self) -> Address;

	async fn sign_transaction(
		&self,
		nonce: u64,
		to: Address,
		gas_limit: u64,
		gas_price: U256,
		data: Vec<u8>,
		chain_id: u64,
	) -> Result<RawTransaction>;
}

/// Subscription-style access to chain events: new maker/taker events observed
/// locally, and finish confirmations observed on the remote chain.
#[async_trait]
pub trait ChainEventSource: Send + Sync {
	async fn next_new_ctx(&mut self) -> Option<CrossTx>;
	async fn next_new_rtx(&mut self) -> Option<RecTx>;
	async fn next_new_rtxs(&mut self) -> Option<Vec<RecTxWithSigs>>;
	async fn next_finish(&mut self) -> Option<Vec<B256>>;
}
