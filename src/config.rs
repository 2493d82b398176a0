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

//! Chain registration and handler tunables.
//!
//! `ChainRegistry` is this crate's Rust shape of the external registration tool's
//! effect (`examples/original_source/archive/register/main.go`'s `chainRegister`
//! call): it does not submit that transaction, but holds the `(anchors, signConfirm)`
//! tuple the tool establishes on-chain, for `ValidateCtx`/`ValidateRtx` to consult.

use std::collections::HashMap;

use alloy_primitives::Address;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Anchor set and signature threshold registered for one destination chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEntry {
	pub anchors: Vec<Address>,
	pub sign_confirm: usize,
}

impl ChainEntry {
	pub fn contains_anchor(&self, address: &Address) -> bool {
		self.anchors.contains(address)
	}
}

/// `destId -> ChainEntry`, refreshable at runtime as chain registration events
/// arrive. Reads are hot-path (every signature validation); writes are rare, so a
/// single `RwLock` is sufficient.
pub struct ChainRegistry {
	chains: RwLock<HashMap<u64, ChainEntry>>,
}

impl ChainRegistry {
	pub fn new() -> Self {
		Self { chains: RwLock::new(HashMap::new()) }
	}

	pub fn with_chains(chains: impl IntoIterator<Item = (u64, ChainEntry)>) -> Self {
		Self { chains: RwLock::new(chains.into_iter().collect()) }
	}

	pub fn get(&self, dest_id: u64) -> Option<ChainEntry> {
		self.chains.read().get(&dest_id).cloned()
	}

	pub fn register(&self, dest_id: u64, entry: ChainEntry) {
		self.chains.write().insert(dest_id, entry);
	}

	pub fn deregister(&self, dest_id: u64) {
		self.chains.write().remove(&dest_id);
	}
}

impl Default for ChainRegistry {
	fn default() -> Self {
		Self::new()
	}
}

/// Tunables the source hard-codes as literals; kept here as overridable
/// configuration per the REDESIGN FLAGS direction. Deserializable so a caller can
/// load it from the node's config file alongside `ChainEntry` registrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
	/// Gas budget passed to `ConstructData` when ABI-encoding a receipt.
	pub gas_used_budget: u128,
	/// Capacity of every handler event channel.
	pub channel_capacity: usize,
	/// Soft cap on entries held by each pool before price-based eviction kicks in.
	pub pool_capacity: usize,
	/// Maximum transactions built by the remote-exec driver in one batch.
	pub remote_exec_batch_cap: usize,
	/// Maximum receipts scanned by the remote-exec driver in one batch, regardless
	/// of how many transactions were actually built.
	pub remote_exec_iteration_cap: usize,
	/// Pending remote-exec transactions per anchor below which `availableTaker` is
	/// allowed to build and submit more.
	pub remote_exec_pending_ceiling: usize,
}

impl Default for HandlerConfig {
	fn default() -> Self {
		Self {
			gas_used_budget: 80_000_000_000_000,
			channel_capacity: 4096,
			pool_capacity: 4096,
			remote_exec_batch_cap: 200,
			remote_exec_iteration_cap: 1024,
			remote_exec_pending_ceiling: 10,
		}
	}
}
