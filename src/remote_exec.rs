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

//! Turns a batch of fully-signed receipts into gas-estimated, signed destination
//! chain transactions, grounded in
//! `examples/original_source/cross/handler.go`'s `GetTxForLockOut`/
//! `CreateTransaction`/`CheckTransaction`.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use parking_lot::Mutex;

use crate::collaborators::{GasHelper, GasPriceOracle, ProtocolManager, RawTransaction, TransactionSigner};
use crate::config::HandlerConfig;
use crate::metrics::Metrics;
use crate::tx::RecTxWithSigs;

/// Cached gas parameters for a receipt already seen once, keyed by id. Re-verified
/// (not re-estimated) on every later sighting until it either builds or is evicted
/// by `clear_param_cache`.
#[derive(Debug, Clone)]
struct TranParam {
	gas_limit: u64,
	gas_price: U256,
	data: Vec<u8>,
}

pub struct RemoteExecDriver {
	protocol: Arc<dyn ProtocolManager>,
	gas_oracle: Arc<dyn GasPriceOracle>,
	gas_helper: Arc<dyn GasHelper>,
	signer: Arc<dyn TransactionSigner>,
	contract: Address,
	param_cache: Mutex<HashMap<B256, TranParam>>,
	metrics: Option<Arc<Metrics>>,
}

/// Outcome of one `build_lockout_txs` call: the signed transactions to submit,
/// the ids that were actually built (consumed a nonce), and which receipts were
/// skipped this round (retried next time `availableTaker` fires, per spec §7's
/// `EstimateGas`/`CheckExec` failure policy). Receipts beyond the batch/iteration
/// cap appear in neither list — they were never scanned, and stay `Executing` in
/// `RtxStore` for the next round.
pub struct LockoutBatch {
	pub txs: Vec<RawTransaction>,
	pub built: Vec<B256>,
	pub skipped: Vec<B256>,
}

impl RemoteExecDriver {
	pub fn new(
		protocol: Arc<dyn ProtocolManager>,
		gas_oracle: Arc<dyn GasPriceOracle>,
		gas_helper: Arc<dyn GasHelper>,
		signer: Arc<dyn TransactionSigner>,
		contract: Address,
		metrics: Option<Arc<Metrics>>,
	) -> Self {
		Self { protocol, gas_oracle, gas_helper, signer, contract, param_cache: Mutex::new(HashMap::new()), metrics }
	}

	/// Drop every cached parameter set. Called when `availableTaker` fires with an
	/// empty list, signaling the pool has gone idle — this bounds cache growth and
	/// forces revalidation after quiescence (spec §4.6, kept as specified rather
	/// than "fixed").
	pub fn clear_param_cache(&self) {
		self.param_cache.lock().clear();
	}

	/// The address in-flight transactions are submitted as, used to query
	/// `ProtocolManager::get_anchor_txs` for the pending-ceiling check.
	pub fn signer_address(&self) -> Address {
		self.signer.address()
	}

	/// Build at most `config.remote_exec_batch_cap` signed transactions from
	/// `rwss`, scanning at most `config.remote_exec_iteration_cap` receipts.
	pub async fn build_lockout_txs(&self, rwss: &[RecTxWithSigs], config: &HandlerConfig) -> crate::error::Result<LockoutBatch> {
		let address = self.signer.address();
		let base_nonce = self.protocol.get_nonce(address).await?;
		let chain_id = self.protocol.network_id();

		let mut txs = Vec::new();
		let mut built = Vec::new();
		let mut skipped = Vec::new();
		let mut count: u64 = 0;
		let mut iterations: u64 = 0;

		for rws in rwss {
			if txs.len() >= config.remote_exec_batch_cap || iterations as usize >= config.remote_exec_iteration_cap {
				break;
			}
			iterations += 1;

			let id = rws.id();
			let cached = self.param_cache.lock().get(&id).cloned();
			let param = match cached {
				None => match self.estimate_param(rws, config.gas_used_budget).await {
					Ok(param) => {
						self.param_cache.lock().insert(id, param.clone());
						param
					}
					Err(_) => {
						skipped.push(id);
						if let Some(metrics) = &self.metrics {
							metrics.xchain_remote_exec_skipped_total.inc();
						}
						continue;
					}
				},
				Some(param) => {
					let nonce = base_nonce + count;
					match self.gas_helper.check_exec(self.contract, &param.data, nonce).await {
						Ok(true) => param,
						_ => {
							skipped.push(id);
							if let Some(metrics) = &self.metrics {
								metrics.xchain_remote_exec_skipped_total.inc();
							}
							continue;
						}
					}
				}
			};

			let nonce = base_nonce + count;
			let tx = self
				.signer
				.sign_transaction(nonce, self.contract, param.gas_limit, param.gas_price, param.data, chain_id)
				.await?;
			txs.push(tx);
			built.push(id);
			count += 1;
			if let Some(metrics) = &self.metrics {
				metrics.xchain_remote_exec_built_total.inc();
			}
		}

		log::info!(
			target: "xchain",
			"built {} lockout tx(s), skipped {}, scanned {} of {} receipts",
			txs.len(),
			skipped.len(),
			iterations,
			rwss.len()
		);

		Ok(LockoutBatch { txs, built, skipped })
	}

	async fn estimate_param(&self, rws: &RecTxWithSigs, gas_used: u128) -> crate::error::Result<TranParam> {
		let gas_price = self.gas_oracle.suggest_price().await?;
		let data = self.gas_helper.construct_data(rws, gas_used)?;
		let gas_limit = self
			.gas_helper
			.estimate_gas(self.contract, &data)
			.await?
			.ok_or(crate::error::Error::GasEstimateUnavailable)?;
		Ok(TranParam { gas_limit, gas_price, data })
	}
}
