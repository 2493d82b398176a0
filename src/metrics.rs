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

//! Bridge coordinator Prometheus metrics definition

use prometheus::{IntCounter, IntGauge, PrometheusError, Registry};

/// Bridge coordinator metrics exposed through Prometheus. Public because the
/// stores and the remote-exec driver are constructed directly by callers
/// (there is no runtime to host construction the way the teacher's gadget does),
/// so a caller that wants metrics must be able to name this type.
pub struct Metrics {
	/// Current number of aggregates held in `CtxStore`
	pub xchain_ctx_pool_size: IntGauge,
	/// Current number of aggregates held in `RtxStore`
	pub xchain_rtx_pool_size: IntGauge,
	/// Outbound aggregates that crossed `signConfirm` and fired `CWssResultEvent`
	pub xchain_ctx_threshold_total: IntCounter,
	/// Inbound aggregates that crossed `signConfirm` and fired `NewRWssEvent`
	pub xchain_rtx_threshold_total: IntCounter,
	/// Entries evicted from `CtxStore` by the price heap under capacity pressure
	pub xchain_ctx_evictions_total: IntCounter,
	/// Entries evicted from `RtxStore` by the arrival-order heap under capacity pressure
	pub xchain_rtx_evictions_total: IntCounter,
	/// Signatures rejected as duplicates of an already-recorded anchor
	pub xchain_duplicate_signatures_total: IntCounter,
	/// Signatures rejected for a content-hash mismatch
	pub xchain_invalid_signatures_total: IntCounter,
	/// Transactions successfully built by the remote-exec driver
	pub xchain_remote_exec_built_total: IntCounter,
	/// Receipts skipped in a remote-exec batch (estimate or check failure)
	pub xchain_remote_exec_skipped_total: IntCounter,
}

impl Metrics {
	pub fn register(registry: &Registry) -> Result<Self, PrometheusError> {
		let metrics = Self {
			xchain_ctx_pool_size: IntGauge::new(
				"xchain_ctx_pool_size",
				"Number of outbound aggregates currently held in CtxStore",
			)?,
			xchain_rtx_pool_size: IntGauge::new(
				"xchain_rtx_pool_size",
				"Number of inbound aggregates currently held in RtxStore",
			)?,
			xchain_ctx_threshold_total: IntCounter::new(
				"xchain_ctx_threshold_total",
				"Outbound aggregates that reached signConfirm",
			)?,
			xchain_rtx_threshold_total: IntCounter::new(
				"xchain_rtx_threshold_total",
				"Inbound aggregates that reached signConfirm",
			)?,
			xchain_ctx_evictions_total: IntCounter::new(
				"xchain_ctx_evictions_total",
				"Outbound aggregates evicted by the price heap",
			)?,
			xchain_rtx_evictions_total: IntCounter::new(
				"xchain_rtx_evictions_total",
				"Inbound aggregates evicted by the arrival-order heap",
			)?,
			xchain_duplicate_signatures_total: IntCounter::new(
				"xchain_duplicate_signatures_total",
				"Signatures rejected as duplicates",
			)?,
			xchain_invalid_signatures_total: IntCounter::new(
				"xchain_invalid_signatures_total",
				"Signatures rejected for a content hash mismatch",
			)?,
			xchain_remote_exec_built_total: IntCounter::new(
				"xchain_remote_exec_built_total",
				"Transactions built by the remote-exec driver",
			)?,
			xchain_remote_exec_skipped_total: IntCounter::new(
				"xchain_remote_exec_skipped_total",
				"Receipts skipped in a remote-exec batch",
			)?,
		};
		registry.register(Box::new(metrics.xchain_ctx_pool_size.clone()))?;
		registry.register(Box::new(metrics.xchain_rtx_pool_size.clone()))?;
		registry.register(Box::new(metrics.xchain_ctx_threshold_total.clone()))?;
		registry.register(Box::new(metrics.xchain_rtx_threshold_total.clone()))?;
		registry.register(Box::new(metrics.xchain_ctx_evictions_total.clone()))?;
		registry.register(Box::new(metrics.xchain_rtx_evictions_total.clone()))?;
		registry.register(Box::new(metrics.xchain_duplicate_signatures_total.clone()))?;
		registry.register(Box::new(metrics.xchain_invalid_signatures_total.clone()))?;
		registry.register(Box::new(metrics.xchain_remote_exec_built_total.clone()))?;
		registry.register(Box::new(metrics.xchain_remote_exec_skipped_total.clone()))?;
		Ok(metrics)
	}
}
